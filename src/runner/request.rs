//! Control requests and the coalescing queue that carries them.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::widgets::WidgetStates;

/// Data attached to a rerun. `None` reuses the runner's current state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RerunData {
    pub widget_states: Option<WidgetStates>,
}

impl RerunData {
    pub fn with_states(states: WidgetStates) -> Self {
        Self {
            widget_states: Some(states),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptRequest {
    Rerun(RerunData),
    Stop,
    Shutdown,
}

/// Thread-safe FIFO of control requests, owned by the session and shared
/// with each runner it creates.
///
/// - `Shutdown` jumps to the front.
/// - `Rerun` merges into an already queued rerun, so at most one is pending.
/// - `Stop` appends.
#[derive(Debug, Default)]
pub struct ScriptRequestQueue {
    queue: Mutex<VecDeque<ScriptRequest>>,
}

impl ScriptRequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_request(&self) -> bool {
        !self.queue.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn enqueue(&self, request: ScriptRequest) {
        Self::push(&mut self.queue.lock(), request);
    }

    /// Enqueue unless `closed` is set. The flag is read under the queue
    /// lock, so this cannot interleave with [`Self::dequeue_or_close`].
    pub fn enqueue_unless_closed(&self, closed: &AtomicBool, request: ScriptRequest) -> bool {
        let mut queue = self.queue.lock();
        if closed.load(Ordering::Acquire) {
            return false;
        }
        Self::push(&mut queue, request);
        true
    }

    fn push(queue: &mut VecDeque<ScriptRequest>, request: ScriptRequest) {
        match request {
            ScriptRequest::Shutdown => queue.push_front(request),
            ScriptRequest::Rerun(data) => {
                let queued = queue.iter_mut().find_map(|item| match item {
                    ScriptRequest::Rerun(existing) => Some(existing),
                    _ => None,
                });
                match queued {
                    Some(existing) => Self::coalesce(existing, data),
                    None => queue.push_back(ScriptRequest::Rerun(data)),
                }
            }
            ScriptRequest::Stop => queue.push_back(request),
        }
    }

    fn coalesce(existing: &mut RerunData, new: RerunData) {
        let Some(states) = new.widget_states else {
            return;
        };
        existing.widget_states = Some(match existing.widget_states.take() {
            None => states,
            Some(old) => WidgetStates::coalesce(&old, states),
        });
    }

    pub fn dequeue(&self) -> Option<ScriptRequest> {
        self.queue.lock().pop_front()
    }

    /// Pop the next request, or set `closed` while still holding the lock
    /// when there is none.
    pub fn dequeue_or_close(&self, closed: &AtomicBool) -> Option<ScriptRequest> {
        let mut queue = self.queue.lock();
        let request = queue.pop_front();
        if request.is_none() {
            closed.store(true, Ordering::Release);
        }
        request
    }

    /// Set `closed` under the queue lock.
    pub fn close(&self, closed: &AtomicBool) {
        let _queue = self.queue.lock();
        closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widgets::WidgetValue;

    fn states(id: &str, value: WidgetValue) -> WidgetStates {
        let mut s = WidgetStates::new();
        s.set(id, value);
        s
    }

    #[test]
    fn test_fifo_for_stop() {
        let q = ScriptRequestQueue::new();
        q.enqueue(ScriptRequest::Rerun(RerunData::default()));
        q.enqueue(ScriptRequest::Stop);
        assert_eq!(
            q.dequeue(),
            Some(ScriptRequest::Rerun(RerunData::default()))
        );
        assert_eq!(q.dequeue(), Some(ScriptRequest::Stop));
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn test_closed_queue_rejects_requests() {
        let q = ScriptRequestQueue::new();
        let closed = AtomicBool::new(false);
        assert!(q.enqueue_unless_closed(&closed, ScriptRequest::Stop));
        assert_eq!(q.dequeue_or_close(&closed), Some(ScriptRequest::Stop));
        assert!(!closed.load(Ordering::Acquire));

        assert_eq!(q.dequeue_or_close(&closed), None);
        assert!(closed.load(Ordering::Acquire));
        assert!(!q.enqueue_unless_closed(&closed, ScriptRequest::Stop));
        assert!(!q.has_request());

        // Plain enqueue ignores the flag
        q.enqueue(ScriptRequest::Stop);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_shutdown_jumps_front() {
        let q = ScriptRequestQueue::new();
        q.enqueue(ScriptRequest::Stop);
        q.enqueue(ScriptRequest::Shutdown);
        assert_eq!(q.dequeue(), Some(ScriptRequest::Shutdown));
        assert_eq!(q.dequeue(), Some(ScriptRequest::Stop));
    }

    #[test]
    fn test_reruns_coalesce() {
        let q = ScriptRequestQueue::new();
        q.enqueue(ScriptRequest::Rerun(RerunData::default()));
        q.enqueue(ScriptRequest::Stop);
        q.enqueue(ScriptRequest::Rerun(RerunData::with_states(states(
            "slider:a",
            WidgetValue::Int(1),
        ))));
        q.enqueue(ScriptRequest::Rerun(RerunData::default()));
        q.enqueue(ScriptRequest::Rerun(RerunData::with_states(states(
            "slider:a",
            WidgetValue::Int(2),
        ))));

        assert_eq!(q.len(), 2);
        let Some(ScriptRequest::Rerun(data)) = q.dequeue() else {
            panic!("expected rerun first");
        };
        assert_eq!(
            data.widget_states.unwrap().get("slider:a"),
            Some(&WidgetValue::Int(2))
        );
        assert_eq!(q.dequeue(), Some(ScriptRequest::Stop));
    }

    #[test]
    fn test_rerun_without_state_keeps_queued_state() {
        let q = ScriptRequestQueue::new();
        let s = states("checkbox:c", WidgetValue::Bool(true));
        q.enqueue(ScriptRequest::Rerun(RerunData::with_states(s.clone())));
        q.enqueue(ScriptRequest::Rerun(RerunData::default()));
        assert_eq!(
            q.dequeue(),
            Some(ScriptRequest::Rerun(RerunData::with_states(s)))
        );
    }
}
