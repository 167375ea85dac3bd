//! Outbound message queue.
//!
//! Holds the messages a viewer has not received yet. Element deltas are
//! composed: a delta for a `(container, delta_id)` slot that is still
//! queued replaces the queued one in place, so a viewer that polls slowly
//! only sees the latest state of each slot.

use rustc_hash::FxHashMap;

use crate::message::{Container, OutputMessage};

#[derive(Debug, Default)]
pub struct OutboundQueue {
    queue: Vec<OutputMessage>,
    /// Queue position of each pending delta slot.
    slots: FxHashMap<(Container, usize), usize>,
    /// Every message since the current run started, for snapshots.
    run_log: Vec<OutputMessage>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, msg: OutputMessage) {
        self.run_log.push(msg.clone());

        let Some(meta) = msg.metadata else {
            self.queue.push(msg);
            return;
        };

        let slot = (meta.container, meta.delta_id);
        match self.slots.get(&slot) {
            Some(&index) => self.queue[index] = msg,
            None => {
                self.slots.insert(slot, self.queue.len());
                self.queue.push(msg);
            }
        }
    }

    /// Drop undelivered messages. The run log is kept.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.slots.clear();
    }

    /// Drain everything queued, in order.
    pub fn flush(&mut self) -> Vec<OutputMessage> {
        self.slots.clear();
        std::mem::take(&mut self.queue)
    }

    /// Start a new run: clears both the queue and the run log.
    pub fn start_run(&mut self) {
        self.clear();
        self.run_log.clear();
    }

    pub fn run_log(&self) -> &[OutputMessage] {
        &self.run_log
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Element, Payload, RunStatus};

    fn text(body: &str, container: Container, delta_id: usize) -> OutputMessage {
        OutputMessage::delta(Element::Text { body: body.into() }, container, delta_id)
    }

    fn finished() -> OutputMessage {
        OutputMessage::new(Payload::RunFinished {
            status: RunStatus::Success,
        })
    }

    #[test]
    fn test_same_slot_replaces_in_place() {
        let mut q = OutboundQueue::new();
        q.enqueue(text("a", Container::Main, 0));
        q.enqueue(text("b", Container::Main, 1));
        q.enqueue(text("a2", Container::Main, 0));

        let out = q.flush();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], text("a2", Container::Main, 0));
        assert_eq!(out[1], text("b", Container::Main, 1));
    }

    #[test]
    fn test_containers_are_separate_slots() {
        let mut q = OutboundQueue::new();
        q.enqueue(text("main", Container::Main, 0));
        q.enqueue(text("side", Container::Sidebar, 0));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_markers_always_append() {
        let mut q = OutboundQueue::new();
        q.enqueue(finished());
        q.enqueue(finished());
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_flush_resets_slots() {
        let mut q = OutboundQueue::new();
        q.enqueue(text("a", Container::Main, 0));
        assert_eq!(q.flush().len(), 1);
        assert!(q.is_empty());

        q.enqueue(text("b", Container::Main, 0));
        q.enqueue(finished());
        let out = q.flush();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], text("b", Container::Main, 0));
    }

    #[test]
    fn test_run_log_survives_flush_not_start_run() {
        let mut q = OutboundQueue::new();
        q.enqueue(text("a", Container::Main, 0));
        q.enqueue(text("a2", Container::Main, 0));
        q.flush();
        assert_eq!(q.run_log().len(), 2);

        q.clear();
        assert_eq!(q.run_log().len(), 2);

        q.start_run();
        assert!(q.run_log().is_empty());
    }
}
