//! Session coordinator.
//!
//! One [`Session`] per connected viewer. It owns the viewer-visible state
//! (run state, baseline widget state, run-on-save), the outbound queue, and
//! at most one live [`ScriptRunner`].
//!
//! ```text
//! viewer ──request_rerun/stop──▶ Session ──enqueue──▶ ScriptRequestQueue
//!                                   ▲                        │
//!                                   │ RunnerEvent            ▼
//!                                   └─────────────── ScriptRunner (worker)
//! delivery ◀──flush_outbound_queue── Session ◀──output── script `ui.*` calls
//! ```
//!
//! A runner's worker exits as soon as the request queue is empty, so the
//! session creates runners on demand: when a request arrives and none is
//! live, and again on `ShutdownComplete` if requests were queued while the
//! old worker was winding down.
//!
//! Runner events arrive on the worker thread. Every public method and the
//! event handler serialize on the session lock, which is never held while
//! waiting on the worker.

mod queue;


pub use queue::OutboundQueue;

use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::{
    cache::MessageCache,
    config::Config,
    core::{SessionId, SessionKey},
    debug, debug_do, log,
    message::{Container, Element, OutputMessage, Payload, RunStatus, SessionEvent},
    runner::{
        OutputSink, RerunData, RunnerContext, RunnerEvent, ScriptRequest, ScriptRequestQueue,
        ScriptRunner,
    },
    source::ScriptSource,
    storage::{self, RunSnapshot, Storage},
    uploads::{UploadedFile, UploadedFileStore},
    widgets::WidgetStates,
};

/// Process-wide collaborators handed to every session.
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<Config>,
    pub cache: Arc<MessageCache>,
    pub uploads: Arc<UploadedFileStore>,
    pub storage: Arc<dyn Storage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotRunning,
    Running,
    ShutdownRequested,
}

struct SessionInner {
    state: SessionState,
    /// Widget state the next runner starts from.
    widget_states: WidgetStates,
    runner: Option<ScriptRunner>,
    run_on_save: bool,
    /// Set by a preheat run: the widget state it ran with.
    preheated: Option<WidgetStates>,
    sent_initialize: bool,
    run_id: u64,
    queue: OutboundQueue,
}

pub struct Session {
    id: SessionId,
    key: Arc<SessionKey>,
    ctx: SessionContext,
    source: Arc<dyn ScriptSource>,
    requests: Arc<ScriptRequestQueue>,
    inner: Mutex<SessionInner>,
    /// Signalled after every runner event.
    idle: Condvar,
    this: Weak<Session>,
}

impl Session {
    pub fn new(ctx: SessionContext, source: Arc<dyn ScriptSource>) -> Arc<Self> {
        let id = SessionId::new();
        let run_on_save = ctx.config.server.run_on_save;
        debug!("session"; "created {}", id.short());

        Arc::new_cyclic(|this| Self {
            id,
            key: SessionKey::new(id),
            ctx,
            source,
            requests: Arc::new(ScriptRequestQueue::new()),
            inner: Mutex::new(SessionInner {
                state: SessionState::NotRunning,
                widget_states: WidgetStates::new(),
                runner: None,
                run_on_save,
                preheated: None,
                sent_initialize: false,
                run_id: 0,
                queue: OutboundQueue::new(),
            }),
            idle: Condvar::new(),
            this: this.clone(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Liveness token used for cache references.
    pub fn key(&self) -> &Arc<SessionKey> {
        &self.key
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn run_on_save(&self) -> bool {
        self.inner.lock().run_on_save
    }

    /// Baseline widget state left by the last runner.
    pub fn widget_states(&self) -> WidgetStates {
        self.inner.lock().widget_states.clone()
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Rerun with `widgets`, or with the baseline state when `None`.
    pub fn request_rerun(&self, widgets: Option<WidgetStates>) {
        self.enqueue_request(ScriptRequest::Rerun(RerunData {
            widget_states: widgets,
        }));
    }

    /// A rerun request as sent by a viewer.
    ///
    /// A preheat run executes immediately and marks the session so that the
    /// first real request is skipped when it would repeat the preheat run.
    pub fn handle_rerun_request(&self, widgets: Option<WidgetStates>, is_preheat: bool) {
        {
            let mut inner = self.inner.lock();
            if is_preheat {
                let used = widgets.clone().unwrap_or_else(|| inner.widget_states.clone());
                inner.preheated = Some(used);
            } else if let Some(used) = inner.preheated.take() {
                let repeats = match &widgets {
                    None => true,
                    Some(w) => w.is_empty() || *w == used,
                };
                if repeats {
                    debug!("session"; "{}: reusing preheated run", self.id.short());
                    return;
                }
            }
        }
        self.request_rerun(widgets);
    }

    pub fn request_stop(&self) {
        self.enqueue_request(ScriptRequest::Stop);
    }

    /// Shut the session down. Later calls are no-ops.
    ///
    /// Returns immediately; the runner, if any, finishes its current
    /// attempt and emits `ShutdownComplete` on its own.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::ShutdownRequested {
            return;
        }
        debug!("session"; "{}: shutting down", self.id.short());
        self.ctx.uploads.remove_session(self.id);

        if inner.runner.is_some() {
            self.requests.enqueue(ScriptRequest::Shutdown);
        }
        inner.state = SessionState::ShutdownRequested;
        self.idle.notify_all();
    }

    fn enqueue_request(&self, request: ScriptRequest) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::ShutdownRequested {
            log!("warning"; "session {}: discarding {:?} request after shutdown", self.id.short(), request);
            return;
        }
        self.requests.enqueue(request);
        self.maybe_create_runner(&mut inner);
    }

    /// Start a runner if requests are waiting and none is live.
    fn maybe_create_runner(&self, inner: &mut SessionInner) {
        if inner.state == SessionState::ShutdownRequested
            || inner.runner.is_some()
            || !self.requests.has_request()
        {
            return;
        }

        let ctx = RunnerContext {
            session_id: self.id,
            source: Arc::clone(&self.source),
            output: Arc::new(SessionSink(self.this.clone())),
            uploads: Arc::clone(&self.ctx.uploads),
            config: self.ctx.config.runner.clone(),
        };
        let this = self.this.clone();
        let mut runner = ScriptRunner::new(
            ctx,
            Arc::clone(&self.requests),
            inner.widget_states.clone(),
            move |event| {
                if let Some(session) = this.upgrade() {
                    session.on_runner_event(event);
                }
            },
        );

        match runner.start() {
            Ok(()) => inner.runner = Some(runner),
            Err(e) => log!("error"; "session {}: {}", self.id.short(), e),
        }
    }

    // ------------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------------

    /// Append to the outbound queue. Dropped when display is disabled.
    pub fn enqueue_output(&self, msg: OutputMessage) {
        let mut inner = self.inner.lock();
        self.push(&mut inner, msg);
    }

    /// Drain the outbound queue for delivery.
    pub fn flush_outbound_queue(&self) -> Vec<OutputMessage> {
        self.inner.lock().queue.flush()
    }

    fn push(&self, inner: &mut SessionInner, msg: OutputMessage) {
        if !self.ctx.config.client.display_enabled {
            return;
        }
        inner.queue.enqueue(msg);
    }

    fn push_state_changed(&self, inner: &mut SessionInner) {
        let msg = OutputMessage::new(Payload::SessionStateChanged {
            run_on_save: inner.run_on_save,
            is_running: inner.state == SessionState::Running,
        });
        self.push(inner, msg);
    }

    /// Show an error raised outside a run (e.g. a rejected upload).
    ///
    /// Replays a stop/start/stop cycle so the viewer clears the page and
    /// shows the run as finished, then draws the error.
    pub fn enqueue_exception(&self, kind: &str, message: impl Into<String>) {
        self.on_runner_event(RunnerEvent::StoppedWithSuccess);
        self.on_runner_event(RunnerEvent::Started);
        self.on_runner_event(RunnerEvent::StoppedWithSuccess);
        self.enqueue_output(OutputMessage::delta(
            Element::exception(kind, message),
            Container::Main,
            0,
        ));
    }

    // ------------------------------------------------------------------------
    // Viewer settings
    // ------------------------------------------------------------------------

    pub fn set_run_on_save(&self, value: bool) {
        let mut inner = self.inner.lock();
        inner.run_on_save = value;
        self.push_state_changed(&mut inner);
    }

    /// Clear the process-wide message cache, for every session.
    pub fn clear_cache(&self) {
        self.ctx.cache.clear();
        log!("session"; "{}: cleared message cache", self.id.short());
    }

    /// Store an upload for `widget_id` and rerun with the current widget state.
    pub fn add_upload(&self, widget_id: &str, file: UploadedFile) {
        debug!("session"; "{}: upload for {} ({} bytes)", self.id.short(), widget_id, file.data.len());
        self.ctx.uploads.insert(self.id, widget_id, file);
        self.request_rerun(None);
    }

    /// The script file changed on disk.
    pub fn on_script_changed(&self) {
        if self.run_on_save() {
            self.request_rerun(None);
        } else {
            self.enqueue_output(OutputMessage::new(Payload::SessionEvent {
                event: SessionEvent::ScriptChangedOnDisk,
            }));
        }
    }

    /// Save the latest run and report the URL to the viewer.
    pub fn request_save(&self) {
        let inner = self.inner.lock();
        let Some(snapshot) = self.snapshot(&inner, true) else {
            return;
        };
        let this = self.this.clone();
        storage::save_in_background(Arc::clone(&self.ctx.storage), snapshot, move |url| {
            if let Some(session) = this.upgrade() {
                session.enqueue_output(OutputMessage::new(Payload::SaveComplete { url }));
            }
        });
    }

    /// Block until no runner is live, or `timeout` passes. Returns true
    /// when idle.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.runner.is_some() {
            if self.idle.wait_until(&mut inner, deadline).timed_out() {
                return inner.runner.is_none();
            }
        }
        true
    }

    // ------------------------------------------------------------------------
    // Runner events
    // ------------------------------------------------------------------------

    fn on_runner_event(&self, event: RunnerEvent) {
        let mut inner = self.inner.lock();
        let was_running = inner.state == SessionState::Running;
        debug!("session"; "{}: {:?}", self.id.short(), event);

        match event {
            RunnerEvent::Started => {
                if inner.state != SessionState::ShutdownRequested {
                    inner.state = SessionState::Running;
                }
                inner.run_id += 1;
                inner.queue.start_run();
                self.maybe_push_initialize(&mut inner);

                let msg = OutputMessage::new(Payload::NewRun {
                    run_id: inner.run_id,
                    script_path: self.source.path().display().to_string(),
                });
                self.push(&mut inner, msg);

                if self.ctx.config.server.live_save {
                    self.live_save(&inner, false);
                }
            }

            RunnerEvent::StoppedWithSuccess | RunnerEvent::StoppedWithCompileError(_) => {
                if inner.state != SessionState::ShutdownRequested {
                    inner.state = SessionState::NotRunning;
                }

                let (status, error) = match event {
                    RunnerEvent::StoppedWithCompileError(err) => (RunStatus::CompileError, Some(err)),
                    _ => (RunStatus::Success, None),
                };
                self.push(&mut inner, OutputMessage::new(Payload::RunFinished { status }));

                if let Some(err) = error {
                    log!("error"; "{}", err);
                    let msg = OutputMessage::new(Payload::SessionEvent {
                        event: SessionEvent::CompileError {
                            message: err.to_string(),
                        },
                    });
                    self.push(&mut inner, msg);
                }
            }

            RunnerEvent::ShutdownComplete(final_state) => {
                debug_do! {
                    let ids: Vec<_> = final_state.iter().map(|(id, _)| id.as_str()).collect();
                    debug!("session"; "{}: baseline widgets {:?}", self.id.short(), ids);
                }
                inner.widget_states = final_state;
                inner.runner = None;

                if self.ctx.config.server.live_save {
                    self.live_save(&inner, true);
                }
                self.maybe_create_runner(&mut inner);
            }
        }

        if was_running != (inner.state == SessionState::Running) {
            self.push_state_changed(&mut inner);
        }
        self.idle.notify_all();
    }

    fn maybe_push_initialize(&self, inner: &mut SessionInner) {
        if inner.sent_initialize {
            return;
        }
        inner.sent_initialize = true;
        let msg = OutputMessage::new(Payload::Initialize {
            session_id: self.id,
            max_cached_message_age: self.ctx.cache.max_age(),
            run_on_save: inner.run_on_save,
            is_running: inner.state == SessionState::Running,
        });
        self.push(inner, msg);
    }

    // ------------------------------------------------------------------------
    // Saves
    // ------------------------------------------------------------------------

    /// The current run's log, or `None` before the first run.
    fn snapshot(&self, inner: &SessionInner, complete: bool) -> Option<RunSnapshot> {
        if inner.run_id == 0 {
            return None;
        }
        Some(RunSnapshot {
            run_id: format!("{}-{}", self.id.short(), inner.run_id),
            script_path: self.source.path().display().to_string(),
            messages: inner.queue.run_log().to_vec(),
            complete,
        })
    }

    fn live_save(&self, inner: &SessionInner, complete: bool) {
        let Some(snapshot) = self.snapshot(inner, complete) else {
            return;
        };
        let label = if complete { "final" } else { "running" };
        storage::save_in_background(Arc::clone(&self.ctx.storage), snapshot, move |url| {
            log!("save"; "saved {} run: {}", label, url);
        });
    }
}

/// Routes script output into the owning session's queue.
struct SessionSink(Weak<Session>);

impl OutputSink for SessionSink {
    fn enqueue(&self, msg: OutputMessage) {
        if let Some(session) = self.0.upgrade() {
            session.enqueue_output(msg);
        }
    }
}
