//! Script execution controller.
//!
//! A [`ScriptRunner`] owns one worker thread that drains the session's
//! [`ScriptRequestQueue`] and runs the script once per `Rerun`.
//!
//! ```text
//! Session ──enqueue──▶ ScriptRequestQueue ──dequeue──▶ worker thread
//!    ▲                                                    │
//!    └──────────── on_event(RunnerEvent) ◀────────────────┘
//! ```
//!
//! Interruption is cooperative. While the script body executes, the worker
//! calls [`ScriptRunner::request_interrupt_check`] at checkpoints (every
//! `ui.*` call, and every `checkpoint_interval` VM instructions when the
//! tracer is installed). A pending `Stop` or `Rerun` unwinds the script
//! through the Lua error machinery; a `Rerun` then restarts the script on
//! the same worker without leaving the run.
//!
//! Events are delivered to exactly one subscriber, registered at
//! construction, always from the worker thread and never concurrently.

mod api;
mod engine;
mod event;
mod request;


pub use engine::check_script;
pub use event::{RunnerError, RunnerEvent, ScriptError, ScriptInterrupted};
pub use request::{RerunData, ScriptRequest, ScriptRequestQueue};

use event::ControlSignal;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use crate::{
    config::RunnerConfig, core::SessionId, debug, log, message::OutputMessage, source::ScriptSource,
    uploads::UploadedFileStore, widgets::WidgetStates,
};

/// Receives output produced by the script while it runs.
pub trait OutputSink: Send + Sync {
    fn enqueue(&self, msg: OutputMessage);
}

/// Single subscriber for runner events.
pub type EventHandler = Box<dyn FnMut(RunnerEvent) + Send>;

/// Everything a runner needs besides its request queue.
#[derive(Clone)]
pub struct RunnerContext {
    pub session_id: SessionId,
    pub source: Arc<dyn ScriptSource>,
    pub output: Arc<dyn OutputSink>,
    pub uploads: Arc<UploadedFileStore>,
    pub config: RunnerConfig,
}

/// State shared between the runner handle and its worker.
pub(crate) struct RunnerShared {
    session_id: SessionId,
    requests: Arc<ScriptRequestQueue>,
    /// Inside script body execution; gates interruption.
    execing: AtomicBool,
    shutdown_requested: AtomicBool,
    terminated: AtomicBool,
    worker: OnceLock<ThreadId>,
    /// Signal observed at a checkpoint, held until the script unwinds.
    pending: Mutex<Option<ControlSignal>>,
}

impl RunnerShared {
    fn is_worker_thread(&self) -> bool {
        self.worker.get() == Some(&thread::current().id())
    }

    /// Checkpoint: unwind if a stop or rerun is pending.
    ///
    /// Once a signal is taken from the queue it stays pending, and every
    /// later checkpoint raises again until the attempt ends.
    pub(crate) fn request_interrupt_check(&self) -> Result<(), ScriptInterrupted> {
        if !self.is_worker_thread() || !self.execing.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut pending = self.pending.lock();
        if pending.is_some() {
            return Err(ScriptInterrupted);
        }

        let signal = match self.requests.dequeue() {
            None => return Ok(()),
            Some(ScriptRequest::Stop) => ControlSignal::Stop,
            Some(ScriptRequest::Shutdown) => {
                self.shutdown_requested.store(true, Ordering::Release);
                ControlSignal::Stop
            }
            Some(ScriptRequest::Rerun(data)) => ControlSignal::Rerun(data),
        };

        debug!("runner"; "session {}: interrupting script ({:?})", self.session_id.short(), signal);
        *pending = Some(signal);
        Err(ScriptInterrupted)
    }

    /// Raise a signal from inside the script (`ui.stop`, `ui.rerun`).
    pub(crate) fn raise(&self, signal: ControlSignal) -> ScriptInterrupted {
        let mut pending = self.pending.lock();
        if pending.is_none() {
            *pending = Some(signal);
        }
        ScriptInterrupted
    }

    pub(crate) fn has_pending_signal(&self) -> bool {
        self.pending.lock().is_some()
    }
}

/// Per-session script execution controller.
pub struct ScriptRunner {
    shared: Arc<RunnerShared>,
    start: Option<(RunnerContext, WidgetStates, EventHandler)>,
    worker: Option<JoinHandle<()>>,
}

impl ScriptRunner {
    /// Create a runner. `on_event` is its only subscriber.
    pub fn new(
        ctx: RunnerContext,
        requests: Arc<ScriptRequestQueue>,
        widgets: WidgetStates,
        on_event: impl FnMut(RunnerEvent) + Send + 'static,
    ) -> Self {
        let shared = Arc::new(RunnerShared {
            session_id: ctx.session_id,
            requests,
            execing: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            worker: OnceLock::new(),
            pending: Mutex::new(None),
        });
        Self {
            shared,
            start: Some((ctx, widgets, Box::new(on_event))),
            worker: None,
        }
    }

    /// Spawn the worker thread. Fails if called twice.
    pub fn start(&mut self) -> Result<(), RunnerError> {
        let (ctx, widgets, handler) = self.start.take().ok_or(RunnerError::AlreadyStarted)?;
        let shared = Arc::clone(&self.shared);

        let handle = thread::Builder::new()
            .name(format!("script-{}", ctx.session_id.short()))
            .spawn(move || {
                let _ = shared.worker.set(thread::current().id());
                let mut worker = Worker {
                    shared,
                    ctx,
                    widgets,
                    handler,
                };
                worker.run();
            })
            .map_err(RunnerError::Spawn)?;

        self.worker = Some(handle);
        Ok(())
    }

    /// Add a control request for the worker.
    pub fn enqueue(&self, request: ScriptRequest) -> Result<(), RunnerError> {
        if self
            .shared
            .requests
            .enqueue_unless_closed(&self.shared.terminated, request)
        {
            Ok(())
        } else {
            log!("runner"; "session {}: request after termination", self.shared.session_id.short());
            Err(RunnerError::Terminated)
        }
    }

    /// Checkpoint hook for the host. Only acts on the worker thread while
    /// the script body is executing.
    pub fn request_interrupt_check(&self) -> Result<(), ScriptInterrupted> {
        self.shared.request_interrupt_check()
    }

    /// True once the request loop has exited. `ShutdownComplete` follows.
    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::Acquire)
    }

    /// Block until the worker exits. Must not be called from the worker.
    pub fn join(&mut self) {
        if let Some(handle) = self.worker.take()
            && handle.thread().id() != thread::current().id()
        {
            let _ = handle.join();
        }
    }
}

/// The worker side: owns the widget state and the event handler.
struct Worker {
    shared: Arc<RunnerShared>,
    ctx: RunnerContext,
    widgets: WidgetStates,
    handler: EventHandler,
}

impl Worker {
    fn run(&mut self) {
        debug!("runner"; "session {}: script thread started", self.ctx.session_id.short());

        loop {
            if self.shared.shutdown_requested.load(Ordering::Acquire) {
                self.shared.requests.close(&self.shared.terminated);
                break;
            }
            let next = self.shared.requests.dequeue_or_close(&self.shared.terminated);
            let Some(request) = next else {
                break;
            };
            match request {
                ScriptRequest::Stop => {
                    debug!("runner"; "ignoring stop while not running");
                }
                ScriptRequest::Shutdown => {
                    debug!("runner"; "session {}: shutting down", self.ctx.session_id.short());
                    self.shared.shutdown_requested.store(true, Ordering::Release);
                }
                ScriptRequest::Rerun(data) => self.run_script(data),
            }
        }

        let final_state = self.widgets.clone();
        (self.handler)(RunnerEvent::ShutdownComplete(final_state));
    }

    /// One `Rerun`: keeps restarting while the script is interrupted by
    /// another rerun.
    fn run_script(&mut self, data: RerunData) {
        let mut data = data;
        loop {
            *self.shared.pending.lock() = None;
            (self.handler)(RunnerEvent::Started);

            let lua = mlua::Lua::new();
            let func = match engine::load(&lua, self.ctx.source.as_ref()) {
                Ok(func) => func,
                Err(err) => {
                    debug!("runner"; "compile error: {}", err);
                    (self.handler)(RunnerEvent::StoppedWithCompileError(err));
                    return;
                }
            };

            if let Some(states) = data.widget_states.take() {
                self.widgets = states;
            }

            let widgets = std::mem::take(&mut self.widgets);
            let (outcome, widgets) = engine::execute(lua, func, &self.shared, &self.ctx, widgets);
            self.widgets = widgets;
            self.widgets.reset_triggers();

            (self.handler)(RunnerEvent::StoppedWithSuccess);

            match outcome {
                engine::Outcome::Rerun(next) => data = next,
                engine::Outcome::Completed | engine::Outcome::Stopped | engine::Outcome::Failed => {
                    return;
                }
            }
        }
    }
}
