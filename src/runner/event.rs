//! Runner lifecycle events and error types.

use std::path::PathBuf;
use thiserror::Error;

use super::request::RerunData;
use crate::{message::Element, source::SourceError, widgets::WidgetStates};

/// Lifecycle events, delivered to the runner's single subscriber.
#[derive(Debug)]
pub enum RunnerEvent {
    Started,
    StoppedWithSuccess,
    StoppedWithCompileError(ScriptError),
    /// Always the last event of a runner, carrying its final widget state.
    ShutdownComplete(WidgetStates),
}

/// Failures attributable to the user's script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("{0}")]
    Source(#[from] SourceError),

    #[error("syntax error in `{}`: {message}", .path.display())]
    Compile { path: PathBuf, message: String },

    #[error("{message}")]
    Runtime { kind: &'static str, message: String },

    #[error("duplicate widget id `{0}`: give each widget a unique label")]
    DuplicateWidgetId(String),
}

impl ScriptError {
    /// Classify a failure raised while the script body ran.
    pub(crate) fn from_lua(err: &mlua::Error) -> Self {
        if let Some(ScriptError::DuplicateWidgetId(id)) = find_script_error(err) {
            return Self::DuplicateWidgetId(id.clone());
        }
        let kind = match err {
            mlua::Error::MemoryError(_) => "MemoryError",
            mlua::Error::SyntaxError { .. } => "SyntaxError",
            _ => "RuntimeError",
        };
        Self::Runtime {
            kind,
            message: err.to_string(),
        }
    }

    /// The element shown in place of the output the run would have produced.
    pub fn to_element(&self) -> Element {
        let kind = match self {
            Self::Source(_) => "SourceError",
            Self::Compile { .. } => "SyntaxError",
            Self::Runtime { kind, .. } => *kind,
            Self::DuplicateWidgetId(_) => "DuplicateWidgetId",
        };
        Element::exception(kind, self.to_string())
    }
}

fn find_script_error(err: &mlua::Error) -> Option<&ScriptError> {
    match err {
        mlua::Error::CallbackError { cause, .. } => find_script_error(cause),
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<ScriptError>(),
        _ => None,
    }
}

/// Misuse of the runner API.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("script runner was already started")]
    AlreadyStarted,

    #[error("script runner has shut down and accepts no more requests")]
    Terminated,

    #[error("failed to spawn script thread")]
    Spawn(#[source] std::io::Error),
}

/// Raised through the Lua VM to unwind the script at a checkpoint.
///
/// Carries no data: the signal itself waits in the runner so that a script
/// catching this error with `pcall` cannot discard it.
#[derive(Debug, Clone, Copy, Error)]
#[error("script interrupted")]
pub struct ScriptInterrupted;

/// What an interrupted attempt should do next.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ControlSignal {
    Stop,
    Rerun(RerunData),
}
