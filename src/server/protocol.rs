//! Viewer → server messages.
//!
//! ```json
//! {"type": "rerun", "widgets": {"slider:size": 3.0}}
//! {"type": "set_run_on_save", "value": true}
//! ```

use serde::Deserialize;
use thiserror::Error;

use crate::{session::Session, widgets::WidgetStates};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed viewer message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported {0} frame")]
    UnsupportedFrame(&'static str),
}

/// A request sent by a viewer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackMsg {
    Rerun {
        #[serde(default)]
        widgets: Option<WidgetStates>,
    },
    Stop,
    SetRunOnSave {
        value: bool,
    },
    ClearCache,
    Save,
}

impl BackMsg {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Apply this request to `session`.
    pub fn dispatch(self, session: &Session) {
        match self {
            Self::Rerun { widgets } => session.handle_rerun_request(widgets, false),
            Self::Stop => session.request_stop(),
            Self::SetRunOnSave { value } => session.set_run_on_save(value),
            Self::ClearCache => session.clear_cache(),
            Self::Save => session.request_save(),
        }
    }
}
