//! Viewer-visible output messages.
//!
//! An [`OutputMessage`] is an immutable payload plus a metadata block. The
//! content hash covers the payload only, so the same element drawn at a
//! different position hashes identically and can be served from the cache.
//!
//! # Wire format
//!
//! ```json
//! {"payload": {"type": "delta", "element": {"kind": "text", "body": "hi"}},
//!  "metadata": {"container": "main", "delta_id": 0}}
//! ```

mod element;
mod hash;

pub use element::{Container, Element, WidgetSpec};
pub use hash::ContentHash;

use serde::Serialize;
use std::sync::OnceLock;

use crate::core::SessionId;

/// Position of an element delta inside the viewer's page. Excluded from the hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub container: Container,
    pub delta_id: usize,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    CompileError,
}

/// Out-of-band session notices.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The script failed to compile. The previous output stays on screen.
    CompileError { message: String },
    /// The script changed on disk and run-on-save is off.
    ScriptChangedOnDisk,
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// First message a viewer sees; sent once per session.
    Initialize {
        session_id: SessionId,
        max_cached_message_age: u64,
        run_on_save: bool,
        is_running: bool,
    },
    NewRun {
        run_id: u64,
        script_path: String,
    },
    RunFinished {
        status: RunStatus,
    },
    SessionStateChanged {
        run_on_save: bool,
        is_running: bool,
    },
    SessionEvent {
        event: SessionEvent,
    },
    Delta {
        element: Element,
    },
    /// Stand-in for a message the viewer already holds.
    Ref {
        hash: ContentHash,
    },
    SaveComplete {
        url: String,
    },
}

/// A unit of viewer-visible output.
#[derive(Debug, Clone, Serialize)]
pub struct OutputMessage {
    pub payload: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(skip)]
    hash: OnceLock<ContentHash>,
}

impl OutputMessage {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            metadata: None,
            hash: OnceLock::new(),
        }
    }

    /// An element delta at `(container, delta_id)`.
    pub fn delta(element: Element, container: Container, delta_id: usize) -> Self {
        Self {
            payload: Payload::Delta { element },
            metadata: Some(Metadata {
                container,
                delta_id,
            }),
            hash: OnceLock::new(),
        }
    }

    /// Content hash of the payload, computed on first use.
    pub fn hash(&self) -> ContentHash {
        *self.hash.get_or_init(|| ContentHash::of_json(&self.payload))
    }

    /// A reference to this message carrying the same metadata.
    pub fn create_reference(&self) -> Self {
        Self {
            payload: Payload::Ref { hash: self.hash() },
            metadata: self.metadata,
            hash: OnceLock::new(),
        }
    }

    /// Whether a message of `encoded_len` bytes may be stored in the cache.
    ///
    /// `Initialize` carries per-session data and references are already
    /// minimal, so neither is ever cached.
    pub fn is_cacheable(&self, encoded_len: usize, min_size: usize) -> bool {
        !matches!(
            self.payload,
            Payload::Initialize { .. } | Payload::Ref { .. }
        ) && encoded_len >= min_size
    }

    pub fn element(&self) -> Option<&Element> {
        match &self.payload {
            Payload::Delta { element } => Some(element),
            _ => None,
        }
    }
}

impl PartialEq for OutputMessage {
    fn eq(&self, other: &Self) -> bool {
        self.payload == other.payload && self.metadata == other.metadata
    }
}
