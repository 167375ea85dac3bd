//! Uploaded files, keyed by session and widget.
//!
//! Files arrive over the HTTP side channel and are read by `ui.file_uploader`
//! on the session's next run. One process-wide store is created at startup
//! and handed to every session; a session's files are dropped when it ends.

use dashmap::DashMap;
use std::sync::Arc;

use crate::core::SessionId;

/// A single uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct UploadedFileStore {
    files: DashMap<(SessionId, String), Arc<UploadedFile>>,
}

impl UploadedFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `file` for `widget_id`, replacing any earlier upload.
    pub fn insert(&self, session: SessionId, widget_id: &str, file: UploadedFile) {
        self.files
            .insert((session, widget_id.to_string()), Arc::new(file));
    }

    pub fn get(&self, session: SessionId, widget_id: &str) -> Option<Arc<UploadedFile>> {
        self.files
            .get(&(session, widget_id.to_string()))
            .map(|f| Arc::clone(&f))
    }

    pub fn remove_session(&self, session: SessionId) {
        self.files.retain(|(id, _), _| *id != session);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}
