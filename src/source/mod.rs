//! Script source provider.
//!
//! The runner never touches the filesystem directly: it asks a
//! [`ScriptSource`] for the current text at the start of every attempt, so
//! an edited script is picked up by the next rerun.

mod watcher;

pub use watcher::ScriptWatcher;

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Script loading failures.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("script `{}` not found", .0.display())]
    NotFound(PathBuf),

    #[error("script `{}` could not be read", .0.display())]
    Unreadable(PathBuf, #[source] io::Error),
}

/// Supplies script text by path.
pub trait ScriptSource: Send + Sync {
    /// Path used to name the chunk in error messages.
    fn path(&self) -> &Path;

    /// Current script text.
    fn load(&self) -> Result<String, SourceError>;
}

/// Reads the script from disk on every load.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ScriptSource for FileSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<String, SourceError> {
        std::fs::read_to_string(&self.path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => SourceError::NotFound(self.path.clone()),
            _ => SourceError::Unreadable(self.path.clone(), err),
        })
    }
}

/// In-memory source whose text tests can swap between runs.
#[cfg(test)]
pub struct MemorySource {
    path: PathBuf,
    text: parking_lot::Mutex<String>,
}

#[cfg(test)]
impl MemorySource {
    pub fn new(text: &str) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            path: PathBuf::from("test.lua"),
            text: parking_lot::Mutex::new(text.to_string()),
        })
    }

    pub fn set(&self, text: &str) {
        *self.text.lock() = text.to_string();
    }
}

#[cfg(test)]
impl ScriptSource for MemorySource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<String, SourceError> {
        Ok(self.text.lock().clone())
    }
}
