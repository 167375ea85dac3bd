//! `[storage]` section configuration.
//!
//! ```toml
//! [storage]
//! dir = ".reflux/saves"   # Relative to the directory holding reflux.toml
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Run snapshot storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".reflux/saves"),
        }
    }
}
