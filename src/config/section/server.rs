//! `[server]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [server]
//! interface = "127.0.0.1"         # Network interface (127.0.0.1 = localhost only)
//! port = 8501                     # Viewer port (HTTP side channel uses port + 1)
//! run_on_save = false             # Rerun automatically when the script changes
//! live_save = false               # Snapshot every run to [storage].dir
//! max_message_size = 52428800     # Larger messages are replaced by an error
//! ```

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use crate::config::ConfigDiagnostics;

/// Viewer server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Network interface to bind.
    pub interface: IpAddr,

    /// WebSocket port for viewers.
    pub port: u16,

    /// Rerun the script when its file changes on disk.
    pub run_on_save: bool,

    /// Save a snapshot of each run in the background.
    pub live_save: bool,

    /// Maximum size in bytes of a single outgoing message.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            interface: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 8501,
            run_on_save: false,
            live_save: false,
            max_message_size: 50 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self, diag: &mut ConfigDiagnostics) {
        if self.port == 0 {
            diag.error("server.port", "must be greater than 0");
        }
    }
}
