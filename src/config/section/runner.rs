//! `[runner]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [runner]
//! install_tracer = true       # Check for stop/rerun every N VM instructions
//! checkpoint_interval = 1000  # N
//! ```
//!
//! With `install_tracer = false` a script can only be interrupted inside
//! `ui.*` calls, so a tight loop without output runs until it finishes.

use serde::{Deserialize, Serialize};

use crate::config::ConfigDiagnostics;

/// Script runner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Install the instruction-count checkpoint hook.
    pub install_tracer: bool,

    /// VM instructions between two checkpoints.
    pub checkpoint_interval: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            install_tracer: true,
            checkpoint_interval: 1000,
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self, diag: &mut ConfigDiagnostics) {
        if self.checkpoint_interval == 0 {
            diag.error_with_hint(
                "runner.checkpoint_interval",
                "must be greater than 0",
                "set `install_tracer = false` to disable instruction checkpoints",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{ConfigDiagnostics, test_parse_config};

    #[test]
    fn test_runner_config() {
        let config = test_parse_config("[runner]\ninstall_tracer = false\ncheckpoint_interval = 50");
        assert!(!config.runner.install_tracer);
        assert_eq!(config.runner.checkpoint_interval, 50);
    }

    #[test]
    fn test_runner_config_defaults() {
        let config = test_parse_config("");
        assert!(config.runner.install_tracer);
        assert_eq!(config.runner.checkpoint_interval, 1000);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = test_parse_config("[runner]\ncheckpoint_interval = 0");
        let mut diag = ConfigDiagnostics::new();
        config.runner.validate(&mut diag);
        assert!(!diag.is_empty());
    }
}
