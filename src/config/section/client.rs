//! `[client]` section configuration.
//!
//! ```toml
//! [client]
//! display_enabled = true   # false drops all script output (markers still flow)
//! ```

use serde::{Deserialize, Serialize};

/// Viewer output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub display_enabled: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            display_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;

    #[test]
    fn test_client_config() {
        assert!(test_parse_config("").client.display_enabled);
        let config = test_parse_config("[client]\ndisplay_enabled = false");
        assert!(!config.client.display_enabled);
    }
}
