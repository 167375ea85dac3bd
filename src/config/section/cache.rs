//! `[cache]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [cache]
//! max_cached_message_age = 2      # Runs a viewer may fall behind before resending
//! min_cached_message_size = 10240 # Smaller messages are always sent inline
//! ```

use serde::{Deserialize, Serialize};

/// Output message cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Run generations a session reference stays fresh.
    pub max_cached_message_age: u64,

    /// Minimum serialized size in bytes for a message to be cached.
    pub min_cached_message_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cached_message_age: 2,
            min_cached_message_size: 10 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;

    #[test]
    fn test_cache_config() {
        let config =
            test_parse_config("[cache]\nmax_cached_message_age = 5\nmin_cached_message_size = 1");
        assert_eq!(config.cache.max_cached_message_age, 5);
        assert_eq!(config.cache.min_cached_message_size, 1);
    }

    #[test]
    fn test_cache_config_defaults() {
        let config = test_parse_config("");
        assert_eq!(config.cache.max_cached_message_age, 2);
        assert_eq!(config.cache.min_cached_message_size, 10 * 1024);
    }
}
