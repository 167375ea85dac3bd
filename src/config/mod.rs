//! Runtime configuration management for `reflux.toml`.
//!
//! # Module Structure
//!
//! ```text
//! config/
//! ├── section/       # Configuration section definitions
//! │   ├── cache      # [cache]
//! │   ├── client     # [client]
//! │   ├── runner     # [runner]
//! │   ├── server     # [server]
//! │   └── storage    # [storage]
//! ├── types/         # ConfigError and validation diagnostics
//! └── mod.rs         # Config (this file)
//! ```
//!
//! The config is loaded once in `main` and handed to every component as an
//! `Arc<Config>`. Nothing looks it up globally.

pub mod section;
pub mod types;
mod util;

use util::find_config_file;

pub use section::{CacheConfig, ClientConfig, RunnerConfig, ServerConfig, StorageConfig};
pub use types::{ConfigDiagnostics, ConfigError};

use crate::{
    cli::{Cli, Commands, ServeArgs},
    log,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

// ============================================================================
// root configuration
// ============================================================================

/// Root configuration structure representing reflux.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Absolute path to the config file (internal use only)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Project root directory - parent of config file, or cwd (internal use only)
    #[serde(skip)]
    pub root: PathBuf,

    /// Absolute path of the script being run (internal use only)
    #[serde(skip)]
    pub script: PathBuf,

    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from CLI arguments.
    ///
    /// Searches upward from cwd for the config file. A missing file is not an
    /// error: every section falls back to its defaults and the project root
    /// becomes the current directory.
    pub fn load(cli: &Cli) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current working directory")?;

        let mut config = match find_config_file(&cli.config) {
            Some(path) => {
                let mut config = Self::from_path(&path)?;
                config.root = path.parent().map(Path::to_path_buf).unwrap_or_default();
                config.config_path = path;
                config
            }
            None => Self {
                root: cwd.clone(),
                ..Self::default()
            },
        };

        config.script = absolutize(&cwd, cli.script());
        config.storage.dir = absolutize(&config.root, &config.storage.dir);
        config.apply_command_options(cli);
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from file path with unknown field detection.
    fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (config, ignored) = Self::parse_with_ignored(&content)?;
        if !ignored.is_empty() {
            Self::print_unknown_fields_warning(&ignored, path);
        }

        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })?;
        Ok((config, ignored))
    }

    fn print_unknown_fields_warning(fields: &[String], path: &Path) {
        let display_path = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| path.to_string_lossy());
        log!("warning"; "unknown fields in {}, ignoring:", display_path);
        for field in fields {
            eprintln!("- {}", field);
        }
    }

    /// Apply command-specific CLI overrides.
    fn apply_command_options(&mut self, cli: &Cli) {
        if let Commands::Serve { args, .. } = &cli.command {
            self.apply_serve_options(args);
        }
    }

    fn apply_serve_options(&mut self, args: &ServeArgs) {
        Self::update_option(&mut self.server.interface, args.interface.as_ref());
        Self::update_option(&mut self.server.port, args.port.as_ref());
        Self::update_option(&mut self.server.run_on_save, args.run_on_save.as_ref());
        Self::update_option(&mut self.server.live_save, args.live_save.as_ref());
    }

    /// Update config option if CLI value is provided.
    fn update_option<T: Clone>(config_option: &mut T, cli_option: Option<&T>) {
        if let Some(option) = cli_option {
            *config_option = option.clone();
        }
    }

    /// Validate every section, collecting all errors at once.
    pub fn validate(&self) -> Result<()> {
        let mut diag = ConfigDiagnostics::new();

        self.runner.validate(&mut diag);
        self.server.validate(&mut diag);

        if self.server.max_message_size < self.cache.min_cached_message_size {
            diag.error_with_hint(
                "server.max_message_size",
                format!(
                    "{} is smaller than cache.min_cached_message_size ({})",
                    self.server.max_message_size, self.cache.min_cached_message_size
                ),
                "raise max_message_size or lower min_cached_message_size",
            );
        }

        diag.into_result()
            .map_err(|e| ConfigError::Diagnostics(e).into())
    }

    /// Script path relative to the project root, for display.
    pub fn script_display(&self) -> String {
        self.script
            .strip_prefix(&self.root)
            .unwrap_or(&self.script)
            .display()
            .to_string()
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

// ============================================================================
// Test Helpers (available to all modules via `use crate::config::test_*`)
// ============================================================================

/// Parse config from TOML text.
/// Panics if there are unknown fields (to catch config typos in tests).
#[cfg(test)]
pub fn test_parse_config(content: &str) -> Config {
    let (parsed, ignored) = Config::parse_with_ignored(content).unwrap();
    assert!(
        ignored.is_empty(),
        "test config has unknown fields: {:?}",
        ignored
    );
    parsed
}

// ============================================================================
// tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_from_str_invalid_toml() {
        let result = Config::parse_with_ignored("[server\nport = 1");
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_unknown_fields_collected() {
        let (config, ignored) =
            Config::parse_with_ignored("[server]\nport = 9000\nwatch = true\n[extra]\nx = 1")
                .unwrap();
        assert_eq!(config.server.port, 9000);
        assert!(ignored.contains(&"server.watch".to_string()));
        assert!(ignored.contains(&"extra".to_string()));
    }

    #[test]
    fn test_cli_overrides_file_values() {
        let mut config = test_parse_config("[server]\nport = 9000\nrun_on_save = false");
        let cli = Cli::parse_from([
            "reflux",
            "serve",
            "app.lua",
            "--port",
            "9100",
            "--run-on-save",
        ]);
        config.apply_command_options(&cli);
        assert_eq!(config.server.port, 9100);
        assert!(config.server.run_on_save);
        assert!(!config.server.live_save);
    }

    #[test]
    fn test_validate_collects_errors() {
        let config = test_parse_config(
            "[runner]\ncheckpoint_interval = 0\n[server]\nmax_message_size = 10\n[cache]\nmin_cached_message_size = 100",
        );
        let err = config.validate().unwrap_err();
        let ConfigError::Diagnostics(diag) = err.downcast::<ConfigError>().unwrap() else {
            panic!("expected diagnostics");
        };
        assert_eq!(diag.errors().len(), 2);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_script_display_relative_to_root() {
        let config = Config {
            root: PathBuf::from("/proj"),
            script: PathBuf::from("/proj/apps/demo.lua"),
            ..Config::default()
        };
        assert_eq!(config.script_display(), "apps/demo.lua");
    }
}
