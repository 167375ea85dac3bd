//! Shared configuration types.

mod error;

pub use error::{ConfigDiagnostics, ConfigError};
