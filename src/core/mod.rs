//! Core types - pure abstractions shared across the codebase.

mod session_id;
mod state;

pub use session_id::{SessionId, SessionKey};
pub use state::{is_shutdown, register_shutdown_signal, setup_shutdown_handler};
