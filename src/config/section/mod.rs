//! Configuration section definitions.
//!
//! Each module corresponds to a section in `reflux.toml`:
//!
//! | Module    | TOML Section | Purpose                                  |
//! |-----------|--------------|------------------------------------------|
//! | `cache`   | `[cache]`    | Output message cache expiry and sizing   |
//! | `client`  | `[client]`   | Viewer-facing output switches            |
//! | `runner`  | `[runner]`   | Script checkpoints                       |
//! | `server`  | `[server]`   | Viewer server, run-on-save, live saves   |
//! | `storage` | `[storage]`  | Where run snapshots are saved            |

mod cache;
mod client;
mod runner;
mod server;
mod storage;

pub use cache::CacheConfig;
pub use client::ClientConfig;
pub use runner::RunnerConfig;
pub use server::ServerConfig;
pub use storage::StorageConfig;
