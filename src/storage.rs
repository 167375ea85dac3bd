//! Run snapshots for live saves and viewer-requested saves.
//!
//! A snapshot is a small set of named files: `manifest.json` describing the
//! run and `messages.json` holding every output message the run produced.
//! Saving is best-effort. Failures are logged and never reach the run loop.

use serde::Serialize;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::{debug, log, message::OutputMessage};

/// A file inside a run snapshot: `(name, contents)`.
pub type SnapshotFile = (String, Vec<u8>);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to write `{0}`")]
    Io(PathBuf, #[source] io::Error),

    #[error("failed to serialize run snapshot")]
    Serialize(#[from] serde_json::Error),

    #[error("`{0}` cannot be expressed as a file URL")]
    InvalidPath(PathBuf),
}

/// Storage backend for run snapshots.
pub trait Storage: Send + Sync {
    /// Store `files` under `run_id` and return a URL for the saved run.
    fn save_run(&self, run_id: &str, files: Vec<SnapshotFile>) -> Result<String, StorageError>;
}

/// Writes snapshots to `<dir>/<run_id>/`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Storage for FileStorage {
    fn save_run(&self, run_id: &str, files: Vec<SnapshotFile>) -> Result<String, StorageError> {
        let run_dir = self.dir.join(run_id);
        fs::create_dir_all(&run_dir).map_err(|e| StorageError::Io(run_dir.clone(), e))?;

        for (name, data) in files {
            let path = run_dir.join(&name);
            fs::write(&path, data).map_err(|e| StorageError::Io(path, e))?;
        }

        let run_dir = run_dir
            .canonicalize()
            .map_err(|e| StorageError::Io(run_dir.clone(), e))?;
        let url = Url::from_directory_path(&run_dir).map_err(|()| StorageError::InvalidPath(run_dir))?;
        Ok(url.to_string())
    }
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    run_id: &'a str,
    script_path: &'a str,
    message_count: usize,
    /// False for a snapshot taken while the run was still in progress.
    complete: bool,
}

/// A run captured for saving. Serialization is deferred to [`Self::files`].
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub run_id: String,
    pub script_path: String,
    pub messages: Vec<OutputMessage>,
    /// False for a snapshot taken while the run was still in progress.
    pub complete: bool,
}

impl RunSnapshot {
    /// Serialize into snapshot files.
    pub fn files(&self) -> Result<Vec<SnapshotFile>, StorageError> {
        let manifest = Manifest {
            run_id: &self.run_id,
            script_path: &self.script_path,
            message_count: self.messages.len(),
            complete: self.complete,
        };
        Ok(vec![
            ("manifest.json".to_string(), serde_json::to_vec_pretty(&manifest)?),
            ("messages.json".to_string(), serde_json::to_vec(&self.messages)?),
        ])
    }
}

/// Serialize and save on a detached thread. `on_saved` receives the URL on
/// success; failures are only logged.
pub fn save_in_background(
    storage: Arc<dyn Storage>,
    snapshot: RunSnapshot,
    on_saved: impl FnOnce(String) + Send + 'static,
) {
    let spawned = std::thread::Builder::new()
        .name(format!("save-{}", snapshot.run_id))
        .spawn(move || {
            let run_id = &snapshot.run_id;
            match snapshot.files().and_then(|files| storage.save_run(run_id, files)) {
                Ok(url) => {
                    debug!("save"; "saved {} to {}", run_id, url);
                    on_saved(url);
                }
                Err(e) => log!("warning"; "failed to save run {}: {}", run_id, e),
            }
        });

    if let Err(e) = spawned {
        log!("warning"; "failed to start save thread: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Container, Element};
    use crossbeam::channel;
    use std::time::Duration;
    use tempfile::TempDir;

    fn snapshot(run_id: &str, complete: bool) -> RunSnapshot {
        RunSnapshot {
            run_id: run_id.into(),
            script_path: "app.lua".into(),
            messages: vec![
                OutputMessage::delta(Element::Title { body: "t".into() }, Container::Main, 0),
                OutputMessage::delta(Element::Text { body: "x".into() }, Container::Main, 1),
            ],
            complete,
        }
    }

    #[test]
    fn test_snapshot_manifest() {
        let files = snapshot("abc-1", true).files().unwrap();
        let names: Vec<_> = files.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["manifest.json", "messages.json"]);

        let manifest: serde_json::Value = serde_json::from_slice(&files[0].1).unwrap();
        assert_eq!(manifest["run_id"], "abc-1");
        assert_eq!(manifest["message_count"], 2);
        assert_eq!(manifest["complete"], true);

        let saved: serde_json::Value = serde_json::from_slice(&files[1].1).unwrap();
        assert_eq!(saved[1]["payload"]["element"]["body"], "x");
    }

    #[test]
    fn test_file_storage_writes_run_dir() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        let files = snapshot("run-7", false).files().unwrap();

        let url = storage.save_run("run-7", files).unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("/run-7/"));
        assert!(dir.path().join("run-7/manifest.json").is_file());
        assert!(dir.path().join("run-7/messages.json").is_file());
    }

    #[test]
    fn test_file_storage_overwrites_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        storage
            .save_run("r", vec![("a.txt".into(), b"old".to_vec())])
            .unwrap();
        storage
            .save_run("r", vec![("a.txt".into(), b"new".to_vec())])
            .unwrap();
        assert_eq!(fs::read(dir.path().join("r/a.txt")).unwrap(), b"new");
    }

    #[test]
    fn test_save_in_background_reports_url() {
        let dir = TempDir::new().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()));
        let (tx, rx) = channel::bounded(1);

        save_in_background(storage, snapshot("bg", true), move |url| {
            let _ = tx.send(url);
        });

        let url = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(url.ends_with("/bg/"));
        let saved = fs::read(dir.path().join("bg/messages.json")).unwrap();
        let saved: serde_json::Value = serde_json::from_slice(&saved).unwrap();
        assert_eq!(saved[0]["payload"]["element"]["body"], "t");
    }
}
