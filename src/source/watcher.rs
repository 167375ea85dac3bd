//! Script file watcher for run-on-save.
//!
//! ```text
//! notify → Debouncer (pure timing) → on_change()
//! ```
//!
//! The parent directory is watched rather than the file itself: editors
//! often save by writing a temp file and renaming it over the original,
//! which would detach a watch placed on the file.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::{debug, log};

const DEBOUNCE_MS: u64 = 300;

/// Pure debouncer: coalesces a burst of events for one file into one change.
struct Debouncer {
    target: PathBuf,
    last_event: Option<Instant>,
}

impl Debouncer {
    fn new(target: PathBuf) -> Self {
        Self {
            target,
            last_event: None,
        }
    }

    fn add_event(&mut self, event: &notify::Event) {
        use notify::EventKind;

        match event.kind {
            EventKind::Create(_) | EventKind::Remove(_) => {}
            // Metadata-only changes (mtime/chmod) are noise
            EventKind::Modify(notify::event::ModifyKind::Metadata(_)) => return,
            EventKind::Modify(_) => {}
            _ => return,
        }

        if event.paths.iter().any(|p| same_file(p, &self.target)) {
            debug!("watch"; "event {:?}: {}", event.kind, self.target.display());
            self.last_event = Some(Instant::now());
        }
    }

    fn take_if_ready(&mut self) -> bool {
        match self.last_event {
            Some(at) if at.elapsed() >= Duration::from_millis(DEBOUNCE_MS) => {
                self.last_event = None;
                true
            }
            _ => false,
        }
    }

    fn sleep_duration(&self) -> Duration {
        let Some(last_event) = self.last_event else {
            return Duration::from_secs(86400);
        };
        Duration::from_millis(DEBOUNCE_MS)
            .saturating_sub(last_event.elapsed())
            .max(Duration::from_millis(1))
    }
}

/// Only the script's own directory is watched, so a matching file name is
/// the script even when notify reports a differently resolved parent.
fn same_file(a: &Path, b: &Path) -> bool {
    a == b || a.file_name() == b.file_name()
}

/// Watches one script file and reports debounced changes.
pub struct ScriptWatcher {
    notify_rx: std::sync::mpsc::Receiver<notify::Result<notify::Event>>,
    // Dropping the watcher stops event delivery
    watcher: RecommendedWatcher,
    debouncer: Debouncer,
}

impl ScriptWatcher {
    /// Start watching immediately so no change is lost while the caller
    /// finishes setting up.
    pub fn new(script: &Path) -> notify::Result<Self> {
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = notify_tx.send(res);
        })?;

        let dir = script.parent().unwrap_or(Path::new("."));
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            notify_rx,
            watcher,
            debouncer: Debouncer::new(script.to_path_buf()),
        })
    }

    /// Run until `on_change` returns false or the shutdown signal fires.
    pub async fn run(
        self,
        mut on_change: impl FnMut() -> bool,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        let notify_rx = self.notify_rx;
        let mut debouncer = self.debouncer;
        let watcher = self.watcher;

        let (async_tx, mut async_rx) = tokio::sync::mpsc::channel::<notify::Event>(64);

        // notify is sync-only; bridge it onto the async channel
        std::thread::spawn(move || {
            while let Ok(result) = notify_rx.recv() {
                match result {
                    Ok(event) => {
                        if async_tx.blocking_send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => log!("watch"; "notify error: {}", e),
                }
            }
        });

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                Some(event) = async_rx.recv() => debouncer.add_event(&event),
                _ = tokio::time::sleep(debouncer.sleep_duration()) => {
                    if debouncer.take_if_ready() {
                        log!("watch"; "script changed");
                        if !on_change() {
                            break;
                        }
                    }
                }
            }
        }

        drop(watcher);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, ModifyKind};
    use notify::{Event, EventKind};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_ignores_other_files() {
        let mut d = Debouncer::new(PathBuf::from("/app/main.lua"));
        d.add_event(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            "/app/other.lua",
        ));
        assert!(d.last_event.is_none());
    }

    #[test]
    fn test_ignores_metadata_changes() {
        let mut d = Debouncer::new(PathBuf::from("/app/main.lua"));
        d.add_event(&event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)),
            "/app/main.lua",
        ));
        assert!(d.last_event.is_none());
    }

    #[test]
    fn test_burst_yields_single_change_after_window() {
        let mut d = Debouncer::new(PathBuf::from("/app/main.lua"));
        d.add_event(&event(EventKind::Create(CreateKind::File), "/app/main.lua"));
        d.add_event(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            "/app/main.lua",
        ));
        assert!(!d.take_if_ready());
        assert!(d.sleep_duration() <= Duration::from_millis(DEBOUNCE_MS));

        d.last_event = Some(Instant::now() - Duration::from_millis(DEBOUNCE_MS + 1));
        assert!(d.take_if_ready());
        assert!(!d.take_if_ready());
    }

    #[test]
    fn test_same_file_matches_by_name() {
        assert!(same_file(
            Path::new("/private/tmp/app/main.lua"),
            Path::new("/tmp/app/main.lua")
        ));
        assert!(!same_file(
            Path::new("/home/u/app/other.lua"),
            Path::new("/home/u/app/main.lua")
        ));
    }
}
