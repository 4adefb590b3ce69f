//! File watcher with debouncing for the ledger document.
//!
//! Uses notify-debouncer-mini for efficient file change detection. The
//! parent directory is watched rather than the file itself, because every
//! commit replaces the file by rename.

use anyhow::{Context, Result};
use notify::RecursiveMode;
use notify_debouncer_mini::{DebouncedEvent, new_debouncer};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Debounce period; a commit is a temp write plus a rename.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Watches one ledger file and signals when it may have changed.
pub struct LedgerWatcher {
    path: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    change_rx: mpsc::UnboundedReceiver<()>,
}

/// Last seen mtime, to filter spurious events
type MtimeCache = Arc<Mutex<Option<SystemTime>>>;

impl LedgerWatcher {
    /// Start watching `path`. Its parent directory must exist.
    pub fn new(path: PathBuf) -> Result<Self> {
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .with_context(|| format!("Ledger path has no file name: {:?}", path))?;
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        // Canonicalize the directory so event paths match (macOS /private/var).
        let parent = parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf());

        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let mtime_cache: MtimeCache = Arc::new(Mutex::new(None));

        let mut debouncer = new_debouncer(
            DEBOUNCE,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    let relevant = events
                        .iter()
                        .any(|event| Self::is_change(event, &file_name, &mtime_cache));
                    // Receiver dropped means the store is gone
                    if relevant && change_tx.send(()).is_err() {
                        debug!("Ledger watcher receiver dropped");
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&parent, RecursiveMode::NonRecursive)?;

        Ok(Self {
            path,
            _debouncer: debouncer,
            change_rx,
        })
    }

    /// Whether a debounced event touches the ledger file with a new mtime.
    fn is_change(event: &DebouncedEvent, file_name: &OsString, mtime_cache: &MtimeCache) -> bool {
        if event.path.file_name() != Some(file_name.as_os_str()) {
            return false;
        }

        let mtime = std::fs::metadata(&event.path)
            .and_then(|m| m.modified())
            .ok();
        let mut last = mtime_cache.lock().unwrap_or_else(|e| e.into_inner());
        if mtime.is_some() && *last == mtime {
            // Mtime unchanged - spurious event, skip it
            return false;
        }
        *last = mtime;

        debug!("Ledger file changed: {:?}", event.path);
        true
    }

    /// Wait for the next change. Returns `None` if the watcher stopped.
    pub async fn changed(&mut self) -> Option<()> {
        self.change_rx.recv().await
    }

    /// The watched ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
