//! JSON file implementation of `RecordStore`.
//!
//! The whole collection lives in one JSON document. Several processes may
//! open the same file:
//! - every read-modify-write runs under an exclusive `fs2` lock on a
//!   sidecar `.lock` file, so `transact` is atomic across processes
//! - commits go to a temp file that is renamed over the ledger, so readers
//!   never see a partial document
//! - a `LedgerWatcher` turns commits by other processes into snapshots
//!
//! Snapshots of this process's own commits are published directly and
//! again by the watcher; the feed drops the second copy by revision.

use crate::watcher::LedgerWatcher;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use ledger_core::feed::{SnapshotFeed, Subscription};
use ledger_core::store::{RecordStore, Result, Snapshot, StoreError, TransactOutcome, Update, ensure_normalized};
use ledger_core::{OriginTag, Record};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// On-disk layout of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerDocument {
    #[serde(default)]
    pub records: Vec<Record>,
    #[serde(default)]
    pub revision: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<OriginTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: String,
}

impl LedgerDocument {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            records: self.records.clone(),
            revision: self.revision,
            origin: self.origin,
        }
    }
}

pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    user: String,
    feed: Arc<SnapshotFeed>,
    /// Held around every publish and around subscription setup, so a new
    /// subscriber's initial snapshot is never older than the feed
    publish_guard: Arc<Mutex<()>>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl JsonFileStore {
    /// Open the ledger at `path`, creating its directory if needed. The
    /// file itself is created by the first commit.
    pub fn open(path: impl Into<PathBuf>, user: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let lock_path = sidecar(&path, "lock");

        info!("Opened ledger {:?}", path);
        Ok(Self {
            path,
            lock_path,
            user: user.into(),
            feed: Arc::new(SnapshotFeed::new()),
            publish_guard: Arc::new(Mutex::new(())),
            watch_task: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document as it is on disk.
    pub fn load(&self) -> Result<LedgerDocument> {
        read_document(&self.path)
    }

    /// Run `f` while holding the cross-process lock.
    fn with_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(io_error)?;
        lock_file
            .lock_exclusive()
            .map_err(|e| StoreError::Unavailable(format!("failed to lock ledger: {}", e)))?;

        let result = f();

        if let Err(e) = FileExt::unlock(&lock_file) {
            warn!("Failed to unlock {:?}: {}", self.lock_path, e);
        }
        result
    }

    fn commit(&self, current: &LedgerDocument, records: Vec<Record>, origin: OriginTag) -> Result<Snapshot> {
        ensure_normalized(&records)?;
        let document = LedgerDocument {
            records,
            revision: current.revision + 1,
            origin: Some(origin),
            updated_at: Some(Utc::now()),
            updated_by: self.user.clone(),
        };
        write_document(&self.path, &document)?;
        debug!("Committed rev {} ({} records, {})", document.revision, document.records.len(), origin);

        let snapshot = document.snapshot();
        let _guard = self.publish_guard.lock().unwrap_or_else(|e| e.into_inner());
        self.feed.publish(&snapshot);
        Ok(snapshot)
    }

    /// Spawn the watcher task on first use.
    fn ensure_watching(&self) -> Result<()> {
        let mut task = self.watch_task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            return Ok(());
        }

        let mut watcher = LedgerWatcher::new(self.path.clone())
            .map_err(|e| StoreError::Unavailable(format!("failed to watch ledger: {}", e)))?;
        debug!("Watching {:?}", watcher.path());
        let feed = Arc::downgrade(&self.feed);
        let guard = Arc::clone(&self.publish_guard);
        let path = self.path.clone();

        *task = Some(tokio::spawn(async move {
            while watcher.changed().await.is_some() {
                let Some(feed) = feed.upgrade() else {
                    break;
                };
                match reload(&path, &feed, &guard) {
                    Ok(Some(revision)) => debug!("Picked up external change to {:?} (rev {})", path, revision),
                    Ok(None) => {}
                    Err(e) => warn!("Failed to reload {:?}: {}", path, e),
                }
            }
            debug!("Ledger watcher for {:?} stopped", path);
        }));
        Ok(())
    }
}

/// Re-read the ledger and publish it. Returns the revision if it was new
/// to the feed.
fn reload(path: &Path, feed: &SnapshotFeed, guard: &Mutex<()>) -> Result<Option<u64>> {
    let _guard = guard.lock().unwrap_or_else(|e| e.into_inner());
    let document = read_document(path)?;
    Ok(feed.publish(&document.snapshot()).then_some(document.revision))
}

impl Drop for JsonFileStore {
    fn drop(&mut self) {
        if let Ok(mut task) = self.watch_task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn get(&self) -> Result<Snapshot> {
        Ok(self.load()?.snapshot())
    }

    async fn subscribe(&self) -> Result<Subscription> {
        self.ensure_watching()?;
        let _guard = self.publish_guard.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.load()?.snapshot();
        Ok(self.feed.subscribe(current))
    }

    async fn write(&self, records: Vec<Record>, origin: OriginTag) -> Result<Snapshot> {
        self.with_lock(|| {
            let current = read_document(&self.path)?;
            self.commit(&current, records, origin)
        })
    }

    async fn transact(&self, origin: OriginTag, update: Update<'_>) -> Result<TransactOutcome> {
        self.with_lock(|| {
            let current = read_document(&self.path)?;
            match update(&current.records) {
                Some(records) => Ok(TransactOutcome::Committed(self.commit(&current, records, origin)?)),
                None => Ok(TransactOutcome::Unchanged),
            }
        })
    }
}

fn read_document(path: &Path) -> Result<LedgerDocument> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LedgerDocument::default()),
        Err(e) => return Err(io_error(e)),
    };
    serde_json::from_str(&content).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn write_document(path: &Path, document: &LedgerDocument) -> Result<()> {
    let content =
        serde_json::to_string_pretty(document).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let temp_path = sidecar(path, "tmp");
    {
        let mut file = File::create(&temp_path).map_err(io_error)?;
        std::io::Write::write_all(&mut file, content.as_bytes()).map_err(io_error)?;
        file.sync_all().map_err(io_error)?;
    }
    fs::rename(&temp_path, path).map_err(io_error)
}

/// `ledger.json` -> `ledger.json.<suffix>`
fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn io_error(e: std::io::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ledger_core::{Instance, OriginTagSource, RecordId};
    use tempfile::TempDir;

    fn expense(id: &str, amount: f64) -> Record {
        let mut instance = Instance::new(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(), amount);
        instance.id = RecordId::from(id);
        Record::from(instance)
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_collection() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("ledger.json"), "owner").unwrap();

        let snapshot = store.get().await.unwrap();

        assert!(snapshot.records.is_empty());
        assert_eq!(snapshot.revision, 0);
        assert_eq!(snapshot.origin, None);
    }

    #[tokio::test]
    async fn test_write_persists_metadata() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("ledger.json"), "owner").unwrap();
        let tag = OriginTagSource::new().next_tag();

        store.write(vec![expense("e1", 10.0)], tag).await.unwrap();

        let document = store.load().unwrap();
        assert_eq!(document.revision, 1);
        assert_eq!(document.origin, Some(tag));
        assert_eq!(document.updated_by, "owner");
        assert!(document.updated_at.is_some());
        assert!(!sidecar(store.path(), "tmp").exists());

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["updatedBy"], "owner");
        assert_eq!(raw["records"][0]["kind"], "instance");
    }

    #[tokio::test]
    async fn test_rejects_unnormalized_records() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("ledger.json"), "owner").unwrap();
        let tag = OriginTagSource::new().next_tag();

        let result = store.write(vec![expense("e1", f64::INFINITY)], tag).await;

        assert!(matches!(result, Err(StoreError::Rejected(_))));
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_serialization_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, "{ oops").unwrap();
        let store = JsonFileStore::open(&path, "owner").unwrap();

        assert!(matches!(store.get().await, Err(StoreError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_document_with_incomplete_records_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(
            &path,
            r#"{"revision":4,"records":[
                {"kind":"template","id":"t1","amount":50},
                {"kind":"instance","id":"e1","amount":10},
                {"kind":"template","id":"t2","frequency":"weekly","createdOn":"2026-01-05"}
            ]}"#,
        )
        .unwrap();
        let store = JsonFileStore::open(&path, "owner").unwrap();

        let snapshot = store.get().await.unwrap();

        assert_eq!(snapshot.revision, 4);
        assert_eq!(snapshot.records.len(), 3);
        let mut subscription = store.subscribe().await.unwrap();
        assert_eq!(subscription.recv().await.unwrap().records.len(), 3);
    }

    #[tokio::test]
    async fn test_transact_abort_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("ledger.json"), "owner").unwrap();
        let mut tags = OriginTagSource::new();
        store.write(vec![expense("e1", 10.0)], tags.next_tag()).await.unwrap();

        let outcome = store.transact(tags.next_tag(), &mut |_| None).await.unwrap();

        assert_eq!(outcome, TransactOutcome::Unchanged);
        assert_eq!(store.load().unwrap().revision, 1);
    }

    #[test]
    fn test_reload_waits_for_subscription_setup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        let document = |revision: u64| LedgerDocument {
            records: vec![expense("e1", revision as f64)],
            revision,
            ..Default::default()
        };
        write_document(&path, &document(1)).unwrap();
        let feed = Arc::new(SnapshotFeed::new());
        let guard = Arc::new(Mutex::new(()));

        // Subscription setup has read rev 1 when another process commits rev 2
        let held = guard.lock().unwrap();
        let current = read_document(&path).unwrap();
        write_document(&path, &document(2)).unwrap();
        let reloader = {
            let (path, feed, guard) = (path.clone(), Arc::clone(&feed), Arc::clone(&guard));
            std::thread::spawn(move || reload(&path, &feed, &guard))
        };
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(!reloader.is_finished());

        let mut subscription = feed.subscribe(current.snapshot());
        drop(held);

        assert_eq!(reloader.join().unwrap().unwrap(), Some(2));
        assert_eq!(subscription.try_recv().unwrap().revision, 1);
        assert_eq!(subscription.try_recv().unwrap().revision, 2);
    }

    #[test]
    fn test_sidecar_names() {
        assert_eq!(
            sidecar(Path::new("/srv/ledger.json"), "lock"),
            PathBuf::from("/srv/ledger.json.lock")
        );
    }
}
