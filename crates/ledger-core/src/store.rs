//! RecordStore trait abstraction over the shared, push-notifying document
//! that holds the record collection.
//!
//! Implementations:
//! - `InMemoryRecordStore` - For testing
//! - `JsonFileStore` (in ledger-daemon) - JSON document on disk, shared
//!   between processes through an advisory lock and a file watcher
//!
//! The whole collection is one document: every write replaces it, and every
//! delivery carries it in full.

use crate::feed::{SnapshotFeed, Subscription};
use crate::origin::OriginTag;
use crate::record::Record;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Subscription closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Full view of the stored collection at one revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub records: Vec<Record>,
    /// Store-assigned revision, increasing with every committed change.
    pub revision: u64,
    /// Tag of the write that produced this revision (`None` for seeded data).
    pub origin: Option<OriginTag>,
}

/// Result of a `transact` call.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactOutcome {
    /// The update produced a new collection and it was committed.
    Committed(Snapshot),
    /// The update declined to change anything; nothing was written.
    Unchanged,
}

/// Read-modify-write callback for `transact`.
///
/// Receives the current collection and returns the replacement, or `None`
/// to abort without writing. May be called more than once if the store
/// retries on conflict, so it must not have side effects beyond its captures.
pub type Update<'a> = &'a mut (dyn FnMut(&[Record]) -> Option<Vec<Record>> + Send);

/// The shared record collection.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Current full snapshot.
    async fn get(&self) -> Result<Snapshot>;

    /// Subscribe to changes. The current snapshot is delivered first, then
    /// one snapshot per committed change, including this process's own
    /// writes. Drop the subscription to unsubscribe.
    async fn subscribe(&self) -> Result<Subscription>;

    /// Replace the stored collection, persisting `origin` alongside it.
    async fn write(&self, records: Vec<Record>, origin: OriginTag) -> Result<Snapshot>;

    /// Atomically read, update and commit the collection. Indivisible with
    /// respect to every other `write`/`transact` on the same document.
    async fn transact(&self, origin: OriginTag, update: Update<'_>) -> Result<TransactOutcome>;
}

/// Reject collections that contain unnormalized records.
///
/// Callers are expected to normalize first; this mirrors a store that
/// refuses undefined values.
pub fn ensure_normalized(records: &[Record]) -> Result<()> {
    match records.iter().find(|r| !r.is_normalized()) {
        Some(record) => Err(StoreError::Rejected(format!(
            "record {:?} has unnormalized fields",
            record.id().as_str()
        ))),
        None => Ok(()),
    }
}

struct StoredDocument {
    records: Vec<Record>,
    revision: u64,
    origin: Option<OriginTag>,
}

impl StoredDocument {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            records: self.records.clone(),
            revision: self.revision,
            origin: self.origin,
        }
    }
}

/// In-memory store for testing.
///
/// Every method takes the document mutex for its whole duration, so
/// `transact` is trivially atomic.
pub struct InMemoryRecordStore {
    document: Mutex<StoredDocument>,
    feed: Arc<SnapshotFeed>,
    offline: AtomicBool,
    commits: AtomicUsize,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::with_records(Vec::new())
    }

    /// Seed the store, as if another client had written `records` earlier.
    pub fn with_records(records: Vec<Record>) -> Self {
        Self {
            document: Mutex::new(StoredDocument {
                records,
                revision: 1,
                origin: None,
            }),
            feed: Arc::new(SnapshotFeed::new()),
            offline: AtomicBool::new(false),
            commits: AtomicUsize::new(0),
        }
    }

    /// Make writes and transactions fail with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of committed writes and transactions.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Current stored records.
    pub fn records(&self) -> Vec<Record> {
        self.lock().records.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoredDocument> {
        self.document.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store is offline".into()))
        } else {
            Ok(())
        }
    }

    fn commit(&self, document: &mut StoredDocument, records: Vec<Record>, origin: OriginTag) -> Snapshot {
        document.records = records;
        document.revision += 1;
        document.origin = Some(origin);
        self.commits.fetch_add(1, Ordering::SeqCst);

        let snapshot = document.snapshot();
        self.feed.publish(&snapshot);
        snapshot
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self) -> Result<Snapshot> {
        Ok(self.lock().snapshot())
    }

    async fn subscribe(&self) -> Result<Subscription> {
        // Hold the lock so no commit slips between the initial snapshot
        // and registration.
        let document = self.lock();
        Ok(self.feed.subscribe(document.snapshot()))
    }

    async fn write(&self, records: Vec<Record>, origin: OriginTag) -> Result<Snapshot> {
        self.check_online()?;
        ensure_normalized(&records)?;
        let mut document = self.lock();
        Ok(self.commit(&mut document, records, origin))
    }

    async fn transact(&self, origin: OriginTag, update: Update<'_>) -> Result<TransactOutcome> {
        self.check_online()?;
        let mut document = self.lock();
        let Some(records) = update(&document.records) else {
            return Ok(TransactOutcome::Unchanged);
        };
        ensure_normalized(&records)?;
        Ok(TransactOutcome::Committed(self.commit(&mut document, records, origin)))
    }
}

// Allows sharing one store between several coordinators in tests
#[async_trait]
impl<T: RecordStore> RecordStore for Arc<T> {
    async fn get(&self) -> Result<Snapshot> {
        (**self).get().await
    }

    async fn subscribe(&self) -> Result<Subscription> {
        (**self).subscribe().await
    }

    async fn write(&self, records: Vec<Record>, origin: OriginTag) -> Result<Snapshot> {
        (**self).write(records, origin).await
    }

    async fn transact(&self, origin: OriginTag, update: Update<'_>) -> Result<TransactOutcome> {
        (**self).transact(origin, update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::OriginTagSource;
    use crate::record::{Instance, RecordId};
    use chrono::NaiveDate;

    fn expense(id: &str, amount: f64) -> Record {
        let mut instance = Instance::new(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(), amount);
        instance.id = RecordId::from(id);
        Record::from(instance)
    }

    #[tokio::test]
    async fn test_write_bumps_revision_and_keeps_origin() {
        let store = InMemoryRecordStore::new();
        let tag = OriginTagSource::new().next_tag();

        let snapshot = store.write(vec![expense("e1", 10.0)], tag).await.unwrap();

        assert_eq!(snapshot.revision, 2);
        assert_eq!(snapshot.origin, Some(tag));
        assert_eq!(store.get().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_subscribe_delivers_current_then_changes() {
        let store = InMemoryRecordStore::with_records(vec![expense("e1", 10.0)]);
        let mut sub = store.subscribe().await.unwrap();

        let initial = sub.recv().await.unwrap();
        assert_eq!(initial.records.len(), 1);
        assert_eq!(initial.origin, None);

        let tag = OriginTagSource::new().next_tag();
        store
            .write(vec![expense("e1", 10.0), expense("e2", 20.0)], tag)
            .await
            .unwrap();

        let next = sub.recv().await.unwrap();
        assert_eq!(next.records.len(), 2);
        assert_eq!(next.origin, Some(tag));
    }

    #[tokio::test]
    async fn test_rejects_unnormalized_records() {
        let store = InMemoryRecordStore::new();
        let tag = OriginTagSource::new().next_tag();

        let result = store.write(vec![expense("e1", f64::NAN)], tag).await;

        assert!(matches!(result, Err(StoreError::Rejected(_))));
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_transact_none_writes_nothing() {
        let store = InMemoryRecordStore::with_records(vec![expense("e1", 10.0)]);
        let tag = OriginTagSource::new().next_tag();

        let outcome = store.transact(tag, &mut |_current| None).await.unwrap();

        assert_eq!(outcome, TransactOutcome::Unchanged);
        assert_eq!(store.get().await.unwrap().revision, 1);
    }

    #[tokio::test]
    async fn test_transact_reads_latest_state() {
        let store = InMemoryRecordStore::with_records(vec![expense("e1", 10.0)]);
        let mut tags = OriginTagSource::new();

        store
            .write(vec![expense("e1", 10.0), expense("e2", 20.0)], tags.next_tag())
            .await
            .unwrap();

        let mut seen = 0;
        let outcome = store
            .transact(tags.next_tag(), &mut |current| {
                seen = current.len();
                let mut next = current.to_vec();
                next.push(expense("e3", 30.0));
                Some(next)
            })
            .await
            .unwrap();

        assert_eq!(seen, 2);
        let TransactOutcome::Committed(snapshot) = outcome else {
            panic!("expected commit");
        };
        assert_eq!(snapshot.records.len(), 3);
    }

    #[tokio::test]
    async fn test_offline_store_fails_writes() {
        let store = InMemoryRecordStore::new();
        store.set_offline(true);
        let tag = OriginTagSource::new().next_tag();

        assert!(matches!(
            store.write(vec![expense("e1", 1.0)], tag).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.transact(tag, &mut |c| Some(c.to_vec())).await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
