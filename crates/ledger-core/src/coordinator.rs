//! SyncCoordinator: owns the local copy of the record collection.
//!
//! Local edits are applied optimistically and then persisted as a full
//! write tagged with a fresh origin token. Every committed change (our own
//! included) comes back through the store subscription:
//!
//! 1. If the snapshot's origin is one of our pending tags, it is an echo of a
//!    write whose result we already hold, so it is discarded.
//! 2. If its revision is not newer than the one local state already reflects,
//!    it was overtaken by a commit we made in the meantime and is skipped.
//! 3. Otherwise another writer changed the document and the snapshot replaces
//!    local state wholesale. There is no field-level merge.
//!
//! Writes are refused until the first snapshot arrives, so an empty local
//! seed can never overwrite real data.

use crate::events::{EventBus, LedgerEvent};
use crate::feed::Subscription;
use crate::month::YearMonth;
use crate::recurrence::{self, RecurrenceError};
use crate::record::{Record, RecordId, RecordPatch, normalize_all};
use crate::session::SessionContext;
use crate::store::{RecordStore, Snapshot, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Coordinator already started")]
    AlreadyStarted,

    #[error("Not ready: the first snapshot has not arrived yet")]
    NotReady,

    #[error("Record not found: {0}")]
    UnknownRecord(RecordId),

    #[error("Refusing to delete {0}: it is the last record in the collection")]
    WouldEmptyCollection(RecordId),

    #[error("Subscription closed")]
    SubscriptionClosed,

    #[error("Recurrence error: {0}")]
    Recurrence(#[from] RecurrenceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Lifecycle of a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Created, not subscribed.
    Uninitialized,
    /// Subscribed, waiting for the first snapshot.
    Syncing,
    /// Local state reflects the store; writes are allowed.
    Ready,
}

/// What happened to a local mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Applied locally and committed under this tag.
    Committed(crate::origin::OriginTag),
    /// Nothing to do (duplicate add, no-op patch, already deleted).
    Unchanged,
    /// Applied locally but the store refused or was unreachable. Local state
    /// is kept; the next foreign snapshot or successful write reconciles it.
    Failed {
        origin: crate::origin::OriginTag,
        reason: String,
    },
}

/// What a delivered snapshot did to local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotDisposition {
    /// Replaced local state.
    Adopted { count: usize },
    /// Echo of our own write, discarded.
    Echo,
    /// Older than the revision local state already reflects, discarded.
    Stale,
}

pub struct SyncCoordinator<S: RecordStore> {
    store: S,
    records: Vec<Record>,
    revision: Option<u64>,
    state: SyncState,
    session: SessionContext,
    subscription: Option<Subscription>,
    events: Arc<EventBus>,
}

impl<S: RecordStore> SyncCoordinator<S> {
    pub fn new(store: S, session: SessionContext) -> Self {
        Self {
            store,
            records: Vec::new(),
            revision: None,
            state: SyncState::Uninitialized,
            session,
            subscription: None,
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SyncState::Ready
    }

    /// Current local records.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Store revision local state was last synchronized with.
    pub fn revision(&self) -> Option<u64> {
        self.revision
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub(crate) fn session_mut(&mut self) -> &mut SessionContext {
        &mut self.session
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    /// Subscribe to the store. Moves `Uninitialized -> Syncing`.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != SyncState::Uninitialized {
            return Err(CoordinatorError::AlreadyStarted);
        }
        self.subscription = Some(self.store.subscribe().await?);
        self.state = SyncState::Syncing;
        debug!("Subscribed to record store, waiting for first snapshot");
        Ok(())
    }

    /// Wait for the next delivered snapshot without applying it.
    ///
    /// Returns `None` if not started or the store went away.
    pub async fn next_snapshot(&mut self) -> Option<Snapshot> {
        match self.subscription.as_mut() {
            Some(subscription) => subscription.recv().await,
            None => None,
        }
    }

    /// Receive and apply one snapshot.
    pub async fn sync_once(&mut self) -> Result<SnapshotDisposition> {
        let snapshot = self
            .next_snapshot()
            .await
            .ok_or(CoordinatorError::SubscriptionClosed)?;
        Ok(self.apply_snapshot(snapshot))
    }

    /// Apply snapshots until the coordinator is `Ready`.
    pub async fn wait_until_ready(&mut self) -> Result<()> {
        while self.state != SyncState::Ready {
            if self.state == SyncState::Uninitialized {
                return Err(CoordinatorError::NotReady);
            }
            self.sync_once().await?;
        }
        Ok(())
    }

    /// Apply every snapshot already queued, without waiting.
    pub fn drain_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Some(snapshot) = self.subscription.as_mut().and_then(Subscription::try_recv) {
            self.apply_snapshot(snapshot);
            applied += 1;
        }
        applied
    }

    /// Reconcile a delivered snapshot with local state.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) -> SnapshotDisposition {
        if self.state == SyncState::Ready && self.session.acknowledge(snapshot.origin) {
            let origin = snapshot.origin.map(|t| t.to_string()).unwrap_or_default();
            debug!("Skipping snapshot rev {} from our own write {}", snapshot.revision, origin);
            self.events.emit(LedgerEvent::EchoSuppressed { origin });
            return SnapshotDisposition::Echo;
        }

        if self.state == SyncState::Ready
            && self.revision.is_some_and(|rev| snapshot.revision <= rev)
        {
            debug!("Skipping stale snapshot rev {}", snapshot.revision);
            return SnapshotDisposition::Stale;
        }

        let count = snapshot.records.len();
        self.records = snapshot.records;
        self.revision = Some(snapshot.revision);

        if self.state != SyncState::Ready {
            self.state = SyncState::Ready;
            self.session.mark_synced();
            info!("Initial sync complete: {} record(s) at rev {}", count, snapshot.revision);
        } else {
            debug!("Adopted foreign snapshot rev {} ({} records)", snapshot.revision, count);
        }

        self.events.emit(LedgerEvent::SnapshotAdopted {
            count,
            revision: snapshot.revision,
        });
        SnapshotDisposition::Adopted { count }
    }

    /// Add a record. Adding an id that is already present is a no-op.
    pub async fn add(&mut self, record: Record) -> Result<WriteOutcome> {
        self.require_ready()?;
        let mut record = record;
        record.normalize();
        if self.position(record.id()).is_some() {
            debug!("Record {} already present, skipping add", record.id());
            return Ok(WriteOutcome::Unchanged);
        }
        stamp_creator(&mut record, self.session.user());

        let mut records = self.records.clone();
        records.push(record);
        Ok(self.commit_local(records, "added").await)
    }

    /// Edit a record in place. A patch that changes nothing is a no-op.
    pub async fn update(&mut self, id: &RecordId, patch: RecordPatch) -> Result<WriteOutcome> {
        self.require_ready()?;
        let index = self
            .position(id)
            .ok_or_else(|| CoordinatorError::UnknownRecord(id.clone()))?;

        let mut updated = self.records[index].clone();
        updated.apply(&patch);
        updated.normalize();
        if updated == self.records[index] {
            return Ok(WriteOutcome::Unchanged);
        }

        let mut records = self.records.clone();
        records[index] = updated;
        Ok(self.commit_local(records, "updated").await)
    }

    /// Delete a record. Deleting a missing id is a no-op.
    ///
    /// Deleting the last remaining record is refused with
    /// `WouldEmptyCollection`: an empty write racing another client's append
    /// would wipe the shared collection.
    pub async fn remove(&mut self, id: &RecordId) -> Result<WriteOutcome> {
        self.require_ready()?;
        let Some(index) = self.position(id) else {
            return Ok(WriteOutcome::Unchanged);
        };
        if self.records.len() == 1 {
            warn!("Refusing to delete {}: collection would be empty", id);
            self.events.emit(LedgerEvent::DeleteRefused {
                record_id: id.to_string(),
            });
            return Err(CoordinatorError::WouldEmptyCollection(id.clone()));
        }

        let mut records = self.records.clone();
        records.remove(index);
        Ok(self.commit_local(records, "deleted").await)
    }

    /// Manually materialize a template's instance for `month`.
    pub async fn generate_for_period(
        &mut self,
        template_id: &RecordId,
        month: YearMonth,
    ) -> Result<WriteOutcome> {
        self.require_ready()?;
        let mut instance = recurrence::generate_for_month(&self.records, template_id, month)
            .map_err(|e| match e {
                RecurrenceError::TemplateNotFound(id) => CoordinatorError::UnknownRecord(id),
                other => other.into(),
            })?;
        instance.created_by = self.session.user().to_string();

        let mut records = self.records.clone();
        records.push(Record::from(instance));
        Ok(self.commit_local(records, "generated").await)
    }

    /// Take over the result of a transaction this session committed.
    ///
    /// The committed collection is the store's latest state plus the
    /// generated instances, so it supersedes anything still queued.
    pub(crate) fn adopt_committed(&mut self, snapshot: Snapshot) {
        self.records = snapshot.records;
        self.note_revision(snapshot.revision);
    }

    fn note_revision(&mut self, revision: u64) {
        self.revision = Some(self.revision.map_or(revision, |rev| rev.max(revision)));
    }

    fn require_ready(&self) -> Result<()> {
        if self.state == SyncState::Ready {
            Ok(())
        } else {
            Err(CoordinatorError::NotReady)
        }
    }

    fn position(&self, id: &RecordId) -> Option<usize> {
        self.records.iter().position(|r| r.id() == id)
    }

    /// Apply `records` locally, then persist them under a fresh tag.
    async fn commit_local(&mut self, mut records: Vec<Record>, action: &str) -> WriteOutcome {
        normalize_all(&mut records);
        self.records = records.clone();
        let count = records.len();
        let origin = self.session.issue_tag();

        match self.store.write(records, origin).await {
            Ok(snapshot) => {
                self.note_revision(snapshot.revision);
                debug!("Saved {} records at rev {} ({})", count, snapshot.revision, origin);
                self.events.emit(LedgerEvent::RecordsSaved {
                    action: action.to_string(),
                    count,
                });
                WriteOutcome::Committed(origin)
            }
            Err(e) => {
                warn!("Failed to save records ({}): {}", action, e);
                self.session.forget(origin);
                self.events.emit(LedgerEvent::WriteFailed {
                    origin: origin.to_string(),
                    reason: e.to_string(),
                });
                WriteOutcome::Failed {
                    origin,
                    reason: e.to_string(),
                }
            }
        }
    }
}

fn stamp_creator(record: &mut Record, user: &str) {
    let created_by = match record {
        Record::Template(t) => &mut t.created_by,
        Record::Instance(i) => &mut i.created_by,
    };
    if created_by.is_empty() {
        *created_by = user.to_string();
    }
}
