//! Event infrastructure for ledger-core.
//!
//! `LedgerEvent`s are transient, non-blocking notifications about what the
//! coordinator and scheduler did (the things a UI would show as a toast).
//! `EventBus` fans them out to subscribers; nothing in the sync path waits on
//! a subscriber.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Notifications emitted during sync and expansion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LedgerEvent {
    /// A snapshot from another writer replaced local state.
    SnapshotAdopted {
        /// Number of records in the adopted snapshot.
        count: usize,
        /// Store revision of the snapshot.
        revision: u64,
    },
    /// A snapshot of our own write was discarded.
    EchoSuppressed {
        /// Origin tag carried by the snapshot.
        origin: String,
    },
    /// A local change was applied and persisted.
    RecordsSaved {
        /// What happened ("added", "updated", "deleted", "generated").
        action: String,
        /// Number of records after the change.
        count: usize,
    },
    /// Persisting a local change failed. Local state was kept.
    WriteFailed {
        /// Origin tag of the failed write.
        origin: String,
        /// Store error message.
        reason: String,
    },
    /// A delete was refused because it would have emptied the collection.
    DeleteRefused {
        /// Record the delete targeted.
        #[serde(rename = "recordId")]
        record_id: String,
    },
    /// The scheduler materialized recurring instances.
    InstancesGenerated {
        /// Number of instances created.
        count: usize,
    },
    /// The scheduler's transaction failed; nothing was merged.
    ExpansionFailed {
        /// Store error message.
        reason: String,
    },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct EventSubscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(LedgerEvent) + Send + Sync>;

/// Event bus for publishing ledger events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns a handle that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(LedgerEvent) + Send + Sync + 'static,
    ) -> EventSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        EventSubscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run during unwinding while emit holds a read lock.
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: LedgerEvent) {
        // Clone the list so a callback may subscribe without deadlocking.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}
