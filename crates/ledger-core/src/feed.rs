//! Snapshot fan-out for store implementations.
//!
//! A `SnapshotFeed` hands every subscriber its own unbounded channel. The
//! receiving half is wrapped in a `Subscription`, which the coordinator
//! drains inside its own loop instead of registering a callback.

use crate::store::Snapshot;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tracing::debug;

/// Receiving end of a store subscription.
///
/// Unsubscribes from the feed when dropped.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Snapshot>,
    feed: Weak<SnapshotFeed>,
    id: usize,
}

impl Subscription {
    /// Wait for the next snapshot. Returns `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }

    /// Take the next snapshot if one is already queued.
    pub fn try_recv(&mut self) -> Option<Snapshot> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.upgrade() {
            feed.unsubscribe(self.id);
        }
    }
}

/// Delivers snapshots to every live subscription.
///
/// Snapshots whose revision is not newer than the last published one are
/// dropped, so a store may publish the same change from more than one path
/// (its own write and a file watcher, say) without double delivery.
#[derive(Default)]
pub struct SnapshotFeed {
    senders: Mutex<Vec<(usize, mpsc::UnboundedSender<Snapshot>)>>,
    last_revision: Mutex<Option<u64>>,
    next_id: AtomicUsize,
}

impl SnapshotFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and queue `current` as its first delivery.
    ///
    /// The caller must make sure no publish can interleave between reading
    /// `current` and this call.
    pub fn subscribe(self: &Arc<Self>, current: Snapshot) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // The receiver is alive, send cannot fail
        let _ = tx.send(current);
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, tx));
        Subscription {
            rx,
            feed: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        if let Ok(mut guard) = self.senders.lock() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Publish a snapshot. Returns false if it was a duplicate revision.
    pub fn publish(&self, snapshot: &Snapshot) -> bool {
        {
            let mut last = self.last_revision.lock().unwrap_or_else(|e| e.into_inner());
            if last.is_some_and(|rev| snapshot.revision <= rev) {
                debug!("Skipping duplicate delivery of revision {}", snapshot.revision);
                return false;
            }
            *last = Some(snapshot.revision);
        }

        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders.retain(|(_, tx)| tx.send(snapshot.clone()).is_ok());
        true
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
