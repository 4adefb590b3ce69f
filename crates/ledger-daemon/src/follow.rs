//! The long-running session loop behind `ledger-daemon run`.

use chrono::NaiveDate;
use ledger_core::store::RecordStore;
use ledger_core::{ExpansionRun, Scheduler, SkipReason, SnapshotDisposition, SyncCoordinator};
use std::future::Future;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Follow the ledger until `shutdown` resolves or the store goes away.
///
/// Recurring expansion runs once, after the settle delay. While the
/// collection is empty the run is held back, and the settle delay restarts
/// when an adopted snapshot brings the first records in.
pub async fn follow<S, F>(
    coordinator: &mut SyncCoordinator<S>,
    scheduler: &Scheduler,
    today: impl Fn() -> NaiveDate,
    shutdown: F,
) where
    S: RecordStore,
    F: Future<Output = ()>,
{
    let settle = tokio::time::sleep(scheduler.settle_delay());
    tokio::pin!(settle);
    tokio::pin!(shutdown);
    let mut expansion_pending = true;
    let mut settle_armed = true;

    loop {
        tokio::select! {
            snapshot = coordinator.next_snapshot() => {
                let Some(snapshot) = snapshot else {
                    warn!("Ledger subscription closed");
                    break;
                };
                let was_empty = coordinator.records().is_empty();
                let disposition = coordinator.apply_snapshot(snapshot);
                debug!("Snapshot: {:?}", disposition);

                if expansion_pending
                    && matches!(disposition, SnapshotDisposition::Adopted { .. })
                    && !coordinator.records().is_empty()
                    && (was_empty || !settle_armed)
                {
                    debug!("Ledger has records, expanding in {:?}", scheduler.settle_delay());
                    settle.as_mut().reset(Instant::now() + scheduler.settle_delay());
                    settle_armed = true;
                }
            }

            _ = &mut settle, if expansion_pending && settle_armed => {
                settle_armed = false;
                expansion_pending = expand(coordinator, scheduler, today()).await;
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }
}

/// Run the scheduler once. Returns whether expansion is still pending.
async fn expand<S: RecordStore>(
    coordinator: &mut SyncCoordinator<S>,
    scheduler: &Scheduler,
    today: NaiveDate,
) -> bool {
    match scheduler.run(coordinator, today).await {
        Ok(ExpansionRun::Completed { created }) => {
            info!("Recurring expansion done, {} new expense(s)", created);
            false
        }
        Ok(ExpansionRun::Skipped(SkipReason::EmptyCollection)) => {
            debug!("Recurring expansion waiting for records");
            true
        }
        Ok(ExpansionRun::Skipped(reason)) => {
            debug!("Recurring expansion skipped: {:?}", reason);
            false
        }
        Err(e) => {
            error!("Recurring expansion failed: {}", e);
            false
        }
    }
}
