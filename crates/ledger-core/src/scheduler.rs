//! Once-per-session materialization of recurring instances.
//!
//! The scheduler waits for the coordinator to be `Ready`, lets the session
//! settle, then appends every missing instance in one store transaction.
//! Running inside `transact` is what keeps two sessions starting at the same
//! time from generating the same instance twice.

use crate::coordinator::SyncCoordinator;
use crate::events::LedgerEvent;
use crate::record::{Instance, Record};
use crate::recurrence;
use crate::store::{RecordStore, StoreError, TransactOutcome};
use chrono::NaiveDate;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Expansion transaction failed: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Why a run did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRan,
    NotReady,
    EmptyCollection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionRun {
    Skipped(SkipReason),
    /// The transaction ran; `created` is 0 when nothing was missing.
    Completed { created: usize },
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    settle_delay: Duration,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLE_DELAY)
    }
}

impl Scheduler {
    pub fn new(settle_delay: Duration) -> Self {
        Self { settle_delay }
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Whether a run now would do anything.
    pub fn is_due<S: RecordStore>(&self, coordinator: &SyncCoordinator<S>) -> bool {
        self.skip_reason(coordinator).is_none()
    }

    /// Sleep for the settle delay, then run.
    pub async fn settle_and_run<S: RecordStore>(
        &self,
        coordinator: &mut SyncCoordinator<S>,
        as_of: NaiveDate,
    ) -> Result<ExpansionRun> {
        tokio::time::sleep(self.settle_delay).await;
        self.run(coordinator, as_of).await
    }

    /// Expand every template as of `as_of` and commit the result atomically.
    ///
    /// The session flag is set before the transaction is attempted, so a
    /// failed run is not retried in the same session.
    pub async fn run<S: RecordStore>(
        &self,
        coordinator: &mut SyncCoordinator<S>,
        as_of: NaiveDate,
    ) -> Result<ExpansionRun> {
        if let Some(reason) = self.skip_reason(coordinator) {
            debug!("Skipping recurring expansion: {:?}", reason);
            return Ok(ExpansionRun::Skipped(reason));
        }
        coordinator.session_mut().mark_expansion_ran();

        let origin = coordinator.session_mut().issue_tag();
        let mut created: Vec<Instance> = Vec::new();
        let result = coordinator
            .store()
            .transact(origin, &mut |current| {
                created = recurrence::expand(current, as_of);
                if created.is_empty() {
                    return None;
                }
                let mut next = current.to_vec();
                next.extend(created.iter().cloned().map(Record::from));
                Some(next)
            })
            .await;

        match result {
            Ok(TransactOutcome::Committed(snapshot)) => {
                let count = created.len();
                coordinator.adopt_committed(snapshot);
                info!("Generated {} recurring instance(s) as of {}", count, as_of);
                coordinator
                    .events()
                    .emit(LedgerEvent::InstancesGenerated { count });
                Ok(ExpansionRun::Completed { created: count })
            }
            Ok(TransactOutcome::Unchanged) => {
                coordinator.session_mut().forget(origin);
                debug!("No recurring instances missing as of {}", as_of);
                Ok(ExpansionRun::Completed { created: 0 })
            }
            Err(e) => {
                coordinator.session_mut().forget(origin);
                warn!("Recurring expansion failed: {}", e);
                coordinator.events().emit(LedgerEvent::ExpansionFailed {
                    reason: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    fn skip_reason<S: RecordStore>(&self, coordinator: &SyncCoordinator<S>) -> Option<SkipReason> {
        if coordinator.session().expansion_ran() {
            Some(SkipReason::AlreadyRan)
        } else if !coordinator.is_ready() {
            Some(SkipReason::NotReady)
        } else if coordinator.records().is_empty() {
            Some(SkipReason::EmptyCollection)
        } else {
            None
        }
    }
}
