//! ledger-core: Shared record model and sync logic for the rental expense ledger.
//!
//! This crate provides the core functionality for:
//! - The expense record model (recurring templates and dated instances)
//! - Reconciling a local copy with a shared, push-notifying record store
//! - Materializing recurring instances once per session
//! - Totals, filtering and sorting over a collection
//!
//! ```
//! use ledger_core::{OriginTag, YearMonth};
//!
//! let month: YearMonth = "2026-03".parse().unwrap();
//! assert_eq!(month.add_months(-3).to_string(), "2025-12");
//!
//! let tag: OriginTag = "7-0000beef".parse().unwrap();
//! assert_eq!(tag.seq(), 7);
//! ```

pub mod coordinator;
pub mod events;
pub mod feed;
pub mod ledger;
pub mod month;
pub mod origin;
pub mod record;
pub mod recurrence;
pub mod scheduler;
pub mod session;
pub mod store;

pub use coordinator::{CoordinatorError, SnapshotDisposition, SyncCoordinator, SyncState, WriteOutcome};
pub use events::{EventBus, EventSubscription, LedgerEvent};
pub use feed::{SnapshotFeed, Subscription};
pub use ledger::{LedgerSummary, RecordFilter, SortDirection, SortKey, sort_instances, summarize};
pub use month::{MonthError, YearMonth};
pub use origin::{OriginTag, OriginTagError, OriginTagSource};
pub use record::{Category, Frequency, Instance, MILEAGE_RATE, Record, RecordId, RecordPatch, Template};
pub use recurrence::RecurrenceError;
pub use scheduler::{ExpansionRun, Scheduler, SchedulerError, SkipReason};
pub use session::SessionContext;
pub use store::{InMemoryRecordStore, RecordStore, Snapshot, StoreError, TransactOutcome};
