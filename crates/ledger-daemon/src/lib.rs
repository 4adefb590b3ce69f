//! ledger-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod config;
pub mod file_store;
pub mod follow;
pub mod watcher;

// Re-export key types for convenience
pub use config::Config;
pub use file_store::{JsonFileStore, LedgerDocument};
pub use follow::follow;
pub use watcher::LedgerWatcher;
