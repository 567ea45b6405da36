//! Sync status tracking
//!
//! Every sync attempt for an object type is a [`SyncRun`] moving from
//! `in_progress` to `success` or `error`. The watermark of the latest
//! successful run is the incremental filter for the next one.

mod store;
mod tracker;
mod types;

pub use store::{DuckDbStatusStore, MemoryStatusStore, StatusStore};
pub use tracker::SyncStatusTracker;
pub use types::{RunStatus, StartPolicy, SyncRun};
