//! Bulk upsert
//!
//! Batches are written to a uniquely named staging table and merged into the
//! destination on its key column in one set-based statement, so a failed
//! batch never leaves partial rows behind.

mod coerce;
mod loader;
mod merge;

pub use coerce::{coerce, Coerced};
pub use loader::{staging_table_name, BulkLoader, LoadReport};
pub use merge::MergePlan;

#[cfg(test)]
mod tests;
