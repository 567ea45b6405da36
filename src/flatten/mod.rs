//! Record flattening
//!
//! Source records are nested mappings with a property bag under a container
//! key. The flattener lifts container properties to the top level, joins
//! deeper paths, serializes arrays, sanitizes names, infers column types, and
//! stamps every row with the synchronization time.

mod flattener;
mod types;

pub use flattener::Flattener;
pub use types::{FlatRecord, FlattenReport, FlattenRules, FlattenedBatch, PendingBatch};

#[cfg(test)]
mod tests;
