// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::ref_option)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # hubsync
//!
//! Incremental HubSpot CRM to warehouse synchronization.
//!
//! ## Features
//!
//! - **Incremental Sync**: Fetch only records modified after the last successful run
//! - **Search Windows**: Restart searches before the 10,000 result ceiling
//! - **Rate Limiting**: Sliding-window admission per endpoint class
//! - **Flattening**: Nested records become flat rows with inferred column types
//! - **Additive Schema Evolution**: Columns are added, never changed or dropped
//! - **Idempotent Upserts**: Stage-then-merge on the record key
//! - **Run History**: Every run is recorded with its watermark or error
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hubsync::config::Settings;
//! use hubsync::cli::open_engine;
//!
//! #[tokio::main]
//! async fn main() -> hubsync::Result<()> {
//!     let settings = Settings::load(None)?;
//!     let engine = open_engine(&settings)?;
//!
//!     let summary = engine.run(Some("contacts"), false).await?;
//!     println!("{} rows loaded", summary.rows_loaded());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          SyncEngine                             │
//! │  run(object_type?, full_sync) → RunSummary                      │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌──────────┬───────────┬───────┴───────┬───────────┬─────────────┐
//! │  Source  │   Fetch   │    Flatten    │  Schema   │   Upsert    │
//! ├──────────┼───────────┼───────────────┼───────────┼─────────────┤
//! │ HubSpot  │ Cursor    │ Containers    │ Inference │ Stage       │
//! │ Retry    │ Windows   │ Sanitize      │ Additive  │ Coerce      │
//! │ Rate     │ Incr.     │ Timestamps    │ patches   │ Merge       │
//! │ Limit    │ filter    │               │           │             │
//! └──────────┴───────────┴───────────────┴───────────┴─────────────┘
//!                                │
//!            ┌───────────────────┴───────────────────┐
//!            │ Warehouse (DuckDB)   Status (DuckDB)  │
//!            └───────────────────────────────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Common types and type aliases
pub mod types;

/// Dynamic field values
pub mod value;

/// HTTP client with retry and rate limiting
pub mod http;

/// Source API clients and the object catalog
pub mod source;

/// Paginated fetch with search windows
pub mod fetch;

/// Record flattening
pub mod flatten;

/// Column types, inference, and additive evolution
pub mod schema;

/// Destination warehouse
pub mod warehouse;

/// Stage-then-merge loading
pub mod upsert;

/// Sync run history
pub mod status;

/// Per-object sync pipeline
pub mod engine;

/// Settings
pub mod config;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

pub use engine::{EngineConfig, RunSummary, SyncEngine, SyncReport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
