//! Paginated fetch orchestrator
//!
//! Drives a [`SourceClient`](crate::source::SourceClient) through pages and
//! search windows, yielding one continuous record stream per object type.
//!
//! - Full mode pages with no time filter
//! - Incremental mode filters on the server (search endpoints) or on the
//!   client (list and legacy endpoints)
//! - Search windows restart before the hard result ceiling
//! - A failed page is retried with the same cursor; repeated failures, or an
//!   auth/config error, end the fetch with an error

mod orchestrator;
mod types;

pub use orchestrator::{fetch_all, RecordStream};
pub use types::{FetchConfig, FetchOutcome, FetchReport, FetchedPage};
