//! CLI module
//!
//! Command-line interface for running syncs.
//!
//! # Commands
//!
//! - `sync` - Sync one object type or the whole catalog
//! - `status` - Show recent sync runs
//! - `objects` - List the object catalog
//! - `schema` - Preview or apply property-declared columns
//! - `serve` - Start the HTTP trigger server

mod commands;
mod runner;
mod server;

pub use commands::{Cli, Commands, OutputFormat};
pub use runner::{open_engine, Runner};
pub use server::{router, serve, AppState};
