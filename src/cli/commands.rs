//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// HubSpot to warehouse sync
#[derive(Parser, Debug)]
#[command(name = "hubsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Settings file (YAML)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "pretty")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sync object types into the warehouse
    Sync {
        /// Object type to sync (default: every catalogued type)
        #[arg(short, long)]
        object: Option<String>,

        /// Ignore the stored watermark and fetch everything
        #[arg(long)]
        full: bool,

        /// Refresh a single record by id
        #[arg(long, requires = "object", conflicts_with = "full")]
        id: Option<String>,
    },

    /// Show recent sync runs
    Status {
        /// Only runs of this object type
        #[arg(short, long)]
        object: Option<String>,

        /// Maximum runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// List the object catalog
    Objects,

    /// Show the columns property metadata declares for an object type
    Schema {
        /// Object type
        #[arg(short, long)]
        object: String,

        /// Create the table and add the columns
        #[arg(long)]
        apply: bool,
    },

    /// Start HTTP server mode
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// One JSON document per line
    Json,
    /// Indented JSON
    Pretty,
}
