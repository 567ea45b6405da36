//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands, OutputFormat};
use crate::config::Settings;
use crate::engine::SyncEngine;
use crate::error::{Error, Result};
use crate::source::HubspotClient;
use crate::status::{DuckDbStatusStore, StatusStore, SyncStatusTracker};
use crate::warehouse::{DuckDbWarehouse, Warehouse};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Sync { object, full, id } => match (object, id) {
                (Some(object), Some(id)) => self.sync_record(object, id).await,
                _ => self.sync(object.as_deref(), *full).await,
            },
            Commands::Status { object, limit } => self.status(object.as_deref(), *limit).await,
            Commands::Objects => self.objects(),
            Commands::Schema { object, apply } => self.schema(object, *apply).await,
            Commands::Serve { port } => {
                let engine = open_engine(&self.settings()?)?;
                crate::cli::serve(engine, *port).await
            }
        }
    }

    /// Settings from the file and environment, validated
    fn settings(&self) -> Result<Settings> {
        Settings::load(self.cli.config.as_deref())
    }

    /// Settings without validation, for commands that never call the source
    fn local_settings(&self) -> Result<Settings> {
        let mut settings = match &self.cli.config {
            Some(path) => Settings::from_file(path)?,
            None => Settings::default(),
        };
        settings.apply_env(|name| std::env::var(name).ok());
        Ok(settings)
    }

    async fn sync(&self, object: Option<&str>, full: bool) -> Result<()> {
        let engine = open_engine(&self.settings()?)?;
        let summary = engine.run(object, full).await?;
        self.output(&summary);

        if summary.failed() > 0 {
            return Err(Error::Other(format!(
                "{} of {} object types failed",
                summary.failed(),
                summary.reports.len()
            )));
        }
        Ok(())
    }

    async fn sync_record(&self, object: &str, id: &str) -> Result<()> {
        let engine = open_engine(&self.settings()?)?;
        match engine.sync_record(object, id).await? {
            Some(report) => self.output(&json!({
                "object_type": object,
                "id": id,
                "load": report,
            })),
            None => {
                return Err(Error::Other(format!(
                    "{object} record '{id}' not found in source"
                )))
            }
        }
        Ok(())
    }

    async fn status(&self, object: Option<&str>, limit: usize) -> Result<()> {
        let settings = self.local_settings()?;
        let tracker = open_tracker(&settings)?;
        let runs = tracker.recent(object, limit).await?;
        self.output(&runs);
        Ok(())
    }

    fn objects(&self) -> Result<()> {
        let settings = self.local_settings()?;
        let objects: Vec<_> = settings
            .catalog()
            .iter()
            .map(|spec| {
                json!({
                    "name": spec.name,
                    "table": spec.table_name(),
                    "endpoint": spec.endpoint,
                    "key_field": spec.key_field,
                    "incremental": spec.supports_incremental,
                })
            })
            .collect();
        self.output(&objects);
        Ok(())
    }

    async fn schema(&self, object: &str, apply: bool) -> Result<()> {
        let engine = open_engine(&self.settings()?)?;
        if apply {
            let change = engine.declare_schema(object).await?;
            self.output(&change);
        } else {
            let fields = engine.property_fields(object).await?;
            self.output(&json!({
                "object_type": object,
                "fields": fields,
            }));
        }
        Ok(())
    }

    /// Print a value in the selected format
    fn output<T: Serialize>(&self, value: &T) {
        let rendered = match self.cli.format {
            OutputFormat::Json => serde_json::to_string(value),
            OutputFormat::Pretty => serde_json::to_string_pretty(value),
        };
        println!("{}", rendered.unwrap_or_default());
    }
}

/// Open the warehouse described by the settings
pub fn open_warehouse(settings: &Settings) -> Result<DuckDbWarehouse> {
    let dataset = &settings.warehouse.dataset;
    match &settings.warehouse.path {
        Some(path) => {
            info!(path = %path.display(), dataset = %dataset, "Opening warehouse");
            DuckDbWarehouse::open(path, dataset)
        }
        None => DuckDbWarehouse::in_memory(dataset),
    }
}

/// Open the status tracker described by the settings
pub fn open_tracker(settings: &Settings) -> Result<SyncStatusTracker> {
    let store: Arc<dyn StatusStore> = match &settings.status.path {
        Some(path) => Arc::new(DuckDbStatusStore::open(path)?),
        None => Arc::new(DuckDbStatusStore::in_memory()?),
    };
    Ok(SyncStatusTracker::new(store).with_policy(settings.status.start_policy))
}

/// Build an engine from validated settings
pub fn open_engine(settings: &Settings) -> Result<SyncEngine> {
    let source = HubspotClient::from_config(settings.http_config()?)?;
    let warehouse: Arc<dyn Warehouse> = Arc::new(open_warehouse(settings)?);
    let tracker = open_tracker(settings)?;

    Ok(
        SyncEngine::new(Arc::new(source), warehouse, tracker)
            .with_catalog(settings.catalog())
            .with_config(settings.engine_config()),
    )
}
