//! Settings for hubsync
//!
//! Settings come from an optional YAML file; every section and field has a
//! default. Environment variables override the file:
//!
//! - `HUBSPOT_ACCESS_TOKEN` - private-app token (required)
//! - `HUBSPOT_BASE_URL` - API base URL
//! - `HUBSYNC_DUCKDB_PATH` - warehouse database file
//! - `HUBSYNC_STATUS_PATH` - status database file

use crate::engine::EngineConfig;
use crate::error::{Error, Result};
use crate::fetch::FetchConfig;
use crate::flatten::FlattenRules;
use crate::http::{HttpClientConfig, RateLimiterConfig, RateWindowConfig};
use crate::source::{default_catalog, ObjectSpec};
use crate::status::StartPolicy;
use crate::types::{BackoffType, EndpointClass, OptionStringExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const ENV_ACCESS_TOKEN: &str = "HUBSPOT_ACCESS_TOKEN";
pub const ENV_BASE_URL: &str = "HUBSPOT_BASE_URL";
pub const ENV_DUCKDB_PATH: &str = "HUBSYNC_DUCKDB_PATH";
pub const ENV_STATUS_PATH: &str = "HUBSYNC_STATUS_PATH";

// ============================================================================
// Top-Level Settings
// ============================================================================

/// Complete settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Source API connection
    pub source: SourceSettings,

    /// Sliding-window limits per endpoint class
    pub rate_limits: HashMap<EndpointClass, RateLimitSettings>,

    /// Pagination
    pub fetch: FetchConfig,

    /// Flattening and naming
    pub flatten: FlattenRules,

    /// Load batching
    pub sync: SyncSettings,

    /// Destination database
    pub warehouse: WarehouseSettings,

    /// Run history database
    pub status: StatusSettings,

    /// Object catalog; empty means the built-in HubSpot catalog
    pub objects: Vec<ObjectSpec>,
}

// ============================================================================
// Sections
// ============================================================================

/// Source API connection settings
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub base_url: String,

    /// Usually supplied through `HUBSPOT_ACCESS_TOKEN`
    #[serde(skip_serializing)]
    pub access_token: Option<String>,

    pub timeout_secs: u64,

    /// Total attempts for retryable failures
    pub max_attempts: u32,

    pub backoff: BackoffType,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,

    /// Delay after a 429 without `Retry-After`
    pub rate_limit_backoff_secs: u64,
    pub max_rate_limit_retries: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.hubapi.com".to_string(),
            access_token: None,
            timeout_secs: 30,
            max_attempts: 3,
            backoff: BackoffType::Exponential,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            rate_limit_backoff_secs: 10,
            max_rate_limit_retries: 5,
        }
    }
}

impl std::fmt::Debug for SourceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSettings")
            .field("base_url", &self.base_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

/// Capacity of one endpoint class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub capacity: u32,
    pub window_secs: u64,
}

/// Load batching settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Flattened records buffered per staged load
    pub load_batch_size: usize,

    /// Declare columns from property metadata before loading
    pub declare_properties: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            load_batch_size: engine.load_batch_size,
            declare_properties: engine.declare_properties,
        }
    }
}

/// Destination database settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseSettings {
    /// DuckDB file; `None` keeps the warehouse in memory
    pub path: Option<PathBuf>,

    /// Schema holding the destination tables
    pub dataset: String,
}

impl Default for WarehouseSettings {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("hubsync.duckdb")),
            dataset: "hubspot".to_string(),
        }
    }
}

/// Run history settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSettings {
    /// DuckDB file; `None` keeps history in memory
    pub path: Option<PathBuf>,

    pub start_policy: StartPolicy,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("hubsync_status.duckdb")),
            start_policy: StartPolicy::default(),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Settings {
    /// Parse settings from YAML without environment overrides
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("Failed to parse settings YAML: {e}")))
    }

    /// Read a settings file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                Error::config(format!(
                    "Failed to read settings file '{}': {e}",
                    path.display()
                ))
            }
        })?;
        Self::from_yaml(&content)
    }

    /// Load, apply process environment overrides, and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|name| std::env::var(name).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Apply overrides from an environment lookup
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(ENV_ACCESS_TOKEN).none_if_empty() {
            self.source.access_token = Some(token);
        }
        if let Some(url) = lookup(ENV_BASE_URL).none_if_empty() {
            self.source.base_url = url;
        }
        if let Some(path) = lookup(ENV_DUCKDB_PATH).none_if_empty() {
            self.warehouse.path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup(ENV_STATUS_PATH).none_if_empty() {
            self.status.path = Some(PathBuf::from(path));
        }
    }

    /// Check settings before any work starts
    pub fn validate(&self) -> Result<()> {
        if self
            .source
            .access_token
            .as_deref()
            .map_or(true, |t| t.trim().is_empty())
        {
            return Err(Error::missing_credentials(ENV_ACCESS_TOKEN));
        }

        let url = Url::parse(&self.source.base_url)
            .map_err(|e| Error::invalid_value("source.base_url", e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::invalid_value(
                "source.base_url",
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }

        if self.fetch.restart_threshold == 0
            || self.fetch.restart_threshold >= self.fetch.ceiling
        {
            return Err(Error::invalid_value(
                "fetch.restart_threshold",
                format!(
                    "must be between 1 and the ceiling ({}), got {}",
                    self.fetch.ceiling, self.fetch.restart_threshold
                ),
            ));
        }

        for (class, limit) in &self.rate_limits {
            if limit.capacity == 0 || limit.window_secs == 0 {
                return Err(Error::invalid_value(
                    format!("rate_limits.{class}"),
                    "capacity and window_secs must be positive",
                ));
            }
        }

        if self.flatten.separator.is_empty() {
            return Err(Error::invalid_value("flatten.separator", "cannot be empty"));
        }
        if self.flatten.max_name_len == 0 {
            return Err(Error::invalid_value("flatten.max_name_len", "must be positive"));
        }

        if let (Some(warehouse), Some(status)) = (&self.warehouse.path, &self.status.path) {
            if warehouse == status {
                return Err(Error::invalid_value(
                    "status.path",
                    "must differ from warehouse.path",
                ));
            }
        }

        let mut names = HashSet::new();
        for spec in &self.objects {
            if spec.name.is_empty() {
                return Err(Error::config("Object name cannot be empty"));
            }
            if !names.insert(spec.name.as_str()) {
                return Err(Error::config(format!(
                    "Duplicate object type '{}'",
                    spec.name
                )));
            }
        }

        Ok(())
    }

    // ========================================================================
    // Derived configuration
    // ========================================================================

    /// Object catalog in processing order
    pub fn catalog(&self) -> Vec<ObjectSpec> {
        if self.objects.is_empty() {
            default_catalog()
        } else {
            self.objects.clone()
        }
    }

    /// Rate limiter windows with overrides applied
    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        self.rate_limits
            .iter()
            .fold(RateLimiterConfig::default(), |config, (class, limit)| {
                config.with_class(
                    *class,
                    RateWindowConfig::new(limit.capacity, Duration::from_secs(limit.window_secs)),
                )
            })
    }

    /// HTTP client configuration for the source
    pub fn http_config(&self) -> Result<HttpClientConfig> {
        let token = self
            .source
            .access_token
            .clone()
            .none_if_empty()
            .ok_or_else(|| Error::missing_credentials(ENV_ACCESS_TOKEN))?;

        Ok(HttpClientConfig::builder()
            .base_url(self.source.base_url.trim_end_matches('/'))
            .timeout(Duration::from_secs(self.source.timeout_secs))
            .max_attempts(self.source.max_attempts)
            .backoff(
                self.source.backoff,
                Duration::from_millis(self.source.initial_backoff_ms),
                Duration::from_millis(self.source.max_backoff_ms),
            )
            .rate_limit_backoff(
                Duration::from_secs(self.source.rate_limit_backoff_secs),
                self.source.max_rate_limit_retries,
            )
            .rate_limit(self.rate_limiter_config())
            .bearer_token(token)
            .build())
    }

    /// Engine configuration
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            fetch: self.fetch,
            flatten: self.flatten.clone(),
            load_batch_size: self.sync.load_batch_size,
            declare_properties: self.sync.declare_properties,
        }
    }
}
