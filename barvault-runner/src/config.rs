//! Ingestion run configuration, loaded from TOML.
//!
//! ```toml
//! [ingest]
//! symbols = ["AAPL", "MSFT"]
//! start = "2024-01-15T14:30:00Z"
//! end = "2024-01-16T21:00:00Z"
//! timeframe = "1m"
//! workers = 4
//!
//! [storage]
//! root = "data/bars"
//! compression = "zstd"
//!
//! [provider]
//! kind = "alpaca"
//! api_key_env = "APCA_API_KEY_ID"
//! api_secret_env = "APCA_API_SECRET_KEY"
//! feed = "iex"
//! ```
//!
//! Credentials named by `*_env` are resolved once, in [`IngestConfig::client_config`].
//! Nothing below this layer reads the process environment.

use barvault_core::connector::{
    Adjustment, ClientConfig, ConnectorError, Feed, ProviderKind, VendorOptions,
};
use barvault_core::domain::{JobId, TimeWindow, Timeframe, WindowError};
use barvault_core::storage::layout::{normalize_symbol, validate_symbol};
use barvault_core::storage::StorageConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default checkpoint database, relative to the storage root.
pub const DEFAULT_CHECKPOINT_FILE: &str = "_checkpoints.sqlite";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no symbols to ingest")]
    NoSymbols,

    #[error("symbol '{0}' is listed more than once")]
    DuplicateSymbol(String),

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("workers must be at least 1")]
    ZeroWorkers,

    #[error("batch_size must be at least 1")]
    ZeroBatchSize,

    #[error(transparent)]
    Window(#[from] WindowError),

    #[error("storage root {path} is unusable: {reason}")]
    StorageRoot { path: PathBuf, reason: String },

    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error(transparent)]
    Provider(#[from] ConnectorError),
}

/// Everything a single `run_ingest` call needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub ingest: IngestSection,
    pub storage: StorageSection,
    #[serde(default)]
    pub checkpoint: CheckpointSection,
    pub provider: ProviderSection,
}

/// What to fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSection {
    pub symbols: Vec<String>,
    /// Window start (inclusive, RFC 3339).
    pub start: DateTime<Utc>,
    /// Window end (inclusive, RFC 3339).
    pub end: DateTime<Utc>,
    #[serde(default = "default_timeframe")]
    pub timeframe: Timeframe,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Bars requested per vendor page.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Explicit job id; derived from the run parameters when absent.
    #[serde(default)]
    pub job_id: Option<JobId>,
}

/// Where bars land.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    pub root: PathBuf,
    #[serde(flatten)]
    pub settings: StorageConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointSection {
    /// SQLite file; defaults to `<storage.root>/_checkpoints.sqlite`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Vendor selection and connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderSection {
    pub kind: ProviderKind,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default)]
    pub api_secret_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Alpaca source feed; plans without SIP access need `iex`.
    #[serde(default)]
    pub feed: Option<Feed>,
    /// Alpaca corporate action adjustment.
    #[serde(default)]
    pub adjustment: Option<Adjustment>,
    /// Polygon split adjustment.
    #[serde(default)]
    pub adjusted: Option<bool>,
}

impl ProviderSection {
    pub fn vendor_options(&self) -> VendorOptions {
        VendorOptions {
            feed: self.feed,
            adjustment: self.adjustment,
            adjusted: self.adjusted,
        }
    }
}

impl fmt::Debug for ProviderSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("ProviderSection")
            .field("kind", &self.kind)
            .field("api_key", &redact(&self.api_key))
            .field("api_key_env", &self.api_key_env)
            .field("api_secret", &redact(&self.api_secret))
            .field("api_secret_env", &self.api_secret_env)
            .field("base_url", &self.base_url)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("user_agent", &self.user_agent)
            .field("feed", &self.feed)
            .field("adjustment", &self.adjustment)
            .field("adjusted", &self.adjusted)
            .finish()
    }
}

fn default_timeframe() -> Timeframe {
    Timeframe::minutes(1)
}

fn default_workers() -> usize {
    4
}

fn default_batch_size() -> u32 {
    10_000
}

fn default_requests_per_minute() -> u32 {
    200
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    5
}

impl IngestConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject anything that would make the whole run pointless.
    ///
    /// Runs before any unit is scheduled; per-symbol problems found later
    /// (vendor errors, bad rows) are reported in the run summary instead.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ingest = &self.ingest;
        if ingest.symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }
        let mut seen = HashSet::new();
        for symbol in &ingest.symbols {
            let canonical = normalize_symbol(symbol);
            validate_symbol(&canonical).map_err(|e| ConfigError::InvalidSymbol(e.to_string()))?;
            if !seen.insert(canonical) {
                return Err(ConfigError::DuplicateSymbol(symbol.clone()));
            }
        }
        if ingest.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if ingest.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        self.window()?;
        self.provider.vendor_options().check(self.provider.kind)?;
        self.check_storage_root()
    }

    pub fn window(&self) -> Result<TimeWindow, ConfigError> {
        Ok(TimeWindow::from_datetimes(self.ingest.start, self.ingest.end)?)
    }

    /// The configured job id, or one derived from provider, timeframe and window.
    pub fn job_id(&self) -> JobId {
        if let Some(id) = &self.ingest.job_id {
            return id.clone();
        }
        JobId::derive([
            self.provider.kind.as_str().to_string(),
            self.ingest.timeframe.to_string(),
            self.ingest.start.to_rfc3339(),
            self.ingest.end.to_rfc3339(),
        ])
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint
            .path
            .clone()
            .unwrap_or_else(|| self.storage.root.join(DEFAULT_CHECKPOINT_FILE))
    }

    /// Connector settings with credentials resolved.
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        self.client_config_with(|name| std::env::var(name).ok())
    }

    /// Like [`client_config`](Self::client_config) with an explicit variable lookup.
    pub fn client_config_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<ClientConfig, ConfigError> {
        let p = &self.provider;
        let api_key = resolve_credential(&p.api_key, &p.api_key_env, &lookup)?.ok_or_else(|| {
            ConfigError::MissingCredential(format!(
                "{} needs provider.api_key or provider.api_key_env",
                p.kind
            ))
        })?;
        let base_url = p
            .base_url
            .clone()
            .unwrap_or_else(|| p.kind.default_base_url().to_string());

        let mut config = ClientConfig::new(api_key, base_url)
            .with_requests_per_minute(p.requests_per_minute)
            .with_timeout(Duration::from_secs(p.timeout_secs))
            .with_max_retries(p.max_retries)
            .with_page_limit(self.ingest.batch_size);
        if let Some(secret) = resolve_credential(&p.api_secret, &p.api_secret_env, &lookup)? {
            config = config.with_secret(secret);
        }
        if let Some(agent) = &p.user_agent {
            config = config.with_user_agent(agent.clone());
        }
        Ok(config)
    }

    fn check_storage_root(&self) -> Result<(), ConfigError> {
        let root = &self.storage.root;
        let unusable = |reason: &str| ConfigError::StorageRoot {
            path: root.clone(),
            reason: reason.to_string(),
        };
        if root.as_os_str().is_empty() {
            return Err(unusable("path is empty"));
        }
        if root.exists() {
            if !root.is_dir() {
                return Err(unusable("exists and is not a directory"));
            }
            return Ok(());
        }
        // Not created yet: the closest existing ancestor must be a directory.
        match root.ancestors().skip(1).find(|p| p.exists()) {
            Some(parent) if !parent.is_dir() => Err(unusable("a parent path is not a directory")),
            _ => Ok(()),
        }
    }
}

/// Inline value wins over the named variable; a named but unset variable is an error.
fn resolve_credential(
    inline: &Option<String>,
    env: &Option<String>,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<Option<String>, ConfigError> {
    if let Some(value) = inline.as_ref().filter(|v| !v.is_empty()) {
        return Ok(Some(value.clone()));
    }
    match env {
        Some(name) => match lookup(name).filter(|v| !v.is_empty()) {
            Some(value) => Ok(Some(value)),
            None => Err(ConfigError::MissingCredential(format!(
                "environment variable {name} is not set"
            ))),
        },
        None => Ok(None),
    }
}
