//! Configuration loading and validation
//!
//! The run is described by one JSON file:
//!
//! ```json
//! {
//!   "quota": {
//!     "credentials": [{"id": "primary", "api_key": "AIza..."}],
//!     "daily_limit": 10000,
//!     "on_quota_exhausted": "wait"
//!   },
//!   "cache": {"capacity": 1000, "flush": {"mode": "batched", "every": 50}},
//!   "retry": {"max_attempts": 5, "base_delay_ms": 1000, "max_delay_ms": 30000},
//!   "cutoff": "2018-08-14T00:00:00Z",
//!   "units": [{"name": "Accolonn", "kind": "channel", "remote_id": "UCiYLmBHW28jyTt0vBUFuK5A"}]
//! }
//! ```
//!
//! `quota.on_quota_exhausted` has no default and must be set explicitly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{FlushPolicy, DEFAULT_CAPACITY};
use crate::quota::Credential;
use crate::remote::youtube::DEFAULT_BASE_URL;
use crate::retry::{
    QuotaPolicy, RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_DELAY,
};
use crate::UnitDescriptor;

/// Maximum worker concurrency
pub const MAX_CONCURRENCY: usize = 32;

/// Default quota units per credential per window (YouTube's default project quota)
pub const DEFAULT_DAILY_LIMIT: u64 = 10_000;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config {path}: {message}")]
    IoError {
        /// Config path
        path: PathBuf,
        /// Underlying error
        message: String,
    },

    /// The file is not valid configuration JSON
    #[error("failed to parse config: {0}")]
    ParseError(String),

    /// A value is out of range or inconsistent
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Metadata cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Maximum entries
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Flush policy
    #[serde(default)]
    pub flush: FlushPolicy,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            flush: FlushPolicy::default(),
        }
    }
}

/// One API credential
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Public id used in logs
    pub id: String,
    /// Secret API key
    pub api_key: String,
    /// Per-credential override of `quota.daily_limit`
    #[serde(default)]
    pub daily_limit: Option<u64>,
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("id", &self.id)
            .field("api_key", &"<redacted>")
            .field("daily_limit", &self.daily_limit)
            .finish()
    }
}

/// Quota ledger settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaSettings {
    /// Credentials in preference order
    pub credentials: Vec<CredentialConfig>,
    /// Units per credential per window
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u64,
    /// Quota window length in seconds
    #[serde(default = "default_reset_interval_secs")]
    pub reset_interval_secs: u64,
    /// Behavior once every credential is exhausted (required)
    pub on_quota_exhausted: QuotaPolicy,
}

impl QuotaSettings {
    /// Credentials with their effective limits, in preference order
    pub fn credentials(&self) -> Vec<(Credential, u64)> {
        self.credentials
            .iter()
            .map(|c| {
                (
                    Credential::new(c.id.clone(), c.api_key.clone()),
                    c.daily_limit.unwrap_or(self.daily_limit),
                )
            })
            .collect()
    }

    /// Quota window length
    pub fn reset_interval(&self) -> Duration {
        Duration::from_secs(self.reset_interval_secs)
    }
}

/// Retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts per call
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt (ms)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff cap (ms)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Bound on one attempt (ms)
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

/// Complete run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Metadata cache
    #[serde(default)]
    pub cache: CacheSettings,
    /// Credentials and quota behavior
    pub quota: QuotaSettings,
    /// Retry behavior
    #[serde(default)]
    pub retry: RetrySettings,
    /// Units processed concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Comments last updated before this instant are not ingested
    #[serde(default)]
    pub cutoff: Option<DateTime<Utc>>,
    /// Directory of the durable store (cache and checkpoints)
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Directory of the CSV output
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Records requested per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Remote API base URL
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Configured units
    #[serde(default)]
    pub units: Vec<UnitDescriptor>,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}
fn default_daily_limit() -> u64 {
    DEFAULT_DAILY_LIMIT
}
fn default_reset_interval_secs() -> u64 {
    24 * 60 * 60
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY.as_millis() as u64
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY.as_millis() as u64
}
fn default_call_timeout_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT.as_millis() as u64
}
fn default_concurrency() -> usize {
    4
}
fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}
fn default_page_size() -> u32 {
    100
}
fn default_api_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl IngestConfig {
    /// Read, parse and validate a JSON config file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&contents)
    }

    /// Parse and validate JSON config text
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let config: IngestConfig =
            serde_json::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges and consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid("cache.capacity must be > 0".into()));
        }
        if let FlushPolicy::Batched { every: 0 } = self.cache.flush {
            return Err(ConfigError::Invalid("cache.flush.every must be > 0".into()));
        }
        if self.quota.credentials.is_empty() {
            return Err(ConfigError::Invalid(
                "quota.credentials must list at least one credential".into(),
            ));
        }
        let mut credential_ids = HashSet::new();
        for credential in &self.quota.credentials {
            if credential.api_key.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "credential {} has an empty api_key",
                    credential.id
                )));
            }
            if !credential_ids.insert(credential.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate credential id: {}",
                    credential.id
                )));
            }
        }
        if self.quota.reset_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "quota.reset_interval_secs must be > 0".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be > 0".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.retry.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid("retry.call_timeout_ms must be > 0".into()));
        }
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::Invalid(format!(
                "concurrency must be between 1 and {MAX_CONCURRENCY}, got {}",
                self.concurrency
            )));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be > 0".into()));
        }

        let mut unit_ids = HashSet::new();
        for unit in &self.units {
            if unit.remote_id.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "unit {} has an empty remote_id",
                    unit.name
                )));
            }
            if !unit_ids.insert(unit.id()) {
                return Err(ConfigError::Invalid(format!("duplicate unit: {}", unit.id())));
            }
        }
        Ok(())
    }

    /// Retry policy derived from the settings
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            call_timeout: Duration::from_millis(self.retry.call_timeout_ms),
            on_quota_exhausted: self.quota.on_quota_exhausted,
            jitter: true,
        }
    }
}
