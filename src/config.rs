//! Application configuration loaded from environment variables.
//!
//! Loaded once at process start and handed to the composition root.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Story backend base URL (no trailing slash)
    pub api_url: String,
    /// Bound on every backend round-trip
    pub http_timeout: Duration,
    /// Bound on a full login (provider handshake and backend sync each)
    pub auth_timeout: Duration,
    /// Clock skew tolerated when checking credential expiry
    pub clock_skew_secs: i64,
    /// Where the sealed credential file lives
    pub token_store_path: PathBuf,
    /// Device key used to seal the credential file
    pub token_seal_key: Vec<u8>,
    /// Product identifiers offered in the store
    pub product_ids: Vec<String>,
    /// Reconciler retry policy for outstanding credit grants
    pub reconcile: ReconcileSettings,
}

/// Backoff policy for re-driving credit grants that the backend has not yet confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// First retry delay
    pub retry_base: Duration,
    /// Ceiling for the exponential backoff
    pub retry_max: Duration,
    /// How often the reconciler looks for due retries
    pub tick: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            retry_base: Duration::from_secs(30),
            retry_max: Duration::from_secs(30 * 60),
            tick: Duration::from_secs(15),
        }
    }
}

impl ReconcileSettings {
    /// Delay before the next attempt after `attempts` failures.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts.min(16)).unwrap_or(u32::MAX);
        self.retry_base
            .checked_mul(factor)
            .unwrap_or(self.retry_max)
            .min(self.retry_max)
    }
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            http_timeout: Duration::from_secs(15),
            auth_timeout: Duration::from_secs(60),
            clock_skew_secs: 60,
            token_store_path: PathBuf::from(".fable/credentials.json"),
            token_seal_key: b"test_seal_key_32_bytes_minimum!!".to_vec(),
            product_ids: vec![
                "com.app.plus".to_string(),
                "com.app.credits.small".to_string(),
            ],
            reconcile: ReconcileSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = ReconcileSettings::default();

        Ok(Self {
            api_url: env::var("FABLE_API_URL")
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .map_err(|_| ConfigError::Missing("FABLE_API_URL"))?,
            http_timeout: secs_var("FABLE_HTTP_TIMEOUT_SECS", 15)?,
            auth_timeout: secs_var("FABLE_AUTH_TIMEOUT_SECS", 60)?,
            clock_skew_secs: env::var("FABLE_CLOCK_SKEW_SECS")
                .ok()
                .map(|v| {
                    v.trim()
                        .parse()
                        .map_err(|_| ConfigError::Invalid("FABLE_CLOCK_SKEW_SECS", v))
                })
                .transpose()?
                .unwrap_or(60),
            token_store_path: env::var("FABLE_TOKEN_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".fable/credentials.json")),
            token_seal_key: env::var("FABLE_TOKEN_SEAL_KEY")
                .map_err(|_| ConfigError::Missing("FABLE_TOKEN_SEAL_KEY"))?
                .into_bytes(),
            product_ids: env::var("FABLE_PRODUCT_IDS")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),
            reconcile: ReconcileSettings {
                retry_base: secs_var(
                    "FABLE_RECONCILE_RETRY_BASE_SECS",
                    defaults.retry_base.as_secs(),
                )?,
                retry_max: secs_var(
                    "FABLE_RECONCILE_RETRY_MAX_SECS",
                    defaults.retry_max.as_secs(),
                )?,
                tick: secs_var("FABLE_RECONCILE_TICK_SECS", defaults.tick.as_secs())?,
            },
        })
    }
}

fn secs_var(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid(name, raw)),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}
