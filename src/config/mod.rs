use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Context, Result};
use crate::fetch::retry::{Backoff, RetryPolicy};

pub mod validator;

pub const DEFAULT_BASE_URL: &str = "http://localhost:25500/v3";

/// Runtime settings shared by every component. Built once by the caller and handed
/// down explicitly; nothing reads process-wide state after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub request_timeout_secs: f64,
    pub retry: RetryConfig,
    pub max_connections: usize,
    pub max_connections_per_host: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    None,
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff: BackoffKind,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            backoff: BackoffKind::Exponential,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Config {
    pub fn builtin() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 120.0,
            retry: RetryConfig::default(),
            max_connections: 100,
            max_connections_per_host: 30,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(json).context("failed to parse configuration JSON")?;
        validator::validate_config(&config)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration at {}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        validator::validate_config(self)
    }

    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Out-of-range values (only reachable by skipping `validate`) clamp to the
    /// largest accepted timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_timeout_secs)
            .unwrap_or(Duration::from_secs_f64(validator::MAX_REQUEST_TIMEOUT_SECS))
            .min(Duration::from_secs_f64(validator::MAX_REQUEST_TIMEOUT_SECS))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let initial = Duration::from_millis(self.retry.initial_backoff_ms);
        let backoff = match self.retry.backoff {
            BackoffKind::None => Backoff::None,
            BackoffKind::Fixed => Backoff::Fixed(initial),
            BackoffKind::Exponential => Backoff::Exponential {
                initial,
                max: Duration::from_millis(self.retry.max_backoff_ms),
            },
        };
        RetryPolicy::new(self.retry.max_retries, backoff)
    }

    /// Join a resource path onto the base URL without dropping the base's own path.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
