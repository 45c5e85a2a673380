use url::Url;

use crate::error::{AppError, Result};

use super::{BackoffKind, Config};

/// One day. Anything longer is a typo, not a timeout.
pub const MAX_REQUEST_TIMEOUT_SECS: f64 = 86_400.0;

/// Check a configuration before any component is built from it. Every issue is
/// collected so a bad file can be fixed in one pass.
pub fn validate_config(config: &Config) -> Result<()> {
    let mut issues = Vec::new();

    validate_base_url(&config.base_url, &mut issues);

    if !(config.request_timeout_secs.is_finite() && config.request_timeout_secs > 0.0) {
        issues.push("request_timeout_secs must be a positive number".to_string());
    } else if config.request_timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
        issues.push(format!(
            "request_timeout_secs ({}) must not exceed {}",
            config.request_timeout_secs, MAX_REQUEST_TIMEOUT_SECS
        ));
    }

    if config.max_connections == 0 {
        issues.push("max_connections must be at least 1".to_string());
    }
    if config.max_connections_per_host == 0 {
        issues.push("max_connections_per_host must be at least 1".to_string());
    }
    if config.max_connections_per_host > config.max_connections {
        issues.push(format!(
            "max_connections_per_host ({}) must not exceed max_connections ({})",
            config.max_connections_per_host, config.max_connections
        ));
    }

    if config.retry.backoff == BackoffKind::Exponential
        && config.retry.initial_backoff_ms > config.retry.max_backoff_ms
    {
        issues.push(format!(
            "retry.initial_backoff_ms ({}) must not exceed retry.max_backoff_ms ({})",
            config.retry.initial_backoff_ms, config.retry.max_backoff_ms
        ));
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(AppError::message(format!(
            "invalid configuration: {}",
            issues.join("; ")
        )))
    }
}

fn validate_base_url(base_url: &str, issues: &mut Vec<String>) {
    if base_url.trim().is_empty() {
        issues.push("base_url must not be empty".to_string());
        return;
    }

    match Url::parse(base_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            if url.host_str().is_none() {
                issues.push(format!("base_url `{base_url}` has no host"));
            }
        }
        Ok(url) => issues.push(format!(
            "base_url scheme `{}` is not supported",
            url.scheme()
        )),
        Err(err) => issues.push(format!("base_url `{base_url}` is not a valid URL: {err}")),
    }
}
