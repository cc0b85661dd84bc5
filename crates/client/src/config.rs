//! Client configuration from environment variables.
//!
//! [`env_or`] is shared with the sync crate's settings so every variable
//! reports parse failures the same way.

use std::str::FromStr;
use std::time::Duration;

use crate::retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES};

/// An environment variable held a value that could not be parsed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{var} must be {expected}, got '{value}'")]
pub struct ConfigError {
    pub var: &'static str,
    pub expected: &'static str,
    pub value: String,
}

/// Read `var` from the environment, falling back to `default` when unset.
pub fn env_or<T: FromStr>(var: &'static str, default: T, expected: &'static str) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError {
            var,
            expected,
            value,
        }),
        Err(_) => Ok(default),
    }
}

/// Persistence client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local dev server.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the application API (default: `http://localhost:3000`).
    pub base_url: String,
    /// Per-request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Backoff policy applied to every call.
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".into(),
            request_timeout_secs: 30,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                 |
    /// |---------------------------|-------------------------|
    /// | `API_BASE_URL`            | `http://localhost:3000` |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                    |
    /// | `API_MAX_RETRIES`         | `3`                     |
    /// | `API_RETRY_BASE_DELAY_MS` | `1000`                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".into());

        let request_timeout_secs = env_or("REQUEST_TIMEOUT_SECS", 30u64, "a valid u64")?;

        let max_retries = env_or("API_MAX_RETRIES", DEFAULT_MAX_RETRIES, "a valid u32")?;

        let base_delay_ms = env_or(
            "API_RETRY_BASE_DELAY_MS",
            DEFAULT_BASE_DELAY.as_millis() as u64,
            "a valid u64",
        )?;

        Ok(Self {
            base_url,
            request_timeout_secs,
            retry: RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(base_delay_ms),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_uses_default_when_unset() {
        let value = env_or("ADCANVAS_TEST_UNSET_VARIABLE", 7u32, "a valid u32").unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn env_or_reports_bad_values() {
        std::env::set_var("ADCANVAS_TEST_BAD_NUMBER", "seven");
        let err = env_or("ADCANVAS_TEST_BAD_NUMBER", 7u32, "a valid u32").unwrap_err();
        assert_eq!(err.to_string(), "ADCANVAS_TEST_BAD_NUMBER must be a valid u32, got 'seven'");
    }

    #[test]
    fn default_retry_matches_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(1000));
    }
}
