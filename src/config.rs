//! Configuration types.

use std::time::Duration;

use reqwest::Url;

use crate::error::ConfigError;

/// Environment variable holding the remote service base URL.
pub const API_URL_ENV: &str = "CLOAK_API_URL";

/// Base URL used when `CLOAK_API_URL` is not set.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the remote job service.
    pub base_url: Url,
    /// Interval between status polls while a job is processing.
    pub poll_interval: Duration,
    /// Interval between progress estimator ticks.
    pub estimate_interval: Duration,
    /// Interval between elapsed-time recomputations.
    pub elapsed_interval: Duration,
}

impl ClientConfig {
    /// Build a config pointing at `base_url` with the default intervals.
    pub fn with_base_url(base_url: &str) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url).map_err(|e| ConfigError::InvalidValue {
            key: API_URL_ENV.to_string(),
            message: format!("{base_url:?}: {e}"),
        })?;

        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidValue {
                key: API_URL_ENV.to_string(),
                message: format!("{base_url} cannot be used as a base URL"),
            });
        }

        Ok(Self {
            base_url,
            ..Self::default()
        })
    }

    /// Build config from the environment. Only the base URL is configurable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url =
            std::env::var(API_URL_ENV).unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        Self::with_base_url(base_url.trim())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_API_URL).expect("DEFAULT_API_URL is a valid URL"),
            poll_interval: Duration::from_secs(2),
            estimate_interval: Duration::from_millis(500),
            elapsed_interval: Duration::from_secs(1),
        }
    }
}
