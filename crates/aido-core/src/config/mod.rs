//! Client configuration.
//!
//! Provides a `ClientConfig` shared by the CLI and any other front end to
//! locate the task API and tune sync timing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::MAX_RETRIES;
use crate::util::{is_http_url, normalize_text_option};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_PROBE_PATH: &str = "/api/health";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 10;

/// Environment variable overriding the API base URL.
pub const ENV_API_BASE_URL: &str = "AIDO_API_BASE_URL";
/// Environment variable providing a bearer token.
pub const ENV_TOKEN: &str = "AIDO_TOKEN";
/// Environment variable overriding the local database path.
pub const ENV_DB_PATH: &str = "AIDO_DB_PATH";
/// Environment variable selecting the CLI profile.
pub const ENV_PROFILE: &str = "AIDO_PROFILE";

/// Runtime configuration for talking to the task API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the REST API, without trailing slash
    pub api_base_url: String,
    /// Upper bound for a single REST call; exceeding it is a failure
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Period of the background sync timer
    #[serde(with = "duration_secs")]
    pub sync_interval: Duration,
    /// Period of the connectivity probe
    #[serde(with = "duration_secs")]
    pub probe_interval: Duration,
    /// Path requested by the reachability probe
    pub probe_path: String,
    /// Failed attempts before an operation is dropped
    pub max_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            probe_interval: Duration::from_secs(DEFAULT_PROBE_INTERVAL_SECS),
            probe_path: DEFAULT_PROBE_PATH.to_string(),
            max_retries: MAX_RETRIES,
        }
    }
}

impl ClientConfig {
    /// Config pointing at `api_base_url` with default timings.
    pub fn for_base_url(api_base_url: &str) -> Result<Self> {
        Ok(Self {
            api_base_url: normalize_base_url(api_base_url)?,
            ..Self::default()
        })
    }

    /// Apply `AIDO_API_BASE_URL` when it is set.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(std::env::var(ENV_API_BASE_URL).ok())
    }

    /// Apply an optional base URL override.
    pub fn with_overrides(mut self, api_base_url: Option<String>) -> Result<Self> {
        if let Some(url) = normalize_text_option(api_base_url) {
            self.api_base_url = normalize_base_url(&url)?;
        }
        Ok(self)
    }

    /// Check values that cannot be expressed by the types alone.
    pub fn validate(&self) -> Result<()> {
        normalize_base_url(&self.api_base_url)?;
        if self.request_timeout.is_zero() {
            return Err(Error::InvalidConfiguration(
                "request_timeout must be greater than zero".to_string(),
            ));
        }
        if self.sync_interval.is_zero() || self.probe_interval.is_zero() {
            return Err(Error::InvalidConfiguration(
                "sync and probe intervals must be greater than zero".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(Error::InvalidConfiguration(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Absolute URL for an API path such as `/api/tasks`.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.api_base_url)
        } else {
            format!("{}/{path}", self.api_base_url)
        }
    }

    /// Absolute URL of the connectivity probe.
    #[must_use]
    pub fn probe_url(&self) -> String {
        self.url(&self.probe_path)
    }
}

/// Trim and validate an API base URL, dropping any trailing slash.
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let value = normalize_text_option(Some(raw.to_string())).ok_or_else(|| {
        Error::InvalidConfiguration("API base URL must not be empty".to_string())
    })?;
    if !is_http_url(&value) {
        return Err(Error::InvalidConfiguration(format!(
            "API base URL '{value}' must include http:// or https://"
        )));
    }
    Ok(value.trim_end_matches('/').to_string())
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
