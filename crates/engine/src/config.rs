use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;

pub const DEFAULT_FRESHNESS_THRESHOLD_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Settings for the offline sync engine.
///
/// Every field has a default, so a partial JSON document (or `{}`) is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// SQLite file for the local cache. `None` keeps everything in memory.
    pub database_path: Option<String>,
    /// Age after which cached data is flagged stale.
    pub freshness_threshold_ms: u64,
    /// Base URL of the REST API, e.g. `https://api.example.com/v1`.
    pub api_base_url: String,
    /// Per-request timeout for the HTTP client.
    pub request_timeout_ms: u64,
    /// Connectivity assumed before the first platform event arrives.
    pub start_online: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            freshness_threshold_ms: DEFAULT_FRESHNESS_THRESHOLD_MS,
            api_base_url: "http://localhost:3000/api".to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            start_online: true,
        }
    }
}

impl SyncConfig {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.freshness_threshold_ms == 0 {
            return Err(EngineError::Config(
                "freshnessThresholdMs must be positive".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(EngineError::Config("requestTimeoutMs must be positive".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
