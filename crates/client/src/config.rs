//! Station configuration.
//!
//! Everything has a default except the API URL, which defaults to a local
//! development server. Values come from `STOCKTAKE_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use stocktake_core::DeviceId;
use stocktake_events::DEFAULT_HISTORY_CAPACITY;
use stocktake_observability::LogFormat;
use stocktake_scanning::{DecoderConfig, MIN_BARCODE_LEN, ProgressionConfig};
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_ACTIVITY_CHANNEL: &str = "activity";
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub auth_token: Option<String>,
    /// Overrides the id persisted in the local store.
    pub device_id: Option<DeviceId>,
    /// Location used by `:start` when none is typed.
    pub default_location: Option<String>,
    /// `None` uses the platform data directory.
    pub store_path: Option<PathBuf>,
    pub log_format: LogFormat,
    pub decoder: DecoderConfig,
    pub progression: ProgressionConfig,
    pub history_capacity: usize,
    pub activity_channel: String,
    pub reconcile_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            auth_token: None,
            device_id: None,
            default_location: None,
            store_path: None,
            log_format: LogFormat::default(),
            decoder: DecoderConfig::default(),
            progression: ProgressionConfig::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            activity_channel: DEFAULT_ACTIVITY_CHANNEL.to_string(),
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(url) = get("STOCKTAKE_API_URL") {
            config.api_url = url;
        }
        config.auth_token = get("STOCKTAKE_AUTH_TOKEN");
        config.default_location = get("STOCKTAKE_LOCATION");
        config.store_path = get("STOCKTAKE_STORE_PATH").map(PathBuf::from);

        if let Some(raw) = get("STOCKTAKE_DEVICE_ID") {
            let id = raw
                .parse::<DeviceId>()
                .map_err(|e| ConfigError::invalid("STOCKTAKE_DEVICE_ID", e.to_string()))?;
            config.device_id = Some(id);
        }
        if let Some(raw) = get("STOCKTAKE_LOG_FORMAT") {
            config.log_format = raw
                .parse()
                .map_err(|e: String| ConfigError::invalid("STOCKTAKE_LOG_FORMAT", e))?;
        }
        if let Some(ms) = parse_millis(&get, "STOCKTAKE_KEYSTROKE_GAP_MS")? {
            config.decoder.max_keystroke_gap = ms;
        }
        if let Some(ms) = parse_millis(&get, "STOCKTAKE_RECONCILE_TIMEOUT_MS")? {
            config.reconcile_timeout = ms;
        }
        if let Some(ms) = parse_millis(&get, "STOCKTAKE_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = ms;
        }
        if let Some(raw) = get("STOCKTAKE_HISTORY_CAPACITY") {
            config.history_capacity = raw.parse().map_err(|_| {
                ConfigError::invalid("STOCKTAKE_HISTORY_CAPACITY", format!("not a number: {raw}"))
            })?;
        }
        if let Some(channel) = get("STOCKTAKE_ACTIVITY_CHANNEL") {
            config.activity_channel = channel;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "STOCKTAKE_API_URL",
                format!("expected an http(s) URL, got {}", self.api_url),
            ));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::invalid(
                "STOCKTAKE_HISTORY_CAPACITY",
                "must be at least 1",
            ));
        }
        if self.decoder.min_length < MIN_BARCODE_LEN {
            return Err(ConfigError::invalid(
                "min_length",
                format!("must be at least {MIN_BARCODE_LEN}"),
            ));
        }
        Ok(())
    }

    /// API URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_device_id(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }
}

fn parse_millis<G>(get: &G, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ConfigError::invalid(key, format!("expected milliseconds, got {raw}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_station_tunables() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.decoder.max_keystroke_gap, Duration::from_millis(100));
        assert_eq!(config.decoder.min_length, 3);
        assert_eq!(config.history_capacity, 50);
        assert_eq!(config.progression.xp_per_scan, 10);
        assert_eq!(config.progression.starting_level, 1);
        assert_eq!(config.reconcile_timeout, Duration::from_secs(5));
        assert_eq!(config.activity_channel, "activity");
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn environment_overrides_are_applied() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("STOCKTAKE_API_URL", "https://stock.example.com/api/"),
            ("STOCKTAKE_AUTH_TOKEN", "tok"),
            ("STOCKTAKE_LOCATION", "Bay 3"),
            ("STOCKTAKE_RECONCILE_TIMEOUT_MS", "250"),
            ("STOCKTAKE_LOG_FORMAT", "compact"),
        ]))
        .unwrap();

        assert_eq!(config.base_url(), "https://stock.example.com/api");
        assert_eq!(config.auth_token.as_deref(), Some("tok"));
        assert_eq!(config.default_location.as_deref(), Some("Bay 3"));
        assert_eq!(config.reconcile_timeout, Duration::from_millis(250));
        assert_eq!(config.log_format, LogFormat::Compact);
    }

    #[test]
    fn invalid_values_are_reported_with_their_key() {
        let cases = [
            ("STOCKTAKE_API_URL", "ftp://x"),
            ("STOCKTAKE_HISTORY_CAPACITY", "0"),
            ("STOCKTAKE_KEYSTROKE_GAP_MS", "fast"),
        ];
        for (key, value) in cases {
            match ClientConfig::from_lookup(lookup(&[(key, value)])) {
                Err(ConfigError::Invalid { key: reported, .. }) => assert_eq!(reported, key),
                other => panic!("Expected {key} to be rejected, got {other:?}"),
            }
        }
    }
}
