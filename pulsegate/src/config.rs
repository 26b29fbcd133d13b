use crate::error::ConfigError;
use log::warn;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "/etc/pulsegate/pulsegate.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub polling: PollingConfig,
    pub window: WindowConfig,
    pub thresholds: Thresholds,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL the poll endpoints and the stream path are resolved against.
    pub base_url: String,
    pub token: Option<String>,
    pub stream_path: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api/system".to_string(),
            token: None,
            stream_path: "/stream".to_string(),
        }
    }
}

impl BackendConfig {
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn stream_url(&self) -> String {
        self.endpoint(&self.stream_path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    /// Cadence used while the push channel is down.
    pub fallback_interval_ms: u64,
    pub fetch_timeout_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            fallback_interval_ms: 5_000,
            fetch_timeout_ms: 5_000,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn fallback_interval(&self) -> Duration {
        Duration::from_millis(self.fallback_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub capacity: usize,
    pub max_events: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            max_events: 500,
        }
    }
}

/// Insight rule thresholds. Percentages are 0-100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub success_rate_good: f64,
    pub queue_backlog: u32,
    pub slow_response_ms: f64,
    pub cpu_pressure_pct: f64,
    pub mem_pressure_pct: f64,
    /// Minimum analysis confidence counted as "high".
    pub high_confidence: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            success_rate_good: 85.0,
            queue_backlog: 5,
            slow_response_ms: 2000.0,
            cpu_pressure_pct: 80.0,
            mem_pressure_pct: 85.0,
            high_confidence: 80.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from `$PULSEGATE_CONFIG` (or the default path), falling back to
    /// defaults when the file is missing or broken. Environment overrides are
    /// applied either way.
    pub fn load() -> Self {
        let (config, problem) = Self::load_lenient();
        if let Some(err) = problem {
            warn!("[config] {err}; using defaults");
        }
        config
    }

    /// Like [`Config::load`], but hands a broken file's error back instead of
    /// logging it, for callers that install their logger from the result.
    pub fn load_lenient() -> (Self, Option<ConfigError>) {
        let (mut config, problem) = Self::from_path_or_default(&config_path());
        config.apply_env();
        (config, problem)
    }

    /// Defaults when `path` does not exist; defaults plus the error when it
    /// exists but cannot be read or parsed.
    pub fn from_path_or_default(path: &Path) -> (Self, Option<ConfigError>) {
        if !path.exists() {
            return (Self::default(), None);
        }
        match Self::from_path(path) {
            Ok(config) => (config, None),
            Err(err) => (Self::default(), Some(err)),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = env::var("PULSEGATE_URL") {
            self.backend.base_url = url;
        }
        if let Ok(token) = env::var("PULSEGATE_TOKEN") {
            self.backend.token = Some(token).filter(|t| !t.is_empty());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let polling = &self.polling;
        if polling.interval_ms == 0 || polling.fallback_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll intervals must be non-zero".into()));
        }
        if polling.fallback_interval_ms > polling.interval_ms {
            return Err(ConfigError::Invalid(format!(
                "fallback_interval_ms ({}) must not exceed interval_ms ({})",
                polling.fallback_interval_ms, polling.interval_ms
            )));
        }
        if polling.fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid("fetch_timeout_ms must be non-zero".into()));
        }
        if self.window.capacity == 0 || self.window.max_events == 0 {
            return Err(ConfigError::Invalid(
                "window capacity and max_events must be non-zero".into(),
            ));
        }
        if self.backend.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("backend.base_url is empty".into()));
        }
        Ok(())
    }
}

fn config_path() -> PathBuf {
    env::var("PULSEGATE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}
