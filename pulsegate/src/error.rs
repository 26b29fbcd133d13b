use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A single source fetch failed. Always transient from the pipeline's point
/// of view: the adapter marks its value stale and the next tick tries again.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("malformed payload: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// The push channel dropped. Never surfaced to the user; it only switches
/// the scheduler to the fallback cadence.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("connect failed: {0}")]
    Connect(#[from] reqwest::Error),
    #[error("stream endpoint returned status {0}")]
    Status(u16),
    #[error("stream interrupted: {0}")]
    Interrupted(String),
    #[error("stream closed by server")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
