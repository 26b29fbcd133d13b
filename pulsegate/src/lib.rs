//! Live telemetry aggregation for the system-monitor dashboard.
//!
//! A [`MonitoringController`] owns a poll scheduler fanning out over the
//! metric sources, a push channel for live log events, the sliding window of
//! resource samples and the KPI/insight layer derived from them. Consumers
//! only ever see [`DashboardView`] copies.

pub mod collectors;
pub mod config;
pub mod controller;
pub mod error;
pub mod insights;
pub mod kpi;
pub mod metrics;
pub mod scheduler;
pub mod stream;
pub mod types;
pub mod window;

pub use config::{BackendConfig, Config, LoggingConfig, PollingConfig, Thresholds, WindowConfig};
pub use controller::{DashboardView, MonitoringController};
pub use error::{ConfigError, FetchError, StreamError};
pub use insights::{Insight, InsightInputs, Severity};
pub use kpi::{DerivedKpi, Trend};
pub use metrics::{Metrics, MetricsSnapshot};
pub use stream::ChannelState;
pub use types::{EventLevel, LiveEvent, ResourceSample, Snapshot, SnapshotSet};
