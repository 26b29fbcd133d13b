//! Metric sources and the adapter that isolates their failures.

pub mod http;
pub mod process;
pub mod security;

use crate::error::FetchError;
use crate::types::{
    AnalysisRecord, DbHealth, LiveEvent, ProcessReport, PromptStats, ResourceSample,
    SecurityScore, Snapshot, SourceStatus, UptimeStats,
};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

pub use http::HttpBackend;

/// One external data source.
#[async_trait]
pub trait MetricSource: Send + Sync {
    type Output: Clone + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    async fn fetch(&self) -> Result<Self::Output, FetchError>;

    /// Placeholder used, marked stale, before the first successful fetch.
    fn fallback(&self) -> Self::Output;
}

/// Wraps a source with a timeout and last-good-value caching. Failures never
/// escape: `poll` always yields a snapshot, stale if the fetch failed.
pub struct SourceAdapter<T> {
    source: Arc<dyn MetricSource<Output = T>>,
    timeout: Duration,
    last_good: Option<Snapshot<T>>,
    last_error: Option<String>,
}

impl<T: Clone + Send + Sync + 'static> SourceAdapter<T> {
    pub fn new(source: Arc<dyn MetricSource<Output = T>>, timeout: Duration) -> Self {
        Self {
            source,
            timeout,
            last_good: None,
            last_error: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.source.name()
    }

    pub async fn poll(&mut self) -> Snapshot<T> {
        let result = match tokio::time::timeout(self.timeout, self.source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        };

        match result {
            Ok(value) => {
                debug!("[source:{}] fetched", self.name());
                let snapshot = Snapshot::fresh(value);
                self.last_good = Some(snapshot.clone());
                self.last_error = None;
                snapshot
            }
            Err(err) => {
                warn!("[source:{}] fetch failed: {err}", self.name());
                self.last_error = Some(err.to_string());
                match &self.last_good {
                    Some(prev) => Snapshot::stale(prev.value.clone(), prev.as_of),
                    None => Snapshot::stale(self.source.fallback(), Utc::now()),
                }
            }
        }
    }

    /// Status after the most recent `poll`.
    pub fn status(&self) -> SourceStatus {
        SourceStatus {
            name: self.name(),
            stale: self.last_error.is_some(),
            as_of: self
                .last_good
                .as_ref()
                .map(|s| s.as_of)
                .unwrap_or_else(Utc::now),
            last_error: self.last_error.clone(),
        }
    }
}

/// The full set of sources the scheduler fans out over.
#[derive(Clone)]
pub struct Sources {
    pub resources: Arc<dyn MetricSource<Output = ResourceSample>>,
    pub processes: Arc<dyn MetricSource<Output = ProcessReport>>,
    pub uptime: Arc<dyn MetricSource<Output = UptimeStats>>,
    pub database: Arc<dyn MetricSource<Output = DbHealth>>,
    pub analysis: Arc<dyn MetricSource<Output = Vec<AnalysisRecord>>>,
    pub prompts: Arc<dyn MetricSource<Output = PromptStats>>,
    pub security: Arc<dyn MetricSource<Output = SecurityScore>>,
    pub logs: Arc<dyn MetricSource<Output = Vec<LiveEvent>>>,
}

impl Sources {
    pub fn http(backend: HttpBackend) -> Self {
        let backend = Arc::new(backend);
        Self {
            resources: Arc::new(http::ResourcesSource::new(Arc::clone(&backend))),
            processes: Arc::new(http::ProcessesSource::new(Arc::clone(&backend))),
            uptime: Arc::new(http::UptimeSource::new(Arc::clone(&backend))),
            database: Arc::new(http::DatabaseSource::new(Arc::clone(&backend))),
            analysis: Arc::new(http::AnalysisHistorySource::new(Arc::clone(&backend))),
            prompts: Arc::new(http::PromptsSource::new(Arc::clone(&backend))),
            security: Arc::new(http::SecuritySource::new(Arc::clone(&backend))),
            logs: Arc::new(http::LogsSource::new(backend)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedSource;
    use super::*;

    fn adapter<T: Clone + Send + Sync + 'static>(
        source: ScriptedSource<T>,
        timeout: Duration,
    ) -> SourceAdapter<T> {
        SourceAdapter::new(Arc::new(source), timeout)
    }

    #[tokio::test]
    async fn fresh_value_is_not_stale() {
        let source = ScriptedSource::always("db", DbHealth { healthy: true });
        let mut adapter = adapter(source, Duration::from_secs(1));

        let snap = adapter.poll().await;
        assert!(!snap.stale);
        assert!(snap.value.healthy);
        assert!(!adapter.status().stale);
    }

    #[tokio::test]
    async fn failure_reuses_previous_value_marked_stale() {
        let source = ScriptedSource::new(
            "uptime",
            UptimeStats::default(),
            vec![
                Ok(UptimeStats {
                    uptime_secs: 120,
                    response_time_ms: 15.0,
                }),
                Err("connection refused".to_string()),
            ],
        );
        let mut adapter = adapter(source, Duration::from_secs(1));

        let first = adapter.poll().await;
        let second = adapter.poll().await;
        assert!(second.stale);
        assert_eq!(second.value.uptime_secs, 120);
        assert_eq!(second.as_of, first.as_of);

        let status = adapter.status();
        assert!(status.stale);
        assert!(status.last_error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn failure_before_any_success_uses_fallback() {
        let source = ScriptedSource::failing("db", DbHealth { healthy: false });
        let mut adapter = adapter(source, Duration::from_secs(1));

        let snap = adapter.poll().await;
        assert!(snap.stale);
        assert!(!snap.value.healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_times_out() {
        let source = ScriptedSource::always("db", DbHealth { healthy: true })
            .with_delay(Duration::from_secs(30));
        let mut adapter = adapter(source, Duration::from_secs(2));

        let snap = adapter.poll().await;
        assert!(snap.stale);
        assert!(adapter.status().last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn recovers_after_failure() {
        let source = ScriptedSource::new(
            "db",
            DbHealth::default(),
            vec![Err("down".to_string()), Ok(DbHealth { healthy: true })],
        );
        let mut adapter = adapter(source, Duration::from_secs(1));

        assert!(adapter.poll().await.stale);
        let snap = adapter.poll().await;
        assert!(!snap.stale);
        assert!(adapter.status().last_error.is_none());
    }
}
