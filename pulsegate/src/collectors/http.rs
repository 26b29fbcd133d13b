use super::MetricSource;
use super::{process, security};
use crate::config::BackendConfig;
use crate::error::FetchError;
use crate::types::{
    AnalysisRecord, DbHealth, LiveEvent, ProcessReport, PromptStats, ResourceSample,
    SecurityScore, UptimeStats,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Shared HTTP plumbing for every poll endpoint.
pub struct HttpBackend {
    client: Client,
    config: BackendConfig,
}

impl HttpBackend {
    pub fn new(config: BackendConfig, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn with_client(client: Client, config: BackendConfig) -> Self {
        Self { client, config }
    }

    async fn get(&self, path: &str) -> Result<Response, FetchError> {
        let url = self.config.endpoint(path);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                status: resp.status().as_u16(),
                url,
            });
        }
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let body = self.get(path).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// List endpoints answer either with a bare array or with the array wrapped
/// in an object.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Bare(Vec<T>),
    Wrapped(Wrapped<T>),
}

#[derive(Deserialize)]
struct Wrapped<T> {
    #[serde(
        alias = "processes",
        alias = "logs",
        alias = "history",
        alias = "analyses",
        alias = "prompts",
        alias = "data"
    )]
    items: Vec<T>,
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Bare(items) => items,
            Self::Wrapped(w) => w.items,
        }
    }
}

macro_rules! http_source {
    ($name:ident) => {
        pub struct $name {
            backend: Arc<HttpBackend>,
        }

        impl $name {
            pub fn new(backend: Arc<HttpBackend>) -> Self {
                Self { backend }
            }
        }
    };
}

http_source!(ResourcesSource);
http_source!(ProcessesSource);
http_source!(UptimeSource);
http_source!(DatabaseSource);
http_source!(AnalysisHistorySource);
http_source!(PromptsSource);
http_source!(SecuritySource);
http_source!(LogsSource);

#[derive(Deserialize)]
struct ResourcesPayload {
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(alias = "cpu", alias = "cpuPct", alias = "cpu_percent")]
    cpu_pct: f32,
    #[serde(alias = "memory", alias = "memPct", alias = "mem_percent")]
    mem_pct: f32,
    #[serde(default, alias = "disk", alias = "diskPct", alias = "disk_percent")]
    disk_pct: f32,
    #[serde(default, alias = "networkConnections", alias = "connections")]
    network_connections: u32,
}

#[async_trait]
impl MetricSource for ResourcesSource {
    type Output = ResourceSample;

    fn name(&self) -> &'static str {
        "resources"
    }

    async fn fetch(&self) -> Result<ResourceSample, FetchError> {
        let p: ResourcesPayload = self.backend.get_json("/resources").await?;
        Ok(ResourceSample::new(
            p.timestamp.unwrap_or_else(Utc::now),
            p.cpu_pct,
            p.mem_pct,
            p.disk_pct,
            p.network_connections,
        ))
    }

    fn fallback(&self) -> ResourceSample {
        ResourceSample::new(Utc::now(), 0.0, 0.0, 0.0, 0)
    }
}

#[async_trait]
impl MetricSource for ProcessesSource {
    type Output = ProcessReport;

    fn name(&self) -> &'static str {
        "processes"
    }

    async fn fetch(&self) -> Result<ProcessReport, FetchError> {
        let listing: Listing<process::ProcessEntry> = self.backend.get_json("/processes").await?;
        Ok(process::summarize(&listing.into_vec()))
    }

    fn fallback(&self) -> ProcessReport {
        ProcessReport::default()
    }
}

#[async_trait]
impl MetricSource for UptimeSource {
    type Output = UptimeStats;

    fn name(&self) -> &'static str {
        "uptime"
    }

    async fn fetch(&self) -> Result<UptimeStats, FetchError> {
        self.backend.get_json("/metrics").await
    }

    fn fallback(&self) -> UptimeStats {
        UptimeStats::default()
    }
}

#[derive(Deserialize)]
struct DbHealthPayload {
    #[serde(default)]
    healthy: Option<bool>,
    #[serde(default)]
    status: Option<String>,
}

#[async_trait]
impl MetricSource for DatabaseSource {
    type Output = DbHealth;

    fn name(&self) -> &'static str {
        "database"
    }

    async fn fetch(&self) -> Result<DbHealth, FetchError> {
        let p: DbHealthPayload = self.backend.get_json("/db-health").await?;
        let healthy = match (p.healthy, p.status.as_deref()) {
            (Some(flag), _) => flag,
            (None, Some(status)) => matches!(
                status.to_ascii_lowercase().as_str(),
                "ok" | "healthy" | "up" | "connected"
            ),
            (None, None) => {
                return Err(FetchError::Decode(
                    "db-health payload has neither `healthy` nor `status`".into(),
                ));
            }
        };
        Ok(DbHealth { healthy })
    }

    /// An unreachable health endpoint is reported as an unavailable database.
    fn fallback(&self) -> DbHealth {
        DbHealth { healthy: false }
    }
}

#[async_trait]
impl MetricSource for AnalysisHistorySource {
    type Output = Vec<AnalysisRecord>;

    fn name(&self) -> &'static str {
        "analysis_history"
    }

    async fn fetch(&self) -> Result<Vec<AnalysisRecord>, FetchError> {
        let listing: Listing<AnalysisRecord> = self.backend.get_json("/analysis-history").await?;
        Ok(listing.into_vec())
    }

    fn fallback(&self) -> Vec<AnalysisRecord> {
        Vec::new()
    }
}

#[derive(Deserialize)]
struct PromptEntry {
    #[serde(default, alias = "created_at", alias = "createdAt")]
    timestamp: Option<DateTime<Utc>>,
}

#[async_trait]
impl MetricSource for PromptsSource {
    type Output = PromptStats;

    fn name(&self) -> &'static str {
        "user_prompts"
    }

    async fn fetch(&self) -> Result<PromptStats, FetchError> {
        let prompts = self
            .backend
            .get_json::<Listing<PromptEntry>>("/user-prompts")
            .await?
            .into_vec();
        let today = Utc::now().date_naive();
        Ok(PromptStats {
            total: prompts.len(),
            today: prompts
                .iter()
                .filter(|p| p.timestamp.is_some_and(|ts| ts.date_naive() == today))
                .count(),
        })
    }

    fn fallback(&self) -> PromptStats {
        PromptStats::default()
    }
}

#[async_trait]
impl MetricSource for SecuritySource {
    type Output = SecurityScore;

    fn name(&self) -> &'static str {
        "security"
    }

    async fn fetch(&self) -> Result<SecurityScore, FetchError> {
        let resp = self.backend.get("/health").await?;
        Ok(security::score_headers(resp.headers()))
    }

    fn fallback(&self) -> SecurityScore {
        security::unverified()
    }
}

#[async_trait]
impl MetricSource for LogsSource {
    type Output = Vec<LiveEvent>;

    fn name(&self) -> &'static str {
        "logs"
    }

    async fn fetch(&self) -> Result<Vec<LiveEvent>, FetchError> {
        let listing: Listing<LiveEvent> = self.backend.get_json("/logs").await?;
        Ok(listing.into_vec())
    }

    fn fallback(&self) -> Vec<LiveEvent> {
        Vec::new()
    }
}
