use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// One resource reading taken by the poll scheduler.
///
/// Percentages are clamped into `0..=100` on construction, so every sample
/// that reaches the window satisfies the range invariant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSample {
    timestamp: DateTime<Utc>,
    cpu_pct: f32,
    mem_pct: f32,
    disk_pct: f32,
    network_connections: u32,
}

impl ResourceSample {
    pub fn new(
        timestamp: DateTime<Utc>,
        cpu_pct: f32,
        mem_pct: f32,
        disk_pct: f32,
        network_connections: u32,
    ) -> Self {
        Self {
            timestamp,
            cpu_pct: clamp_pct(cpu_pct),
            mem_pct: clamp_pct(mem_pct),
            disk_pct: clamp_pct(disk_pct),
            network_connections,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn cpu_pct(&self) -> f32 {
        self.cpu_pct
    }

    pub fn mem_pct(&self) -> f32 {
        self.mem_pct
    }

    pub fn disk_pct(&self) -> f32 {
        self.disk_pct
    }

    pub fn network_connections(&self) -> u32 {
        self.network_connections
    }
}

fn clamp_pct(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
    Debug,
}

/// A discrete log/telemetry event pushed by the backend (or polled from `/logs`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEvent {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub message: String,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// A source value together with when it was fetched and whether the
/// latest attempt failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot<T> {
    pub value: T,
    pub as_of: DateTime<Utc>,
    pub stale: bool,
}

impl<T> Snapshot<T> {
    pub fn fresh(value: T) -> Self {
        Self {
            value,
            as_of: Utc::now(),
            stale: false,
        }
    }

    pub fn stale(value: T, as_of: DateTime<Utc>) -> Self {
        Self {
            value,
            as_of,
            stale: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AiEngineStats {
    pub queue_length: u32,
    /// Completed / (completed + failed), in percent.
    pub success_rate: f64,
    pub avg_processing_ms: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessSummary {
    pub total: u32,
    pub running: u32,
    pub queued: u32,
    pub completed: u32,
    pub failed: u32,
}

/// What the `/processes` source yields: the raw counts and the engine
/// statistics derived from them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProcessReport {
    pub summary: ProcessSummary,
    pub engine: AiEngineStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UptimeStats {
    #[serde(alias = "uptime")]
    pub uptime_secs: u64,
    #[serde(alias = "responseTime")]
    pub response_time_ms: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbHealth {
    pub healthy: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SecurityScore {
    /// Share of required headers present, in percent.
    pub score: f64,
    pub required: u32,
    pub present: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub recommendation: String,
    /// 0-100.
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisHistorySummary {
    pub total: usize,
    pub today: usize,
    pub by_recommendation: BTreeMap<String, usize>,
    pub avg_confidence: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PromptStats {
    pub total: usize,
    pub today: usize,
}

/// Latest value of every polled source. Replaced wholesale after each joined
/// poll cycle, never updated piecemeal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotSet {
    pub resources: Snapshot<ResourceSample>,
    pub processes: Snapshot<ProcessReport>,
    pub uptime: Snapshot<UptimeStats>,
    pub database: Snapshot<DbHealth>,
    pub analysis: Snapshot<AnalysisHistorySummary>,
    pub prompts: Snapshot<PromptStats>,
    pub security: Snapshot<SecurityScore>,
}

impl SnapshotSet {
    pub fn ai_engine(&self) -> &AiEngineStats {
        &self.processes.value.engine
    }
}

/// Health of one source after the most recent cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStatus {
    pub name: &'static str,
    pub stale: bool,
    pub as_of: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Backends disagree on whether ids are strings or integers; keep them as strings.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Int(n) => n.to_string(),
        RawId::Float(f) => f.to_string(),
    })
}
