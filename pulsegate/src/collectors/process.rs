use crate::types::{AiEngineStats, ProcessReport, ProcessSummary};
use serde::Deserialize;

/// One entry of `GET /processes`: an analysis job known to the AI engine.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessEntry {
    #[serde(default)]
    pub status: ProcessStatus,
    #[serde(default, alias = "durationMs", alias = "processing_time_ms")]
    pub duration_ms: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    #[serde(alias = "pending")]
    Queued,
    #[serde(alias = "processing")]
    Running,
    #[serde(alias = "done", alias = "success")]
    Completed,
    #[serde(alias = "error")]
    Failed,
    #[default]
    #[serde(other)]
    Unknown,
}

pub fn summarize(entries: &[ProcessEntry]) -> ProcessReport {
    let mut summary = ProcessSummary {
        total: entries.len() as u32,
        ..ProcessSummary::default()
    };
    let mut durations = Vec::new();

    for entry in entries {
        match entry.status {
            ProcessStatus::Queued => summary.queued += 1,
            ProcessStatus::Running => summary.running += 1,
            ProcessStatus::Completed => {
                summary.completed += 1;
                if let Some(ms) = entry.duration_ms.filter(|ms| ms.is_finite() && *ms >= 0.0) {
                    durations.push(ms);
                }
            }
            ProcessStatus::Failed => summary.failed += 1,
            ProcessStatus::Unknown => {}
        }
    }

    let finished = summary.completed + summary.failed;
    let success_rate = if finished == 0 {
        0.0
    } else {
        summary.completed as f64 * 100.0 / finished as f64
    };
    let avg_processing_ms = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<f64>() / durations.len() as f64
    };

    ProcessReport {
        summary,
        engine: AiEngineStats {
            queue_length: summary.queued,
            success_rate,
            avg_processing_ms,
        },
    }
}
