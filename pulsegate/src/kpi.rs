//! Rolling KPIs over the sample window and the analysis history.
//!
//! Everything here is deterministic: the same window and the same ingested
//! records always give the same numbers.

use crate::types::{AnalysisHistorySummary, AnalysisRecord, ResourceSample};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

const TREND_GROUP: usize = 3;
const TREND_MIN_SAMPLES: usize = 5;
const TREND_RISE: f64 = 1.1;
const TREND_FALL: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceMetric {
    Cpu,
    Memory,
    Disk,
    Connections,
}

impl ResourceMetric {
    pub fn read(self, sample: &ResourceSample) -> f64 {
        match self {
            Self::Cpu => sample.cpu_pct() as f64,
            Self::Memory => sample.mem_pct() as f64,
            Self::Disk => sample.disk_pct() as f64,
            Self::Connections => sample.network_connections() as f64,
        }
    }
}

pub fn trend(samples: &[ResourceSample], metric: ResourceMetric) -> Trend {
    let values: Vec<f64> = samples.iter().map(|s| metric.read(s)).collect();
    trend_of(&values)
}

/// Mean of the last three values against the mean of the (up to) three
/// before them. Fewer than five values is always `Stable`.
pub fn trend_of(values: &[f64]) -> Trend {
    let n = values.len();
    if n < TREND_MIN_SAMPLES {
        return Trend::Stable;
    }
    let recent = mean(&values[n - TREND_GROUP..]);
    let older = mean(&values[n.saturating_sub(2 * TREND_GROUP)..n - TREND_GROUP]);

    if older == 0.0 {
        return if recent > 0.0 {
            Trend::Increasing
        } else {
            Trend::Stable
        };
    }
    if recent > older * TREND_RISE {
        Trend::Increasing
    } else if recent < older * TREND_FALL {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

/// Mean over the whole window; 0 for an empty one.
pub fn rolling_average(samples: &[ResourceSample], metric: ResourceMetric) -> f64 {
    let values: Vec<f64> = samples.iter().map(|s| metric.read(s)).collect();
    mean(&values)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Running high-confidence counters. Each record id is counted once, so
/// re-polling the same history does not skew the ratio.
#[derive(Debug, Clone)]
pub struct ConfidenceTracker {
    threshold: f64,
    /// Ids from the most recent fetch only. The backend returns a trailing
    /// slice of its history, so this never outgrows one response; the
    /// counters below keep the cumulative totals.
    seen: HashSet<String>,
    high: u64,
    total: u64,
    confidence_sum: f64,
}

impl ConfidenceTracker {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            seen: HashSet::new(),
            high: 0,
            total: 0,
            confidence_sum: 0.0,
        }
    }

    /// Fold in records absent from the previous fetch; returns how many were
    /// new. `records` must be a complete fetch.
    pub fn ingest<'a, I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = &'a AnalysisRecord>,
    {
        let mut current = HashSet::new();
        let mut added = 0;
        for record in records {
            if !current.insert(record.id.clone()) || self.seen.contains(&record.id) {
                continue;
            }
            self.total += 1;
            self.confidence_sum += record.confidence;
            if record.confidence >= self.threshold {
                self.high += 1;
            }
            added += 1;
        }
        self.seen = current;
        added
    }

    /// Share of records at or above the threshold, 0.0..=1.0. `None` until a
    /// record has been seen.
    pub fn high_confidence_rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.high as f64 / self.total as f64)
    }

    pub fn average_confidence(&self) -> Option<f64> {
        (self.total > 0).then(|| self.confidence_sum / self.total as f64)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn tracked_ids(&self) -> usize {
        self.seen.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedKpi {
    pub high_confidence_rate: Option<f64>,
    pub avg_confidence_series: Vec<f64>,
    pub cpu_trend: Trend,
    pub memory_trend: Trend,
    pub cpu_avg: f64,
    pub memory_avg: f64,
    pub disk_avg: f64,
}

pub fn derive(
    samples: &[ResourceSample],
    confidence: &ConfidenceTracker,
    avg_confidence_series: &[f64],
) -> DerivedKpi {
    DerivedKpi {
        high_confidence_rate: confidence.high_confidence_rate(),
        avg_confidence_series: avg_confidence_series.to_vec(),
        cpu_trend: trend(samples, ResourceMetric::Cpu),
        memory_trend: trend(samples, ResourceMetric::Memory),
        cpu_avg: rolling_average(samples, ResourceMetric::Cpu),
        memory_avg: rolling_average(samples, ResourceMetric::Memory),
        disk_avg: rolling_average(samples, ResourceMetric::Disk),
    }
}

pub fn summarize_history(records: &[AnalysisRecord], now: DateTime<Utc>) -> AnalysisHistorySummary {
    let today = now.date_naive();
    let mut by_recommendation = BTreeMap::new();
    for record in records {
        let key = if record.recommendation.is_empty() {
            "unknown".to_string()
        } else {
            record.recommendation.to_lowercase()
        };
        *by_recommendation.entry(key).or_insert(0) += 1;
    }
    let confidences: Vec<f64> = records.iter().map(|r| r.confidence).collect();

    AnalysisHistorySummary {
        total: records.len(),
        today: records
            .iter()
            .filter(|r| r.timestamp.date_naive() == today)
            .count(),
        by_recommendation,
        avg_confidence: mean(&confidences),
    }
}
