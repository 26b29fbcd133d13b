use crate::config::Thresholds;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Good,
    Warn,
    Bad,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub title: String,
    pub detail: String,
    pub severity: Severity,
}

/// Everything the rules look at, flattened from the current KPI snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightInputs {
    /// Percentage of analyses at or above the high-confidence threshold.
    /// `None` while no analysis record has been seen; the confidence rules
    /// stay silent until then.
    pub high_confidence_pct: Option<f64>,
    pub queue_length: u32,
    pub avg_processing_ms: f64,
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub db_healthy: bool,
}

struct Rule {
    title: &'static str,
    severity: Severity,
    fires: fn(&InsightInputs, &Thresholds) -> bool,
    detail: fn(&InsightInputs, &Thresholds) -> String,
}

const RULES: &[Rule] = &[
    Rule {
        title: "High Confidence Trend",
        severity: Severity::Good,
        fires: |i, t| i.high_confidence_pct.is_some_and(|r| r >= t.success_rate_good),
        detail: |i, _| {
            format!(
                "{:.1}% of analyses are high-confidence",
                i.high_confidence_pct.unwrap_or_default()
            )
        },
    },
    Rule {
        title: "Declining confidence",
        severity: Severity::Warn,
        fires: |i, t| {
            i.high_confidence_pct
                .is_some_and(|r| r > 0.0 && r < t.success_rate_good)
        },
        detail: |i, t| {
            format!(
                "only {:.1}% of analyses are high-confidence (target {:.0}%)",
                i.high_confidence_pct.unwrap_or_default(),
                t.success_rate_good
            )
        },
    },
    Rule {
        title: "Queue backlog growing",
        severity: Severity::Warn,
        fires: |i, t| i.queue_length > t.queue_backlog,
        detail: |i, _| format!("{} analyses waiting in the engine queue", i.queue_length),
    },
    Rule {
        title: "Slow response",
        severity: Severity::Bad,
        fires: |i, t| i.avg_processing_ms > t.slow_response_ms,
        detail: |i, t| {
            format!(
                "average processing time {:.0} ms exceeds {:.0} ms",
                i.avg_processing_ms, t.slow_response_ms
            )
        },
    },
    Rule {
        title: "High resource pressure",
        severity: Severity::Warn,
        fires: |i, t| i.cpu_pct > t.cpu_pressure_pct || i.mem_pct > t.mem_pressure_pct,
        detail: |i, _| format!("cpu {:.1}%, memory {:.1}%", i.cpu_pct, i.mem_pct),
    },
    Rule {
        title: "Database unavailable",
        severity: Severity::Bad,
        fires: |i, _| !i.db_healthy,
        detail: |_, _| "database health check is failing".to_string(),
    },
];

/// Evaluate every rule independently; several may fire at once. "System
/// stable" is appended whenever no warn or bad rule fired, so the result is
/// never empty and a good confidence trend does not hide it.
pub fn evaluate(inputs: &InsightInputs, thresholds: &Thresholds) -> Vec<Insight> {
    let mut out: Vec<Insight> = RULES
        .iter()
        .filter(|rule| (rule.fires)(inputs, thresholds))
        .map(|rule| Insight {
            title: rule.title.to_string(),
            detail: (rule.detail)(inputs, thresholds),
            severity: rule.severity,
        })
        .collect();

    if out.iter().all(|i| i.severity == Severity::Good) {
        out.push(Insight {
            title: "System stable".to_string(),
            detail: "all monitored indicators are within thresholds".to_string(),
            severity: Severity::Good,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn inputs() -> InsightInputs {
        InsightInputs {
            high_confidence_pct: None,
            queue_length: 1,
            avg_processing_ms: 500.0,
            cpu_pct: 40.0,
            mem_pct: 50.0,
            db_healthy: true,
        }
    }

    fn titles(insights: &[Insight]) -> HashSet<(&str, Severity)> {
        insights
            .iter()
            .map(|i| (i.title.as_str(), i.severity))
            .collect()
    }

    #[test]
    fn healthy_inputs_yield_only_stable() {
        let out = evaluate(&inputs(), &Thresholds::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "System stable");
        assert_eq!(out[0].severity, Severity::Good);
    }

    #[test]
    fn degraded_inputs_fire_independent_rules() {
        let degraded = InsightInputs {
            queue_length: 8,
            avg_processing_ms: 2500.0,
            cpu_pct: 90.0,
            mem_pct: 60.0,
            db_healthy: false,
            ..inputs()
        };
        let out = evaluate(&degraded, &Thresholds::default());
        let expected: HashSet<(&str, Severity)> = [
            ("Queue backlog growing", Severity::Warn),
            ("Slow response", Severity::Bad),
            ("High resource pressure", Severity::Warn),
            ("Database unavailable", Severity::Bad),
        ]
        .into_iter()
        .collect();
        assert_eq!(titles(&out), expected);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn confidence_rules_follow_high_confidence_share() {
        let thresholds = Thresholds::default();

        let good = evaluate(&InsightInputs { high_confidence_pct: Some(90.0), ..inputs() }, &thresholds);
        assert_eq!(
            titles(&good),
            [
                ("High Confidence Trend", Severity::Good),
                ("System stable", Severity::Good),
            ]
            .into_iter()
            .collect()
        );

        let weak = evaluate(&InsightInputs { high_confidence_pct: Some(40.0), ..inputs() }, &thresholds);
        assert_eq!(titles(&weak), [("Declining confidence", Severity::Warn)].into_iter().collect());

        let edge = evaluate(&InsightInputs { high_confidence_pct: Some(85.0), ..inputs() }, &thresholds);
        assert_eq!(edge[0].title, "High Confidence Trend");

        let zero = evaluate(&InsightInputs { high_confidence_pct: Some(0.0), ..inputs() }, &thresholds);
        assert_eq!(titles(&zero), [("System stable", Severity::Good)].into_iter().collect());
    }

    #[test]
    fn good_trend_with_a_problem_is_not_stable() {
        let out = evaluate(
            &InsightInputs {
                high_confidence_pct: Some(95.0),
                db_healthy: false,
                ..inputs()
            },
            &Thresholds::default(),
        );
        assert_eq!(
            titles(&out),
            [
                ("High Confidence Trend", Severity::Good),
                ("Database unavailable", Severity::Bad),
            ]
            .into_iter()
            .collect()
        );
    }

    #[test]
    fn memory_alone_triggers_pressure() {
        let out = evaluate(&InsightInputs { mem_pct: 86.0, ..inputs() }, &Thresholds::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "High resource pressure");
    }

    #[test]
    fn thresholds_are_configurable() {
        let thresholds = Thresholds {
            queue_backlog: 0,
            ..Thresholds::default()
        };
        let out = evaluate(&inputs(), &thresholds);
        assert_eq!(out[0].title, "Queue backlog growing");
    }

    #[test]
    fn evaluation_is_never_empty() {
        for db_healthy in [true, false] {
            for cpu in [0.0, 50.0, 99.0] {
                let out = evaluate(&InsightInputs { cpu_pct: cpu, db_healthy, ..inputs() }, &Thresholds::default());
                assert!(!out.is_empty());
            }
        }
    }
}
