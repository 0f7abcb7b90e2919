//! Decision Engine - accept/reject a trained candidate
//!
//! Pure function, no I/O. Every metric is compared on the percent scale:
//! the candidate must reach each expected threshold AND match or beat the
//! model it replaces. Missing current metrics or thresholds count as 0.

use serde::Serialize;

use crate::logic::registry::{Metrics, ModelRecord};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    BelowThreshold,
    NoImprovement,
}

impl RejectReason {
    pub fn message(&self) -> &'static str {
        match self {
            RejectReason::BelowThreshold => "did not meet expected thresholds",
            RejectReason::NoImprovement => "did not improve",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// One metric, percent scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricComparison {
    pub new: f64,
    pub old: f64,
    pub expected: f64,
}

impl MetricComparison {
    fn meets_expectation(&self) -> bool {
        self.new >= self.expected
    }

    fn improves(&self) -> bool {
        self.new >= self.old
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Comparison {
    pub accuracy: MetricComparison,
    pub precision: MetricComparison,
    pub recall: MetricComparison,
    pub f1: MetricComparison,
}

impl Comparison {
    fn all(&self) -> [MetricComparison; 4] {
        [self.accuracy, self.precision, self.recall, self.f1]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub accepted: bool,
    pub reason: Option<RejectReason>,
    pub comparison: Comparison,
}

// ============================================================================
// DECIDE
// ============================================================================

/// Compare candidate metrics with the record being replaced
pub fn decide(candidate: &Metrics, current: Option<&ModelRecord>) -> Decision {
    let new = candidate.as_percent().map(percent);
    let old = current
        .and_then(|r| r.metrics)
        .map(|m| m.as_percent().map(percent))
        .unwrap_or([0.0; 4]);
    let expected = current
        .and_then(|r| r.expected)
        .map(|t| t.as_array().map(percent))
        .unwrap_or([0.0; 4]);

    let metric = |i: usize| MetricComparison {
        new: new[i],
        old: old[i],
        expected: expected[i],
    };
    let comparison = Comparison {
        accuracy: metric(0),
        precision: metric(1),
        recall: metric(2),
        f1: metric(3),
    };

    let meets_expectation = comparison.all().iter().all(MetricComparison::meets_expectation);
    let improves = comparison.all().iter().all(MetricComparison::improves);

    // Threshold failure is reported first
    let reason = if !meets_expectation {
        Some(RejectReason::BelowThreshold)
    } else if !improves {
        Some(RejectReason::NoImprovement)
    } else {
        None
    };

    Decision {
        accepted: reason.is_none(),
        reason,
        comparison,
    }
}

/// Drop float noise from the ×100 scaling (0.95 * 100 vs 95)
fn percent(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::registry::Thresholds;

    fn current(metric: f64, threshold: f64) -> ModelRecord {
        let mut r = ModelRecord::new("cur", "cur");
        r.metrics = Some(Metrics::new(metric, metric, metric, metric));
        r.expected = Some(Thresholds::new(threshold, threshold, threshold, threshold));
        r
    }

    #[test]
    fn test_accept_when_above_threshold_and_current() {
        let d = decide(&Metrics::new(0.96, 0.96, 0.96, 0.96), Some(&current(0.90, 95.0)));
        assert!(d.accepted);
        assert!(d.reason.is_none());
        assert_eq!(d.comparison.accuracy.new, 96.0);
        assert_eq!(d.comparison.accuracy.old, 90.0);
        assert_eq!(d.comparison.accuracy.expected, 95.0);
    }

    #[test]
    fn test_reject_below_threshold() {
        let d = decide(&Metrics::new(0.94, 0.96, 0.96, 0.96), Some(&current(0.90, 95.0)));
        assert!(!d.accepted);
        assert_eq!(d.reason, Some(RejectReason::BelowThreshold));
        assert_eq!(d.reason.unwrap().message(), "did not meet expected thresholds");
    }

    #[test]
    fn test_reject_no_improvement() {
        let d = decide(&Metrics::new(0.95, 0.95, 0.95, 0.95), Some(&current(0.96, 95.0)));
        assert!(!d.accepted);
        assert_eq!(d.reason, Some(RejectReason::NoImprovement));
        assert_eq!(d.reason.unwrap().to_string(), "did not improve");
    }

    #[test]
    fn test_threshold_reported_before_improvement() {
        // Fails both conditions
        let d = decide(&Metrics::new(0.50, 0.50, 0.50, 0.50), Some(&current(0.96, 95.0)));
        assert_eq!(d.reason, Some(RejectReason::BelowThreshold));
    }

    #[test]
    fn test_equal_metrics_accepted() {
        let d = decide(&Metrics::new(0.95, 0.95, 0.95, 0.95), Some(&current(0.95, 95.0)));
        assert!(d.accepted);
    }

    #[test]
    fn test_missing_baseline_counts_as_zero() {
        let d = decide(&Metrics::new(0.10, 0.10, 0.10, 0.10), None);
        assert!(d.accepted);

        let bare = ModelRecord::new("x", "x");
        assert!(decide(&Metrics::default(), Some(&bare)).accepted);
    }
}
