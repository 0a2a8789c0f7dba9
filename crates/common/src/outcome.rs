//! Probe outcome collection and run verdict

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::event::EventLogger;

/// Minimum success rate, in percent, for a run to pass. Not configurable.
pub const SUCCESS_THRESHOLD: f64 = 80.0;

/// Named boolean outcomes of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeMap(BTreeMap<String, bool>);

impl OutcomeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of a probe. Names are unique within a run; a repeated
    /// name replaces the earlier outcome.
    pub fn record(&mut self, name: impl Into<String>, success: bool) {
        let name = name.into();
        if self.0.insert(name.clone(), success).is_some() {
            warn!("Outcome '{}' recorded twice, keeping the latest", name);
        }
    }

    /// Merge another phase's outcomes into this one
    pub fn merge(&mut self, other: OutcomeMap) {
        for (name, success) in other.0 {
            self.record(name, success);
        }
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.0.values().filter(|ok| **ok).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(name, ok)| (name.as_str(), *ok))
    }

    pub fn success_rate(&self) -> f64 {
        success_rate(self.succeeded(), self.len())
    }
}

impl<S: Into<String>> FromIterator<(S, bool)> for OutcomeMap {
    fn from_iter<I: IntoIterator<Item = (S, bool)>>(iter: I) -> Self {
        let mut map = OutcomeMap::new();
        for (name, success) in iter {
            map.record(name, success);
        }
        map
    }
}

/// `100 * succeeded / total`, or 0 for an empty run
pub fn success_rate(succeeded: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * succeeded as f64 / total as f64
    }
}

pub fn meets_threshold(rate: f64) -> bool {
    rate >= SUCCESS_THRESHOLD
}

/// Aggregated view of a finished run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub success_rate: f64,
    pub duration: Duration,
}

impl RunSummary {
    pub fn new(outcomes: &OutcomeMap, duration: Duration) -> Self {
        Self {
            total: outcomes.len(),
            succeeded: outcomes.succeeded(),
            success_rate: outcomes.success_rate(),
            duration,
        }
    }

    /// The run's verdict, mapped to the process exit code
    pub fn passed(&self) -> bool {
        meets_threshold(self.success_rate)
    }

    pub fn status_label(&self) -> &'static str {
        if self.passed() {
            "success"
        } else {
            "warning"
        }
    }

    /// Emit the summary event and the two run-level metrics
    pub fn report(&self, logger: &EventLogger) {
        let duration = self.duration.as_secs_f64();
        logger.log_event(
            "test_suite_complete",
            "Test suite finished",
            json!({
                "total_tests": self.total,
                "successful_tests": self.succeeded,
                "success_rate": self.success_rate,
                "total_duration": duration,
                "status": self.status_label(),
            }),
        );
        logger.log_metric("test_success_rate", self.success_rate, json!({}));
        logger.log_metric("test_total_duration", duration, json!({}));
    }
}

/// Summarise `outcomes`, report the summary, and return it
pub fn aggregate(outcomes: &OutcomeMap, duration: Duration, logger: &EventLogger) -> RunSummary {
    let summary = RunSummary::new(outcomes, duration);
    summary.report(logger);
    summary
}
