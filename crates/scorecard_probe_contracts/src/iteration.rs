#![forbid(unsafe_code)]

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Wall time spent in each phase of one race iteration.
/// `update` and `submit` are each written by exactly one of the two racing tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationLatency {
    pub create: Duration,
    pub update: Duration,
    pub submit: Duration,
    pub verify: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationResult {
    pub iteration: u32,
    /// Empty when Create itself failed.
    pub scorecard_id: String,
    pub passed: bool,
    pub error: Option<String>,
    pub latency: IterationLatency,
}

impl IterationResult {
    pub fn started(iteration: u32) -> Self {
        Self {
            iteration,
            scorecard_id: String::new(),
            passed: false,
            error: None,
            latency: IterationLatency::default(),
        }
    }

    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.passed = false;
        self.error = Some(error.into());
        self
    }

    pub fn pass(mut self) -> Self {
        self.passed = true;
        self.error = None;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedIteration {
    pub iteration: u32,
    pub scorecard_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub failures: Vec<FailedIteration>,
}

impl RunSummary {
    pub fn from_results(total: u32, results: &[IterationResult]) -> Self {
        let passed = results.iter().filter(|r| r.passed).count() as u32;
        let failures: Vec<FailedIteration> = results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| FailedIteration {
                iteration: r.iteration,
                scorecard_id: r.scorecard_id.clone(),
                error: r.error.clone().unwrap_or_default(),
            })
            .collect();
        Self {
            total,
            passed,
            failed: failures.len() as u32,
            failures,
        }
    }

    /// Percentage of the requested iterations that passed.
    pub fn success_rate_pct(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        f64::from(self.passed) * 100.0 / f64::from(self.total)
    }

    /// Formatted to two decimals, e.g. `"66.67%"`.
    pub fn success_rate_display(&self) -> String {
        format!("{:.2}%", self.success_rate_pct())
    }

    /// Any failed or unfinished iteration fails the run.
    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.passed == self.total
    }
}
