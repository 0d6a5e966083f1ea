#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Pass,
    Fail,
    Warn,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Pass => "PASS",
            Severity::Fail => "FAIL",
            Severity::Warn => "WARN",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconciliation rules in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FindingRule {
    Existence,
    ScoreCount,
    SubmissionConsistency,
    ChildSubmitStamps,
    AggregateScore,
    CriterionDiff,
}

impl FindingRule {
    pub fn label(self) -> &'static str {
        match self {
            FindingRule::Existence => "Existence",
            FindingRule::ScoreCount => "Score count",
            FindingRule::SubmissionConsistency => "Submission consistency",
            FindingRule::ChildSubmitStamps => "Child submit stamps",
            FindingRule::AggregateScore => "Aggregate score",
            FindingRule::CriterionDiff => "Per-criterion diff",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub rule: FindingRule,
    pub message: String,
}

impl Finding {
    pub fn pass(rule: FindingRule, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Pass,
            rule,
            message: message.into(),
        }
    }

    pub fn fail(rule: FindingRule, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Fail,
            rule,
            message: message.into(),
        }
    }

    pub fn warn(rule: FindingRule, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warn,
            rule,
            message: message.into(),
        }
    }

    pub fn is_fail(&self) -> bool {
        self.severity == Severity::Fail
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {}",
            self.severity,
            self.rule.label(),
            self.message
        )
    }
}
