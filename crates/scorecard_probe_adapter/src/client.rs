#![forbid(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scorecard_probe_contracts::{Deadline, ProbeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionSource {
    Unspecified,
    ClosedConversations,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSpec {
    pub criterion_id: String,
    pub numeric: Option<f32>,
}

impl ScoreSpec {
    pub fn numeric(criterion_id: impl Into<String>, value: f32) -> Self {
        Self {
            criterion_id: criterion_id.into(),
            numeric: Some(value),
        }
    }
}

/// Body of a Create call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScorecardSpec {
    pub template_name: String,
    pub agent_user_name: String,
    pub conversation_name: String,
    pub scores: Vec<ScoreSpec>,
    pub source: SubmissionSource,
}

/// Partial scorecard for an Update call; only scores are patched.
#[derive(Debug, Clone, PartialEq)]
pub struct ScorecardPatch {
    pub scores: Vec<ScoreSpec>,
}

/// The coaching service's view of a scorecard as returned by a call.
#[derive(Debug, Clone, PartialEq)]
pub struct CoachingScorecard {
    pub name: String,
    pub submitted_at: Option<DateTime<Utc>>,
    pub score: Option<f64>,
    pub scores: Vec<ScoreSpec>,
}

impl CoachingScorecard {
    /// Last path segment of the resource name.
    pub fn scorecard_id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// Remote-procedure surface of the coaching service. Every call carries the
/// bearer credential the client was built with and gives up at `deadline`.
#[async_trait]
pub trait CoachingClient: Send + Sync {
    async fn create(
        &self,
        deadline: Deadline,
        parent: &str,
        spec: &ScorecardSpec,
    ) -> Result<CoachingScorecard, ProbeError>;

    async fn update(
        &self,
        deadline: Deadline,
        name: &str,
        patch: &ScorecardPatch,
    ) -> Result<CoachingScorecard, ProbeError>;

    /// Sets `submitted_at`; the server computes the final score.
    async fn submit(&self, deadline: Deadline, name: &str) -> Result<CoachingScorecard, ProbeError>;

    /// Best-effort. Failures are logged and dropped.
    async fn reset(&self, deadline: Deadline, name: &str);
}
