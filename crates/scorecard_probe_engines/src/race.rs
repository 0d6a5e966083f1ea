#![forbid(unsafe_code)]

//! Update/Submit race against the coaching service, verified through the
//! columnar mirror.
//!
//! Each iteration creates a scorecard, fires Update and a slightly delayed
//! Submit on two tasks, joins both, lets the mirror settle and then checks
//! that the merged mirror rows carry a real submit time. Passing scorecards
//! are reset; failing ones are left in place for inspection.

use std::sync::Arc;
use std::time::Duration;

use scorecard_probe_adapter::{
    CoachingClient, CoachingScorecard, ScoreSpec, ScorecardPatch, ScorecardSpec, SubmissionSource,
};
use scorecard_probe_contracts::{
    profile_parent, ContractViolation, Deadline, IterationResult, ProbeError, RunSummary,
    Validate,
};
use scorecard_probe_storage::ColStoreRepo;
use tokio::time::Instant;

use crate::scope::CancelToken;

const CREATE_SCORES: (f32, f32) = (1.0, 0.0);
const UPDATE_SCORES: (f32, f32) = (0.0, 1.0);

/// The fixed scorecard every iteration creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceFixture {
    pub customer: String,
    pub profile: String,
    pub template_name: String,
    pub agent_user_name: String,
    pub conversation_name: String,
    pub criterion_1: String,
    pub criterion_2: String,
}

/// The staging scorecard the race has been run against so far.
pub mod staging {
    pub const CUSTOMER: &str = "cox";
    pub const PROFILE: &str = "sales";
    pub const TEMPLATE: &str =
        "customers/cox/profiles/sales/scorecardTemplates/c1876249-0bfd-4aaf-a316-132a54a7e70c@7aad25a1";
    pub const AGENT_USER: &str = "customers/cox/users/8c8b7449f1497e86";
    pub const CONVERSATION: &str =
        "customers/cox/profiles/sales/conversations/019bc327-a9ed-7020-84ea-d13ed553f904";
    pub const CRITERION_1: &str = "4583ff48-c7b5-4d73-aa39-3911d4f9f95d";
    pub const CRITERION_2: &str = "562116d8-6b46-49f8-bcf1-33668375698e";
}

impl RaceFixture {
    pub fn staging_defaults() -> Self {
        Self {
            customer: staging::CUSTOMER.to_string(),
            profile: staging::PROFILE.to_string(),
            template_name: staging::TEMPLATE.to_string(),
            agent_user_name: staging::AGENT_USER.to_string(),
            conversation_name: staging::CONVERSATION.to_string(),
            criterion_1: staging::CRITERION_1.to_string(),
            criterion_2: staging::CRITERION_2.to_string(),
        }
    }

    pub fn parent(&self) -> String {
        profile_parent(&self.customer, &self.profile)
    }

    pub fn create_spec(&self) -> ScorecardSpec {
        ScorecardSpec {
            template_name: self.template_name.clone(),
            agent_user_name: self.agent_user_name.clone(),
            conversation_name: self.conversation_name.clone(),
            scores: self.scores(CREATE_SCORES),
            source: SubmissionSource::ClosedConversations,
        }
    }

    pub fn update_patch(&self) -> ScorecardPatch {
        ScorecardPatch {
            scores: self.scores(UPDATE_SCORES),
        }
    }

    fn scores(&self, (c1, c2): (f32, f32)) -> Vec<ScoreSpec> {
        vec![
            ScoreSpec::numeric(self.criterion_1.clone(), c1),
            ScoreSpec::numeric(self.criterion_2.clone(), c2),
        ]
    }

    fn expected_after_update(&self) -> [(&str, f64); 2] {
        [
            (self.criterion_1.as_str(), f64::from(UPDATE_SCORES.0)),
            (self.criterion_2.as_str(), f64::from(UPDATE_SCORES.1)),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceConfig {
    pub iterations: u32,
    /// Settle time between the join and the mirror check.
    pub wait: Duration,
    /// Head start Update gets over Submit. Zero is legal.
    pub api_delay: Duration,
    /// Budget for the remote calls of one iteration. The iteration deadline
    /// is this plus `api_delay` and `wait`, and every call shares it.
    pub call_timeout: Duration,
    pub fixture: RaceFixture,
}

impl RaceConfig {
    pub fn staging_defaults() -> Self {
        Self {
            iterations: 50,
            wait: Duration::from_secs(2),
            api_delay: Duration::from_millis(10),
            call_timeout: Duration::from_secs(30),
            fixture: RaceFixture::staging_defaults(),
        }
    }
}

impl Validate for RaceConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.iterations == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "race_config.iterations",
                reason: "must be >= 1",
            });
        }
        if self.call_timeout.is_zero() {
            return Err(ContractViolation::InvalidValue {
                field: "race_config.call_timeout",
                reason: "must be > 0",
            });
        }
        for (field, value) in [
            ("race_config.fixture.customer", &self.fixture.customer),
            ("race_config.fixture.profile", &self.fixture.profile),
            ("race_config.fixture.criterion_1", &self.fixture.criterion_1),
            ("race_config.fixture.criterion_2", &self.fixture.criterion_2),
        ] {
            if value.trim().is_empty() {
                return Err(ContractViolation::InvalidValue {
                    field,
                    reason: "must not be empty",
                });
            }
        }
        if self.fixture.criterion_1 == self.fixture.criterion_2 {
            return Err(ContractViolation::InvalidValue {
                field: "race_config.fixture.criterion_2",
                reason: "must differ from criterion_1",
            });
        }
        Ok(())
    }
}

/// Why the merged mirror did not reflect the submission.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MirrorCheckFailure {
    #[error("scorecard not found in CH: {0}")]
    ScorecardMissing(String),
    #[error("{}", unset_submit_time())]
    ScorecardSubmitUnset,
    #[error("failed to query scores: {0}")]
    ScoresUnreadable(String),
    #[error("invalid score submit_time for {criterion}: unset sentinel")]
    ScoreSubmitUnset { criterion: String },
    #[error("no scores found in CH")]
    NoScores,
    #[error("score not found in CH for {criterion}")]
    ScoreMissing { criterion: String },
    #[error("score value mismatch for {criterion}: expected {expected:.2} got {got:.2}")]
    ValueMismatch {
        criterion: String,
        expected: f64,
        got: f64,
    },
}

fn unset_submit_time() -> ProbeError {
    ProbeError::SentinelTimestamp {
        field: "scorecard_submit_time",
    }
}

/// Results of a whole run. `interrupted` is set when cancellation stopped the
/// run before every iteration finished.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceRun {
    pub results: Vec<IterationResult>,
    pub summary: RunSummary,
    pub interrupted: bool,
}

impl RaceRun {
    pub fn all_passed(&self) -> bool {
        !self.interrupted && self.summary.all_passed()
    }
}

type CallOutcome = (Result<CoachingScorecard, ProbeError>, Duration);

pub struct RaceHarness {
    config: RaceConfig,
    coaching: Arc<dyn CoachingClient>,
    mirror: Arc<dyn ColStoreRepo>,
    cancel: CancelToken,
}

impl RaceHarness {
    pub fn new(
        config: RaceConfig,
        coaching: Arc<dyn CoachingClient>,
        mirror: Arc<dyn ColStoreRepo>,
        cancel: CancelToken,
    ) -> Result<Self, ProbeError> {
        config.validate()?;
        Ok(Self {
            config,
            coaching,
            mirror,
            cancel,
        })
    }

    pub fn config(&self) -> &RaceConfig {
        &self.config
    }

    /// Runs every iteration in sequence, reporting each result through
    /// `on_result` as soon as it is known.
    pub async fn run<F>(&self, mut on_result: F) -> RaceRun
    where
        F: FnMut(&IterationResult),
    {
        let mut results = Vec::with_capacity(self.config.iterations as usize);
        let mut interrupted = false;
        for i in 1..=self.config.iterations {
            match self.run_iteration(i).await {
                Ok(result) => {
                    on_result(&result);
                    results.push(result);
                }
                Err(_) => {
                    tracing::info!(iteration = i, "run interrupted");
                    interrupted = true;
                    break;
                }
            }
        }
        let summary = RunSummary::from_results(self.config.iterations, &results);
        RaceRun {
            results,
            summary,
            interrupted,
        }
    }

    /// One create/race/verify cycle. Only cancellation is returned as an
    /// error; every other failure is captured in the result.
    pub async fn run_iteration(&self, iteration: u32) -> Result<IterationResult, ProbeError> {
        let fixture = &self.config.fixture;
        let mut result = IterationResult::started(iteration);
        let deadline = self.iteration_deadline();

        let started = Instant::now();
        let created = self
            .cancel
            .guard(self.coaching.create(
                deadline,
                &fixture.parent(),
                &fixture.create_spec(),
            ))
            .await?;
        result.latency.create = started.elapsed();
        let name = match created {
            Ok(sc) => sc.name,
            Err(err) => return Ok(result.fail(err.to_string())),
        };
        result.scorecard_id = scorecard_id_of(&name).to_string();
        tracing::debug!(iteration, scorecard = %name, "created");

        let ((update, update_took), (submit, submit_took)) =
            self.race_update_submit(&name, deadline).await?;
        result.latency.update = update_took;
        result.latency.submit = submit_took;

        if let Err(err) = update {
            self.reset(deadline, &name).await;
            return Ok(result.fail(err.to_string()));
        }
        let submitted = match submit {
            Ok(sc) => sc,
            Err(err) => {
                self.reset(deadline, &name).await;
                return Ok(result.fail(err.to_string()));
            }
        };
        if submitted.submitted_at.is_none() {
            tracing::debug!(
                scorecard_id = %result.scorecard_id,
                "submit returned without submit time"
            );
        }

        self.cancel.sleep(self.config.wait).await?;

        let started = Instant::now();
        let verdict = self
            .cancel
            .guard(self.verify_mirror(deadline, &result.scorecard_id))
            .await?;
        result.latency.verify = started.elapsed();

        match verdict {
            Ok(()) => {
                self.reset(deadline, &name).await;
                Ok(result.pass())
            }
            Err(failure) => {
                tracing::debug!(scorecard = %name, "keeping failed scorecard for investigation");
                Ok(result.fail(failure.to_string()))
            }
        }
    }

    fn iteration_deadline(&self) -> Deadline {
        Deadline::after(self.config.call_timeout + self.config.api_delay + self.config.wait)
    }

    /// Update on one task, Submit after `api_delay` on another, both under
    /// one deadline. Returns once both have finished. Cancellation aborts
    /// whichever is still running.
    async fn race_update_submit(
        &self,
        name: &str,
        deadline: Deadline,
    ) -> Result<(CallOutcome, CallOutcome), ProbeError> {
        let update_task = tokio::spawn({
            let coaching = Arc::clone(&self.coaching);
            let name = name.to_string();
            let patch = self.config.fixture.update_patch();
            async move {
                let started = Instant::now();
                let out = coaching.update(deadline, &name, &patch).await;
                (out, started.elapsed())
            }
        });
        let submit_task = tokio::spawn({
            let coaching = Arc::clone(&self.coaching);
            let name = name.to_string();
            let api_delay = self.config.api_delay;
            async move {
                tokio::time::sleep(api_delay).await;
                let started = Instant::now();
                let out = coaching.submit(deadline, &name).await;
                (out, started.elapsed())
            }
        });
        let update_abort = update_task.abort_handle();
        let submit_abort = submit_task.abort_handle();

        let joined = self
            .cancel
            .guard(async { tokio::join!(update_task, submit_task) })
            .await;
        let (update, submit) = match joined {
            Ok(pair) => pair,
            Err(err) => {
                update_abort.abort();
                submit_abort.abort();
                return Err(err);
            }
        };
        Ok((
            joined_outcome("Update", update),
            joined_outcome("Submit", submit),
        ))
    }

    async fn verify_mirror(
        &self,
        deadline: Deadline,
        scorecard_id: &str,
    ) -> Result<(), MirrorCheckFailure> {
        let fixture = &self.config.fixture;

        let merged = self
            .mirror
            .read_scorecard_merged(deadline, &fixture.customer, &fixture.profile, scorecard_id)
            .await
            .map_err(|e| MirrorCheckFailure::ScorecardMissing(e.to_string()))?
            .ok_or_else(|| MirrorCheckFailure::ScorecardMissing("no merged row".to_string()))?;
        if merged.submit_time.is_none() {
            return Err(MirrorCheckFailure::ScorecardSubmitUnset);
        }

        let scores = self
            .mirror
            .read_scores_merged(deadline, &fixture.customer, &fixture.profile, scorecard_id)
            .await
            .map_err(|e| MirrorCheckFailure::ScoresUnreadable(e.to_string()))?;
        if let Some(unset) = scores.iter().find(|s| s.submit_time.is_none()) {
            return Err(MirrorCheckFailure::ScoreSubmitUnset {
                criterion: unset.criterion_id.clone(),
            });
        }
        if scores.is_empty() {
            return Err(MirrorCheckFailure::NoScores);
        }

        for (criterion, expected) in fixture.expected_after_update() {
            let score = scores
                .iter()
                .find(|s| s.criterion_id == criterion)
                .ok_or_else(|| MirrorCheckFailure::ScoreMissing {
                    criterion: criterion.to_string(),
                })?;
            if score.numeric != expected {
                return Err(MirrorCheckFailure::ValueMismatch {
                    criterion: criterion.to_string(),
                    expected,
                    got: score.numeric,
                });
            }
        }
        Ok(())
    }

    async fn reset(&self, deadline: Deadline, name: &str) {
        // Best-effort: errors and cancellation are both ignored.
        let _ = self.cancel.guard(self.coaching.reset(deadline, name)).await;
    }
}

fn joined_outcome(
    op: &'static str,
    joined: Result<CallOutcome, tokio::task::JoinError>,
) -> CallOutcome {
    joined.unwrap_or_else(|err| {
        (
            Err(ProbeError::RemoteFailure {
                op,
                cause: format!("task ended abnormally: {err}"),
            }),
            Duration::ZERO,
        )
    })
}

fn scorecard_id_of(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}
