#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use scorecard_probe_adapter::{
    CoachingClient, CoachingScorecard, ScorecardPatch, ScorecardSpec,
};
use scorecard_probe_contracts::{
    AuthoritativeScore, AuthoritativeScorecard, Deadline, IterationResult, MirroredScore,
    MirroredScorecard, ProbeError,
};
use scorecard_probe_engines::{cancel_pair, CancelToken, RaceConfig, RaceFixture, RaceHarness};
use scorecard_probe_storage::memory::{InMemoryColStore, InMemoryRelStore};
use scorecard_probe_storage::{ColStoreRepo, RelStoreRepo};

const CUSTOMER: &str = "cox";
const PROFILE: &str = "sales";

/// How the fake mirror applies the Update and Submit writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MirrorOrder {
    /// Every call is mirrored immediately from the authoritative state.
    InOrder,
    /// The Update write lands after the Submit write, carrying the state
    /// captured before submission.
    SubmitOvertakesUpdate,
}

#[derive(Debug, Default)]
struct Script {
    fail_create_calls: BTreeSet<u32>,
    fail_update: bool,
    fail_submit: bool,
    omit_submit_time: bool,
    update_delay: Duration,
    submit_delay: Duration,
    /// Criterion whose score rows never reach the mirror.
    unmirrored_criterion: Option<&'static str>,
}

#[derive(Debug, Default)]
struct FakeState {
    create_calls: u32,
    tick: i64,
    records: BTreeMap<String, (AuthoritativeScorecard, Vec<AuthoritativeScore>)>,
    deferred_update: Option<(AuthoritativeScorecard, Vec<AuthoritativeScore>)>,
    resets: Vec<String>,
    deadlines: Vec<(&'static str, Deadline)>,
}

/// Coaching service stand-in that writes through to in-memory stores and
/// mirrors its writes into the columnar fake.
struct ScriptedCoaching {
    rel: Arc<InMemoryRelStore>,
    col: Arc<InMemoryColStore>,
    order: MirrorOrder,
    script: Script,
    state: Mutex<FakeState>,
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap()
}

fn id_of(name: &str) -> String {
    name.rsplit('/').next().unwrap_or(name).to_string()
}

fn remote(op: &'static str, cause: &str) -> ProbeError {
    ProbeError::RemoteFailure {
        op,
        cause: cause.to_string(),
    }
}

impl ScriptedCoaching {
    fn new(
        rel: Arc<InMemoryRelStore>,
        col: Arc<InMemoryColStore>,
        order: MirrorOrder,
        script: Script,
    ) -> Arc<Self> {
        Arc::new(Self {
            rel,
            col,
            order,
            script,
            state: Mutex::new(FakeState::default()),
        })
    }

    fn resets(&self) -> Vec<String> {
        self.state.lock().unwrap().resets.clone()
    }

    fn deadlines(&self) -> Vec<(&'static str, Deadline)> {
        self.state.lock().unwrap().deadlines.clone()
    }

    fn now(state: &mut FakeState) -> DateTime<Utc> {
        state.tick += 1;
        base() + chrono::Duration::seconds(state.tick)
    }

    fn persist(&self, sc: &AuthoritativeScorecard, scores: &[AuthoritativeScore]) {
        self.rel.upsert_scorecard(sc.clone());
        for s in scores {
            self.rel.upsert_score(s.clone());
        }
    }

    fn mirror(
        &self,
        state: &mut FakeState,
        sc: &AuthoritativeScorecard,
        scores: &[AuthoritativeScore],
    ) {
        let at = Self::now(state);
        self.col.append_scorecard_version(MirroredScorecard {
            scorecard_id: sc.scorecard_id.clone(),
            customer: sc.customer.clone(),
            profile: sc.profile.clone(),
            created_at: Some(sc.created_at),
            updated_at: Some(sc.updated_at),
            submit_time: sc.submitted_at,
            score: sc.score.unwrap_or(0.0),
            template_id: sc.template_id.clone(),
            template_rev: sc.template_rev.clone(),
            agent_user_id: sc.agent_user_id.clone(),
            creator_user_id: String::new(),
            submitter_user_id: String::new(),
            mirror_update_time: at,
        });
        for s in scores {
            if self.script.unmirrored_criterion == Some(s.criterion_id.as_str()) {
                continue;
            }
            self.col.append_score_version(MirroredScore {
                score_id: s.score_id.clone(),
                scorecard_id: s.scorecard_id.clone(),
                criterion_id: s.criterion_id.clone(),
                numeric: s.numeric.unwrap_or(0.0),
                ai_value: 0.0,
                text: String::new(),
                not_applicable: false,
                ai_scored: false,
                submit_time: sc.submitted_at,
                mirror_update_time: at,
            });
        }
    }

    fn view(sc: &AuthoritativeScorecard, name: &str) -> CoachingScorecard {
        CoachingScorecard {
            name: name.to_string(),
            submitted_at: sc.submitted_at,
            score: sc.score,
            scores: vec![],
        }
    }
}

#[async_trait]
impl CoachingClient for ScriptedCoaching {
    async fn create(
        &self,
        deadline: Deadline,
        parent: &str,
        spec: &ScorecardSpec,
    ) -> Result<CoachingScorecard, ProbeError> {
        let mut state = self.state.lock().unwrap();
        state.deadlines.push(("Create", deadline));
        state.create_calls += 1;
        if self.script.fail_create_calls.contains(&state.create_calls) {
            return Err(remote("Create", "Unavailable: upstream reset"));
        }
        let id = format!("sc-{}", state.create_calls);
        let now = Self::now(&mut state);
        let sc = AuthoritativeScorecard {
            scorecard_id: id.clone(),
            customer: CUSTOMER.to_string(),
            profile: PROFILE.to_string(),
            created_at: now,
            updated_at: now,
            submitted_at: None,
            score: None,
            template_id: "tpl".to_string(),
            template_rev: "rev".to_string(),
            agent_user_id: "agent".to_string(),
            creator_user_id: None,
            submitter_user_id: None,
        };
        let scores: Vec<AuthoritativeScore> = spec
            .scores
            .iter()
            .map(|s| AuthoritativeScore {
                score_id: format!("{id}-{}", s.criterion_id),
                scorecard_id: id.clone(),
                criterion_id: s.criterion_id.clone(),
                numeric: s.numeric.map(f64::from),
                ai_value: None,
                text: None,
                not_applicable: false,
                ai_scored: false,
            })
            .collect();
        self.persist(&sc, &scores);
        self.mirror(&mut state, &sc, &scores);
        state.records.insert(id.clone(), (sc.clone(), scores));
        Ok(Self::view(&sc, &format!("{parent}/scorecards/{id}")))
    }

    async fn update(
        &self,
        deadline: Deadline,
        name: &str,
        patch: &ScorecardPatch,
    ) -> Result<CoachingScorecard, ProbeError> {
        self.state.lock().unwrap().deadlines.push(("Update", deadline));
        tokio::time::sleep(self.script.update_delay).await;
        if self.script.fail_update {
            return Err(remote("Update", "Internal: version conflict"));
        }
        let mut state = self.state.lock().unwrap();
        let now = Self::now(&mut state);
        let (mut sc, mut scores) = state
            .records
            .get(&id_of(name))
            .cloned()
            .ok_or_else(|| remote("Update", "NotFound"))?;
        sc.updated_at = now;
        for p in &patch.scores {
            if let Some(s) = scores.iter_mut().find(|s| s.criterion_id == p.criterion_id) {
                s.numeric = p.numeric.map(f64::from);
            }
        }
        self.persist(&sc, &scores);
        match self.order {
            MirrorOrder::InOrder => self.mirror(&mut state, &sc, &scores),
            MirrorOrder::SubmitOvertakesUpdate => {
                state.deferred_update = Some((sc.clone(), scores.clone()));
            }
        }
        state.records.insert(sc.scorecard_id.clone(), (sc.clone(), scores));
        Ok(Self::view(&sc, name))
    }

    async fn submit(&self, deadline: Deadline, name: &str) -> Result<CoachingScorecard, ProbeError> {
        self.state.lock().unwrap().deadlines.push(("Submit", deadline));
        tokio::time::sleep(self.script.submit_delay).await;
        if self.script.fail_submit {
            return Err(remote("Submit", "FailedPrecondition: not ready"));
        }
        let mut state = self.state.lock().unwrap();
        let now = Self::now(&mut state);
        let (mut sc, scores) = state
            .records
            .get(&id_of(name))
            .cloned()
            .ok_or_else(|| remote("Submit", "NotFound"))?;
        sc.updated_at = now;
        sc.submitted_at = Some(now);
        let sum: f64 = scores.iter().filter_map(|s| s.numeric).sum();
        sc.score = Some(sum / scores.len().max(1) as f64);
        self.persist(&sc, &scores);
        self.mirror(&mut state, &sc, &scores);
        if let Some((stale_sc, stale_scores)) = state.deferred_update.take() {
            self.mirror(&mut state, &stale_sc, &stale_scores);
        }
        state.records.insert(sc.scorecard_id.clone(), (sc.clone(), scores));
        let mut view = Self::view(&sc, name);
        if self.script.omit_submit_time {
            view.submitted_at = None;
        }
        Ok(view)
    }

    async fn reset(&self, deadline: Deadline, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.deadlines.push(("Reset", deadline));
        state.resets.push(name.to_string());
        let Some((mut sc, mut scores)) = state.records.get(&id_of(name)).cloned() else {
            return;
        };
        sc.submitted_at = None;
        sc.score = None;
        for s in &mut scores {
            s.numeric = None;
        }
        self.persist(&sc, &scores);
        self.mirror(&mut state, &sc, &scores);
        state.records.insert(sc.scorecard_id.clone(), (sc, scores));
    }
}

struct Rig {
    rel: Arc<InMemoryRelStore>,
    col: Arc<InMemoryColStore>,
    coaching: Arc<ScriptedCoaching>,
}

fn rig(order: MirrorOrder, script: Script) -> Rig {
    let rel = Arc::new(InMemoryRelStore::new());
    let col = Arc::new(InMemoryColStore::new());
    let coaching = ScriptedCoaching::new(rel.clone(), col.clone(), order, script);
    Rig { rel, col, coaching }
}

fn config(iterations: u32, api_delay_ms: u64, wait_secs: u64) -> RaceConfig {
    RaceConfig {
        iterations,
        wait: Duration::from_secs(wait_secs),
        api_delay: Duration::from_millis(api_delay_ms),
        call_timeout: Duration::from_secs(30),
        fixture: RaceFixture {
            customer: CUSTOMER.to_string(),
            profile: PROFILE.to_string(),
            template_name: "customers/cox/profiles/sales/scorecardTemplates/tpl@rev".to_string(),
            agent_user_name: "customers/cox/users/agent".to_string(),
            conversation_name: "customers/cox/profiles/sales/conversations/conv".to_string(),
            criterion_1: "c1".to_string(),
            criterion_2: "c2".to_string(),
        },
    }
}

fn harness(rig: &Rig, config: RaceConfig, cancel: CancelToken) -> RaceHarness {
    RaceHarness::new(config, rig.coaching.clone(), rig.col.clone(), cancel).unwrap()
}

fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(5))
}

fn name_of(id: &str) -> String {
    format!("customers/{CUSTOMER}/profiles/{PROFILE}/scorecards/{id}")
}

#[tokio::test(start_paused = true)]
async fn at_race_harness_01_in_order_mirror_passes_and_resets() {
    let rig = rig(MirrorOrder::InOrder, Script::default());
    let h = harness(&rig, config(1, 0, 2), CancelToken::never());

    let mut seen = Vec::new();
    let run = h.run(|r: &IterationResult| seen.push(r.iteration)).await;
    assert_eq!(seen, vec![1]);
    assert!(run.all_passed());
    let result = &run.results[0];
    assert!(result.passed, "{:?}", result.error);
    assert_eq!(result.scorecard_id, "sc-1");

    // What verification saw: flipped values with real submit stamps. The
    // reset write lands after, so look at the version before it.
    let raw = rig
        .col
        .read_scorecards_raw(deadline(), CUSTOMER, PROFILE, "sc-1")
        .await
        .unwrap();
    let before_reset = &raw[raw.len() - 2];
    assert!(before_reset.submit_time.is_some());
    let raw_scores = rig
        .col
        .read_scores_raw(deadline(), CUSTOMER, PROFILE, "sc-1")
        .await
        .unwrap();
    let c1: Vec<f64> = raw_scores
        .iter()
        .filter(|s| s.criterion_id == "c1" && s.submit_time.is_some())
        .map(|s| s.numeric)
        .collect();
    assert_eq!(c1.last(), Some(&0.0));

    assert_eq!(rig.coaching.resets(), vec![name_of("sc-1")]);
    let after = rig
        .rel
        .read_scorecard(deadline(), CUSTOMER, PROFILE, "sc-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.submitted_at, None);
}

#[tokio::test(start_paused = true)]
async fn at_race_harness_02_overtaken_update_fails_and_keeps_scorecard() {
    let rig = rig(MirrorOrder::SubmitOvertakesUpdate, Script::default());
    let h = harness(&rig, config(1, 50, 2), CancelToken::never());

    let run = h.run(|_| {}).await;
    assert!(!run.all_passed());
    let result = &run.results[0];
    assert!(!result.passed);
    assert_eq!(
        result.error.as_deref(),
        Some("invalid scorecard_submit_time: unset sentinel")
    );

    assert!(rig.coaching.resets().is_empty());
    let kept = rig
        .rel
        .read_scorecard(deadline(), CUSTOMER, PROFILE, "sc-1")
        .await
        .unwrap()
        .unwrap();
    assert!(kept.submitted_at.is_some());

    assert_eq!(run.summary.failed, 1);
    assert_eq!(run.summary.failures[0].scorecard_id, "sc-1");
}

#[tokio::test(start_paused = true)]
async fn at_race_harness_03_update_failure_resets_and_fails() {
    let rig = rig(
        MirrorOrder::InOrder,
        Script {
            fail_update: true,
            ..Script::default()
        },
    );
    let h = harness(&rig, config(1, 10, 2), CancelToken::never());

    let result = h.run_iteration(1).await.unwrap();
    assert!(!result.passed);
    assert_eq!(
        result.error.as_deref(),
        Some("Update failed: Internal: version conflict")
    );
    assert_eq!(rig.coaching.resets(), vec![name_of("sc-1")]);
}

#[tokio::test(start_paused = true)]
async fn at_race_harness_04_submit_failure_resets_and_fails() {
    let rig = rig(
        MirrorOrder::InOrder,
        Script {
            fail_submit: true,
            ..Script::default()
        },
    );
    let h = harness(&rig, config(1, 10, 2), CancelToken::never());

    let result = h.run_iteration(1).await.unwrap();
    assert_eq!(
        result.error.as_deref(),
        Some("Submit failed: FailedPrecondition: not ready")
    );
    assert_eq!(rig.coaching.resets(), vec![name_of("sc-1")]);
}

#[tokio::test(start_paused = true)]
async fn at_race_harness_05_create_failure_only_costs_that_iteration() {
    let rig = rig(
        MirrorOrder::InOrder,
        Script {
            fail_create_calls: BTreeSet::from([1]),
            ..Script::default()
        },
    );
    let h = harness(&rig, config(2, 10, 2), CancelToken::never());

    let run = h.run(|_| {}).await;
    assert_eq!(run.results.len(), 2);
    assert!(!run.results[0].passed);
    assert_eq!(run.results[0].scorecard_id, "");
    assert_eq!(
        run.results[0].error.as_deref(),
        Some("Create failed: Unavailable: upstream reset")
    );
    assert!(run.results[1].passed);
    assert_eq!(run.summary.success_rate_display(), "50.00%");
    assert!(!run.all_passed());
}

#[tokio::test(start_paused = true)]
async fn at_race_harness_06_missing_submit_time_in_response_is_not_fatal() {
    let rig = rig(
        MirrorOrder::InOrder,
        Script {
            omit_submit_time: true,
            ..Script::default()
        },
    );
    let h = harness(&rig, config(1, 10, 2), CancelToken::never());

    let result = h.run_iteration(1).await.unwrap();
    assert!(result.passed, "{:?}", result.error);
}

#[tokio::test(start_paused = true)]
async fn at_race_harness_07_mirror_outage_fails_verification_without_reset() {
    let rig = rig(MirrorOrder::InOrder, Script::default());
    rig.col.set_unavailable(true);
    let h = harness(&rig, config(1, 10, 2), CancelToken::never());

    let result = h.run_iteration(1).await.unwrap();
    let error = result.error.unwrap_or_default();
    assert!(
        error.starts_with("scorecard not found in CH: clickhouse unavailable"),
        "{error}"
    );
    assert!(rig.coaching.resets().is_empty());
}

#[tokio::test(start_paused = true)]
async fn at_race_harness_08_cancel_stops_run_and_keeps_completed_results() {
    let rig = rig(MirrorOrder::InOrder, Script::default());
    let (canceller, token) = cancel_pair();
    let h = harness(&rig, config(3, 10, 2), token);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        canceller.cancel();
    });
    let run = h.run(|_| {}).await;

    assert!(run.interrupted);
    assert_eq!(run.results.len(), 1);
    assert!(run.results[0].passed);
    assert_eq!(run.summary.total, 3);
    assert_eq!(run.summary.passed, 1);
    assert!(!run.all_passed());
}

#[tokio::test(start_paused = true)]
async fn at_race_harness_09_latencies_are_measured_per_task() {
    let rig = rig(
        MirrorOrder::InOrder,
        Script {
            update_delay: Duration::from_millis(30),
            submit_delay: Duration::from_millis(20),
            ..Script::default()
        },
    );
    let h = harness(&rig, config(1, 10, 2), CancelToken::never());

    let result = h.run_iteration(1).await.unwrap();
    assert!(result.passed, "{:?}", result.error);
    assert!(result.latency.update >= Duration::from_millis(30));
    assert!(result.latency.submit >= Duration::from_millis(20));
    assert!(result.latency.submit < Duration::from_millis(30));
}

#[tokio::test(start_paused = true)]
async fn at_race_harness_10_every_call_shares_the_iteration_deadline() {
    let rig = rig(
        MirrorOrder::InOrder,
        Script {
            update_delay: Duration::from_millis(30),
            submit_delay: Duration::from_millis(20),
            ..Script::default()
        },
    );
    let cfg = config(1, 10, 2);
    let budget = cfg.call_timeout + cfg.api_delay + cfg.wait;
    let h = harness(&rig, cfg, CancelToken::never());

    let started = std::time::Instant::now();
    let result = h.run_iteration(1).await.unwrap();
    let finished = std::time::Instant::now();
    assert!(result.passed, "{:?}", result.error);

    let calls = rig.coaching.deadlines();
    let mut ops: Vec<&str> = calls.iter().map(|(op, _)| *op).collect();
    ops.sort_unstable();
    assert_eq!(ops, vec!["Create", "Reset", "Submit", "Update"]);

    let first = calls[0].1;
    assert!(calls.iter().all(|(_, d)| *d == first), "{calls:?}");
    assert!(first >= Deadline::at(started + budget));
    assert!(first <= Deadline::at(finished + budget));
}

#[tokio::test(start_paused = true)]
async fn at_race_harness_11_mirror_missing_criterion_fails_without_reset() {
    let rig = rig(
        MirrorOrder::InOrder,
        Script {
            unmirrored_criterion: Some("c2"),
            ..Script::default()
        },
    );
    let h = harness(&rig, config(1, 10, 2), CancelToken::never());

    let result = h.run_iteration(1).await.unwrap();
    assert!(!result.passed);
    assert_eq!(
        result.error.as_deref(),
        Some("score not found in CH for c2")
    );
    assert!(rig.coaching.resets().is_empty());
}
