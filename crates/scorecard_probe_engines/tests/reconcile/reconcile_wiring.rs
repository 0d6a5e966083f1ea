#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use scorecard_probe_contracts::{
    AuthoritativeScore, AuthoritativeScorecard, Finding, FindingRule, MirroredScore,
    MirroredScorecard, ProbeError, ScorecardRef, Severity,
};
use scorecard_probe_engines::{reconcile, summary_line, Reconciler};
use scorecard_probe_storage::memory::{InMemoryColStore, InMemoryRelStore};

const ID: &str = "019bd22d-fda5-745f-92df-9cb8f1644950";

fn t(millis: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap() + chrono::Duration::milliseconds(millis)
}

fn target() -> ScorecardRef {
    ScorecardRef::parse(&format!("customers/cox/profiles/sales/scorecards/{ID}")).unwrap()
}

fn auth(submitted_at: Option<DateTime<Utc>>, score: Option<f64>) -> AuthoritativeScorecard {
    AuthoritativeScorecard {
        scorecard_id: ID.to_string(),
        customer: "cox".to_string(),
        profile: "sales".to_string(),
        created_at: t(0),
        updated_at: t(1_000),
        submitted_at,
        score,
        template_id: "tpl".to_string(),
        template_rev: "rev".to_string(),
        agent_user_id: "agent".to_string(),
        creator_user_id: None,
        submitter_user_id: None,
    }
}

fn auth_score(criterion: &str, numeric: f64) -> AuthoritativeScore {
    AuthoritativeScore {
        score_id: format!("s-{criterion}"),
        scorecard_id: ID.to_string(),
        criterion_id: criterion.to_string(),
        numeric: Some(numeric),
        ai_value: None,
        text: None,
        not_applicable: false,
        ai_scored: false,
    }
}

fn mirrored(submit_time: Option<DateTime<Utc>>, score: f64) -> MirroredScorecard {
    MirroredScorecard {
        scorecard_id: ID.to_string(),
        customer: "cox".to_string(),
        profile: "sales".to_string(),
        created_at: Some(t(0)),
        updated_at: Some(t(1_000)),
        submit_time,
        score,
        template_id: "tpl".to_string(),
        template_rev: "rev".to_string(),
        agent_user_id: "agent".to_string(),
        creator_user_id: String::new(),
        submitter_user_id: String::new(),
        mirror_update_time: t(5_000),
    }
}

fn mirrored_score(
    criterion: &str,
    numeric: f64,
    submit_time: Option<DateTime<Utc>>,
) -> MirroredScore {
    MirroredScore {
        score_id: format!("s-{criterion}"),
        scorecard_id: ID.to_string(),
        criterion_id: criterion.to_string(),
        numeric,
        ai_value: 0.0,
        text: String::new(),
        not_applicable: false,
        ai_scored: false,
        submit_time,
        mirror_update_time: t(5_000),
    }
}

const TEMPLATE: &str = r#"{"chapters": [{"identifier": "ch", "criteria": [
    {"identifier": "c1", "displayName": "Greeting"},
    {"identifier": "c2", "displayName": "Discovery"},
    {"identifier": "c3", "displayName": "Pricing"},
    {"identifier": "c4", "displayName": "Objections"},
    {"identifier": "c5", "displayName": "Close"}
]}]}"#;

struct Stores {
    rel: Arc<InMemoryRelStore>,
    col: Arc<InMemoryColStore>,
}

impl Stores {
    fn new() -> Self {
        let rel = Arc::new(InMemoryRelStore::new());
        rel.put_template("cox", "sales", "tpl", "rev", TEMPLATE);
        Self {
            rel,
            col: Arc::new(InMemoryColStore::new()),
        }
    }

    fn with_auth(self, sc: AuthoritativeScorecard, scores: &[(&str, f64)]) -> Self {
        self.rel.upsert_scorecard(sc);
        for (c, v) in scores {
            self.rel.upsert_score(auth_score(c, *v));
        }
        self
    }

    fn with_mirror(
        self,
        sc: MirroredScorecard,
        scores: &[(&str, f64)],
        submit_time: Option<DateTime<Utc>>,
    ) -> Self {
        self.col.append_scorecard_version(sc);
        for (c, v) in scores {
            self.col.append_score_version(mirrored_score(c, *v, submit_time));
        }
        self
    }

    fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.rel.clone(), self.col.clone(), Duration::from_secs(5))
    }

    async fn findings(&self) -> Vec<Finding> {
        let snapshot = self.reconciler().fetch(&target()).await.unwrap();
        reconcile(&snapshot)
    }
}

fn lines(findings: &[Finding]) -> Vec<String> {
    findings.iter().map(ToString::to_string).collect()
}

fn of_rule(findings: &[Finding], rule: FindingRule) -> Vec<&Finding> {
    findings.iter().filter(|f| f.rule == rule).collect()
}

const FIVE: [(&str, f64); 5] = [("c1", 1.0), ("c2", 0.0), ("c3", 1.0), ("c4", 1.0), ("c5", 0.0)];

#[tokio::test]
async fn at_reconcile_01_synced_scorecard_passes_every_rule() {
    let stores = Stores::new()
        .with_auth(auth(Some(t(2_000)), Some(0.6)), &FIVE)
        .with_mirror(mirrored(Some(t(2_000)), 0.6), &FIVE, Some(t(2_000)));

    let findings = stores.findings().await;
    assert!(findings.iter().all(|f| f.severity == Severity::Pass), "{:?}", lines(&findings));
    assert_eq!(
        lines(&findings)[..5],
        [
            "PASS Existence: Scorecard exists in both PostgreSQL and ClickHouse",
            "PASS Score count: Score count matches (5)",
            "PASS Submission consistency: CH scorecard_submit_time (2026-02-01T10:00:02Z) >= PG submitted_at",
            "PASS Child submit stamps: All 5 CH scores carry scorecard_submit_time",
            "PASS Aggregate score: Overall score matches (0.60)",
        ]
    );
    assert_eq!(findings[5].message, "c1 (Greeting)");
    assert_eq!(findings.len(), 10);
    assert_eq!(summary_line(&findings), "ALL PASSED - Data is synced correctly");
}

#[tokio::test]
async fn at_reconcile_02_submitted_but_not_mirrored_fails_existence() {
    let stores = Stores::new().with_auth(auth(Some(t(2_000)), Some(0.5)), &[("c1", 1.0), ("c2", 0.0)]);

    let findings = stores.findings().await;
    assert_eq!(
        findings[0].to_string(),
        "FAIL Existence: Scorecard exists in PostgreSQL but NOT in ClickHouse"
    );
    assert_eq!(
        findings[1].message,
        "Score count mismatch - PG: 2, CH: 0"
    );
    assert!(of_rule(&findings, FindingRule::SubmissionConsistency).is_empty());
    assert!(of_rule(&findings, FindingRule::AggregateScore).is_empty());
    let missing: Vec<&str> = of_rule(&findings, FindingRule::CriterionDiff)
        .iter()
        .map(|f| f.message.as_str())
        .collect();
    assert_eq!(
        missing,
        vec![
            "PG has criterion c1 (Greeting) not found in CH",
            "PG has criterion c2 (Discovery) not found in CH",
        ]
    );
    assert_eq!(summary_line(&findings), "SOME FAILED - Data sync issue detected");
}

#[tokio::test]
async fn at_reconcile_03_five_vs_four_scores_is_count_failure() {
    let stores = Stores::new()
        .with_auth(auth(Some(t(2_000)), Some(0.6)), &FIVE)
        .with_mirror(mirrored(Some(t(2_000)), 0.6), &FIVE[..4], Some(t(2_000)));

    let findings = stores.findings().await;
    let count = of_rule(&findings, FindingRule::ScoreCount);
    assert_eq!(count.len(), 1);
    assert_eq!(
        count[0].to_string(),
        "FAIL Score count: Score count mismatch - PG: 5, CH: 4"
    );
    assert_eq!(
        findings.last().unwrap().message,
        "PG has criterion c5 (Close) not found in CH"
    );
}

#[tokio::test]
async fn at_reconcile_04_aggregate_score_mismatch_prints_two_decimals() {
    let stores = Stores::new()
        .with_auth(auth(Some(t(2_000)), Some(0.75)), &[("c1", 1.0)])
        .with_mirror(mirrored(Some(t(2_000)), 0.5), &[("c1", 1.0)], Some(t(2_000)));

    let findings = stores.findings().await;
    let agg = of_rule(&findings, FindingRule::AggregateScore);
    assert_eq!(
        agg[0].to_string(),
        "FAIL Aggregate score: Overall score mismatch - PG: 0.75, CH: 0.50"
    );
}

#[tokio::test]
async fn at_reconcile_05_submit_time_tolerance_is_one_second_backwards_only() {
    let pg_submit = t(10_000);
    let cases = [
        (Some(t(9_500)), Severity::Pass),
        (Some(t(9_000)), Severity::Pass),
        (Some(t(8_999)), Severity::Fail),
        (Some(t(60_000)), Severity::Pass),
        (None, Severity::Fail),
    ];
    for (mirror_submit, expected) in cases {
        let stores = Stores::new()
            .with_auth(auth(Some(pg_submit), Some(1.0)), &[("c1", 1.0)])
            .with_mirror(mirrored(mirror_submit, 1.0), &[("c1", 1.0)], mirror_submit);
        let findings = stores.findings().await;
        let sub = of_rule(&findings, FindingRule::SubmissionConsistency);
        assert_eq!(sub.len(), 1);
        assert_eq!(sub[0].severity, expected, "{mirror_submit:?}: {}", sub[0]);
    }
}

#[tokio::test]
async fn at_reconcile_06_unsubmitted_auth_with_mirror_stamp_is_warning() {
    let stores = Stores::new()
        .with_auth(auth(None, None), &[("c1", 1.0)])
        .with_mirror(mirrored(Some(t(2_000)), 0.0), &[("c1", 1.0)], Some(t(2_000)));

    let findings = stores.findings().await;
    let sub = of_rule(&findings, FindingRule::SubmissionConsistency);
    assert_eq!(
        sub[0].to_string(),
        "WARN Submission consistency: CH has submit_time (2026-02-01T10:00:02Z) but PG is not submitted"
    );
    assert!(of_rule(&findings, FindingRule::ChildSubmitStamps).is_empty());
    assert_eq!(
        of_rule(&findings, FindingRule::AggregateScore)[0].severity,
        Severity::Warn
    );
    assert_eq!(summary_line(&findings), "ALL PASSED - Data is synced correctly");
}

#[tokio::test]
async fn at_reconcile_07_unstamped_child_rows_fail_per_criterion() {
    let stores = Stores::new()
        .with_auth(auth(Some(t(2_000)), Some(0.5)), &[("c1", 1.0), ("c2", 0.0)])
        .with_mirror(mirrored(Some(t(2_000)), 0.5), &[("c1", 1.0)], Some(t(2_000)))
        .with_mirror(mirrored(Some(t(2_000)), 0.5), &[("c2", 0.0)], None);

    let findings = stores.findings().await;
    let stamps: Vec<String> = of_rule(&findings, FindingRule::ChildSubmitStamps)
        .iter()
        .map(|f| f.to_string())
        .collect();
    assert_eq!(
        stamps,
        vec!["FAIL Child submit stamps: CH score c2 has empty/default scorecard_submit_time"]
    );
}

#[tokio::test]
async fn at_reconcile_08_field_diffs_and_mirror_only_criteria() {
    let stores = Stores::new()
        .with_auth(auth(Some(t(2_000)), Some(0.5)), &[("c1", 1.0), ("c2", 0.0)])
        .with_mirror(
            mirrored(Some(t(2_000)), 0.5),
            &[("c1", 0.0), ("c2", 0.0), ("zz", 1.0)],
            Some(t(2_000)),
        );

    let findings = stores.findings().await;
    let diffs: Vec<String> = of_rule(&findings, FindingRule::CriterionDiff)
        .iter()
        .map(|f| f.to_string())
        .collect();
    assert_eq!(
        diffs,
        vec![
            "FAIL Per-criterion diff: c1 (Greeting) - numeric: PG=1.00 CH=0.00",
            "PASS Per-criterion diff: c2 (Discovery)",
            "FAIL Per-criterion diff: CH has criterion zz ((unknown)) not found in PG",
        ]
    );
}

#[tokio::test]
async fn at_reconcile_09_absent_rows_short_circuit_existence() {
    let neither = Stores::new().findings().await;
    assert_eq!(
        lines(&neither),
        vec!["WARN Existence: Scorecard not found in both PostgreSQL and ClickHouse"]
    );
    assert_eq!(summary_line(&neither), "ALL PASSED - Data is synced correctly");

    let mirror_only = Stores::new()
        .with_mirror(mirrored(Some(t(2_000)), 0.5), &[("c1", 1.0)], Some(t(2_000)))
        .findings()
        .await;
    assert_eq!(
        lines(&mirror_only),
        vec!["FAIL Existence: Scorecard not in PostgreSQL but exists in ClickHouse"]
    );
}

#[tokio::test]
async fn at_reconcile_10_findings_are_deterministic() {
    let stores = Stores::new()
        .with_auth(auth(Some(t(2_000)), Some(0.75)), &FIVE)
        .with_mirror(mirrored(Some(t(500)), 0.5), &FIVE[1..], None);

    let snapshot = stores.reconciler().fetch(&target()).await.unwrap();
    let first = reconcile(&snapshot);
    for _ in 0..5 {
        assert_eq!(reconcile(&snapshot), first);
    }
}

#[tokio::test]
async fn at_reconcile_11_missing_template_degrades_names_only() {
    let stores = Stores {
        rel: Arc::new(InMemoryRelStore::new()),
        col: Arc::new(InMemoryColStore::new()),
    }
    .with_auth(auth(Some(t(2_000)), Some(1.0)), &[("c1", 1.0)])
    .with_mirror(mirrored(Some(t(2_000)), 1.0), &[("c1", 1.0)], Some(t(2_000)));

    let snapshot = stores.reconciler().fetch(&target()).await.unwrap();
    assert!(snapshot
        .names_warning
        .as_deref()
        .unwrap_or_default()
        .starts_with("query template: template tpl@rev not found"));
    let findings = reconcile(&snapshot);
    assert!(lines(&findings).contains(&"PASS Per-criterion diff: c1 ((unknown))".to_string()));
    assert_eq!(snapshot.raw_scorecards.as_ref().map(Vec::len), Ok(1));
}

#[tokio::test]
async fn at_reconcile_12_store_outage_is_fatal_for_fetch() {
    let stores = Stores::new().with_auth(auth(None, None), &[]);
    stores.col.set_unavailable(true);
    let err = stores.reconciler().fetch(&target()).await.unwrap_err();
    assert!(matches!(
        err,
        ProbeError::GatewayUnavailable {
            backend: "clickhouse",
            ..
        }
    ));
    assert!(stores.reconciler().ping().await.is_err());

    stores.rel.set_unavailable(true);
    assert!(matches!(
        stores.reconciler().fetch(&target()).await,
        Err(ProbeError::GatewayUnavailable {
            backend: "postgres",
            ..
        })
    ));
}
