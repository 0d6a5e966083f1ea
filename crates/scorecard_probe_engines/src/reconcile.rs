#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use scorecard_probe_contracts::{
    AuthoritativeScore, AuthoritativeScorecard, CriterionNameMap, Deadline, Finding, FindingRule,
    MirroredScore, MirroredScorecard, ProbeError, ScorecardRef,
};
use scorecard_probe_storage::{ColStoreRepo, RelStoreRepo};

use crate::template::TemplateResolver;

/// Allowed lag of the mirrored submit time behind the authoritative one.
const SUBMIT_TOLERANCE_SECS: i64 = 1;

/// Everything both stores hold for one scorecard at fetch time.
/// Raw-version reads are informational, so their failures are kept as text
/// instead of aborting the fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    pub target: ScorecardRef,
    pub scorecard: Option<AuthoritativeScorecard>,
    pub scores: Vec<AuthoritativeScore>,
    pub names: CriterionNameMap,
    pub names_warning: Option<String>,
    pub raw_scorecards: Result<Vec<MirroredScorecard>, String>,
    pub mirrored: Option<MirroredScorecard>,
    pub raw_scores: Result<Vec<MirroredScore>, String>,
    pub mirrored_scores: Vec<MirroredScore>,
}

pub struct Reconciler {
    rel: Arc<dyn RelStoreRepo>,
    col: Arc<dyn ColStoreRepo>,
    call_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        rel: Arc<dyn RelStoreRepo>,
        col: Arc<dyn ColStoreRepo>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            rel,
            col,
            call_timeout,
        }
    }

    /// Pings both stores; either failing is fatal for the invocation.
    pub async fn ping(&self) -> Result<(), ProbeError> {
        self.rel.ping(self.deadline()).await?;
        self.col.ping(self.deadline()).await?;
        Ok(())
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.call_timeout)
    }

    /// Authoritative and merged reads are fatal on error; raw reads and name
    /// resolution are not.
    pub async fn fetch(&self, target: &ScorecardRef) -> Result<SyncSnapshot, ProbeError> {
        let (customer, profile, id) = (target.customer(), target.profile(), target.scorecard_id());

        let scorecard = self
            .rel
            .read_scorecard(self.deadline(), customer, profile, id)
            .await?;
        let (scores, names, names_warning) = match &scorecard {
            Some(sc) => {
                let resolved = TemplateResolver::new(self.rel.as_ref())
                    .resolve(
                        self.deadline(),
                        customer,
                        profile,
                        &sc.template_id,
                        &sc.template_rev,
                    )
                    .await;
                let scores = self.rel.read_scores(self.deadline(), id).await?;
                (scores, resolved.names, resolved.warning)
            }
            None => (Vec::new(), CriterionNameMap::new(), None),
        };

        let raw_scorecards = self
            .col
            .read_scorecards_raw(self.deadline(), customer, profile, id)
            .await
            .map_err(|e| e.to_string());
        let mirrored = self
            .col
            .read_scorecard_merged(self.deadline(), customer, profile, id)
            .await?;
        let raw_scores = self
            .col
            .read_scores_raw(self.deadline(), customer, profile, id)
            .await
            .map_err(|e| e.to_string());
        let mirrored_scores = self
            .col
            .read_scores_merged(self.deadline(), customer, profile, id)
            .await?;

        Ok(SyncSnapshot {
            target: target.clone(),
            scorecard,
            scores,
            names,
            names_warning,
            raw_scorecards,
            mirrored,
            raw_scores,
            mirrored_scores,
        })
    }
}

pub fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Findings for one snapshot, in rule order. Pure: equal snapshots always
/// produce equal findings.
pub fn reconcile(snapshot: &SyncSnapshot) -> Vec<Finding> {
    let mut out = Vec::new();

    let auth = match (&snapshot.scorecard, &snapshot.mirrored) {
        (None, None) => {
            out.push(Finding::warn(
                FindingRule::Existence,
                "Scorecard not found in both PostgreSQL and ClickHouse",
            ));
            return out;
        }
        (None, Some(_)) => {
            out.push(Finding::fail(
                FindingRule::Existence,
                "Scorecard not in PostgreSQL but exists in ClickHouse",
            ));
            return out;
        }
        (Some(auth), None) => {
            out.push(Finding::fail(
                FindingRule::Existence,
                "Scorecard exists in PostgreSQL but NOT in ClickHouse",
            ));
            auth
        }
        (Some(auth), Some(_)) => {
            out.push(Finding::pass(
                FindingRule::Existence,
                "Scorecard exists in both PostgreSQL and ClickHouse",
            ));
            auth
        }
    };
    let mirrored = snapshot.mirrored.as_ref();

    score_count(&snapshot.scores, &snapshot.mirrored_scores, &mut out);
    submission(auth, mirrored, &mut out);
    child_stamps(auth, &snapshot.mirrored_scores, &mut out);
    if let Some(mirrored) = mirrored {
        aggregate_score(auth, mirrored, &mut out);
    }
    criterion_diff(
        &snapshot.scores,
        &snapshot.mirrored_scores,
        &snapshot.names,
        &mut out,
    );
    out
}

/// Closing line of a reconciliation report.
pub fn summary_line(findings: &[Finding]) -> &'static str {
    if findings.iter().any(Finding::is_fail) {
        "SOME FAILED - Data sync issue detected"
    } else {
        "ALL PASSED - Data is synced correctly"
    }
}

fn score_count(auth: &[AuthoritativeScore], mirrored: &[MirroredScore], out: &mut Vec<Finding>) {
    if auth.len() != mirrored.len() {
        out.push(Finding::fail(
            FindingRule::ScoreCount,
            format!(
                "Score count mismatch - PG: {}, CH: {}",
                auth.len(),
                mirrored.len()
            ),
        ));
    } else {
        out.push(Finding::pass(
            FindingRule::ScoreCount,
            format!("Score count matches ({})", auth.len()),
        ));
    }
}

fn submission(
    auth: &AuthoritativeScorecard,
    mirrored: Option<&MirroredScorecard>,
    out: &mut Vec<Finding>,
) {
    let Some(mirrored) = mirrored else {
        return;
    };
    let rule = FindingRule::SubmissionConsistency;
    match (auth.submitted_at, mirrored.submit_time) {
        (Some(_), None) => out.push(Finding::fail(
            rule,
            "CH scorecard has empty/default scorecard_submit_time",
        )),
        (Some(pg), Some(ch)) => {
            if ch < pg - chrono::Duration::seconds(SUBMIT_TOLERANCE_SECS) {
                out.push(Finding::fail(
                    rule,
                    format!(
                        "CH submit_time ({}) is earlier than PG ({})",
                        format_time(&ch),
                        format_time(&pg)
                    ),
                ));
            } else {
                out.push(Finding::pass(
                    rule,
                    format!(
                        "CH scorecard_submit_time ({}) >= PG submitted_at",
                        format_time(&ch)
                    ),
                ));
            }
        }
        (None, Some(ch)) => out.push(Finding::warn(
            rule,
            format!(
                "CH has submit_time ({}) but PG is not submitted",
                format_time(&ch)
            ),
        )),
        (None, None) => {}
    }
}

fn child_stamps(auth: &AuthoritativeScorecard, mirrored: &[MirroredScore], out: &mut Vec<Finding>) {
    if !auth.is_submitted() || mirrored.is_empty() {
        return;
    }
    let rule = FindingRule::ChildSubmitStamps;
    let mut unset = mirrored.iter().filter(|s| s.submit_time.is_none()).peekable();
    if unset.peek().is_none() {
        out.push(Finding::pass(
            rule,
            format!(
                "All {} CH scores carry scorecard_submit_time",
                mirrored.len()
            ),
        ));
        return;
    }
    for score in unset {
        out.push(Finding::fail(
            rule,
            format!(
                "CH score {} has empty/default scorecard_submit_time",
                score.criterion_id
            ),
        ));
    }
}

fn aggregate_score(
    auth: &AuthoritativeScorecard,
    mirrored: &MirroredScorecard,
    out: &mut Vec<Finding>,
) {
    let rule = FindingRule::AggregateScore;
    match auth.score {
        None => out.push(Finding::warn(
            rule,
            format!(
                "PG score is NULL; CH score {:.2} not compared",
                mirrored.score
            ),
        )),
        Some(pg) if pg != mirrored.score => out.push(Finding::fail(
            rule,
            format!(
                "Overall score mismatch - PG: {:.2}, CH: {:.2}",
                pg, mirrored.score
            ),
        )),
        Some(pg) => out.push(Finding::pass(
            rule,
            format!("Overall score matches ({pg:.2})"),
        )),
    }
}

fn criterion_diff(
    auth: &[AuthoritativeScore],
    mirrored: &[MirroredScore],
    names: &CriterionNameMap,
    out: &mut Vec<Finding>,
) {
    let rule = FindingRule::CriterionDiff;
    let by_criterion: BTreeMap<&str, &AuthoritativeScore> = auth
        .iter()
        .map(|s| (s.criterion_id.as_str(), s))
        .collect();

    for ch in mirrored {
        let label = names.label(&ch.criterion_id);
        let Some(pg) = by_criterion.get(ch.criterion_id.as_str()) else {
            out.push(Finding::fail(
                rule,
                format!("CH has criterion {label} not found in PG"),
            ));
            continue;
        };
        let issues = field_issues(pg, ch);
        if issues.is_empty() {
            out.push(Finding::pass(rule, label));
        } else {
            out.push(Finding::fail(rule, format!("{label} - {}", issues.join(", "))));
        }
    }

    let mirrored_ids: BTreeSet<&str> = mirrored.iter().map(|s| s.criterion_id.as_str()).collect();
    for pg in auth {
        if !mirrored_ids.contains(pg.criterion_id.as_str()) {
            out.push(Finding::fail(
                rule,
                format!(
                    "PG has criterion {} not found in CH",
                    names.label(&pg.criterion_id)
                ),
            ));
        }
    }
}

/// Exact comparisons. Absent authoritative numbers are not compared;
/// absent authoritative text compares as "".
fn field_issues(pg: &AuthoritativeScore, ch: &MirroredScore) -> Vec<String> {
    let mut issues = Vec::new();
    if let Some(numeric) = pg.numeric {
        if numeric != ch.numeric {
            issues.push(format!("numeric: PG={numeric:.2} CH={:.2}", ch.numeric));
        }
    }
    if let Some(ai) = pg.ai_value {
        if ai != ch.ai_value {
            issues.push(format!("ai: PG={ai:.2} CH={:.2}", ch.ai_value));
        }
    }
    if pg.text_or_empty() != ch.text {
        issues.push(format!("text: PG={:?} CH={:?}", pg.text_or_empty(), ch.text));
    }
    if pg.not_applicable != ch.not_applicable {
        issues.push(format!(
            "na: PG={} CH={}",
            pg.not_applicable, ch.not_applicable
        ));
    }
    if pg.ai_scored != ch.ai_scored {
        issues.push(format!(
            "ai_scored: PG={} CH={}",
            pg.ai_scored, ch.ai_scored
        ));
    }
    issues
}
