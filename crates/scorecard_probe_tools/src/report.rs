#![forbid(unsafe_code)]

//! Operator-facing text. Every builder returns a `String` so the binaries
//! only decide where it goes.

use chrono::{DateTime, Utc};
use scorecard_probe_contracts::{
    AuthoritativeScore, AuthoritativeScorecard, CriterionNameMap, Finding, IterationResult,
    MirroredScore, MirroredScorecard,
};
use scorecard_probe_engines::{format_time, summary_line, RaceConfig, RaceRun, SyncSnapshot};

/// `write!` into a `String` without the `fmt::Result`.
macro_rules! put {
    ($out:expr, $($arg:tt)*) => {
        $out.push_str(&format!($($arg)*))
    };
}

macro_rules! putln {
    ($out:expr) => {
        $out.push('\n')
    };
    ($out:expr, $($arg:tt)*) => {{
        put!($out, $($arg)*);
        $out.push('\n');
    }};
}

const RULE_WIDTH: usize = 60;
const UNSET_MIRROR_TIME: &str = "1970-01-01 (default/empty)";

pub fn rule() -> String {
    "=".repeat(RULE_WIDTH)
}

/// Blank line, rule, title, rule.
pub fn section(title: &str) -> String {
    let rule = rule();
    format!("\n{rule}\n{title}\n{rule}")
}

pub fn format_mirror_time(t: Option<&DateTime<Utc>>) -> String {
    match t {
        Some(t) => format_time(t),
        None => UNSET_MIRROR_TIME.to_string(),
    }
}

pub fn banner(config: &RaceConfig, grpc_host: &str) -> String {
    let rule = rule();
    let mut out = String::new();
    putln!(out, "{rule}");
    putln!(out, "Scorecard Async Order Test");
    putln!(out, "{rule}");
    putln!(out, "Iterations: {}", config.iterations);
    putln!(out, "Wait time: {}s", config.wait.as_secs());
    putln!(out, "API delay: {}ms", config.api_delay.as_millis());
    putln!(out, "GRPC Host: {grpc_host}");
    put!(out, "{rule}");
    out
}

pub fn iteration_line(result: &IterationResult) -> String {
    if result.passed {
        format!(
            "  [PASS] Iteration {}: {}",
            result.iteration, result.scorecard_id
        )
    } else {
        format!(
            "  [FAIL] Iteration {}: {} - {}",
            result.iteration,
            result.scorecard_id,
            result.error.as_deref().unwrap_or("")
        )
    }
}

pub fn run_summary(run: &RaceRun) -> String {
    let summary = &run.summary;
    let rule = rule();
    let mut out = String::new();
    putln!(out, "{rule}");
    putln!(out, "TEST SUMMARY");
    putln!(out, "{rule}");
    putln!(out, "Total iterations: {}", summary.total);
    putln!(out, "Passed: {}", summary.passed);
    putln!(out, "Failed: {}", summary.failed);
    putln!(out, "Success rate: {}", summary.success_rate_display());
    if run.interrupted {
        putln!(
            out,
            "Interrupted after {} of {} iterations",
            run.results.len(),
            summary.total
        );
    }
    putln!(out);
    if !summary.failures.is_empty() {
        putln!(out, "Failed iterations:");
        for f in &summary.failures {
            putln!(
                out,
                "  - Iteration {}: {} ({})",
                f.iteration, f.scorecard_id, f.error
            );
        }
        putln!(out);
    }
    put!(out, "{rule}");
    out
}

pub fn authoritative_scorecard(sc: &AuthoritativeScorecard) -> String {
    let mut out = String::from("\nScorecard:\n");
    putln!(out, "  Resource ID:   {}", sc.scorecard_id);
    putln!(out, "  Customer:      {}", sc.customer);
    putln!(out, "  Profile:       {}", sc.profile);
    putln!(
        out,
        "  Template:      {} (rev {})",
        sc.template_id, sc.template_rev
    );
    putln!(out, "  Agent User ID: {}", sc.agent_user_id);
    if let Some(creator) = &sc.creator_user_id {
        putln!(out, "  Creator ID:    {creator}");
    }
    putln!(out, "  Created At:    {}", format_time(&sc.created_at));
    putln!(out, "  Updated At:    {}", format_time(&sc.updated_at));
    match &sc.submitted_at {
        Some(at) => {
            putln!(out, "  Submitted At:  {}", format_time(at));
            if let Some(submitter) = &sc.submitter_user_id {
                putln!(out, "  Submitter ID:  {submitter}");
            }
        }
        None => putln!(out, "  Submitted At:  NULL (not submitted)"),
    }
    match sc.score {
        Some(score) => put!(out, "  Score:         {score:.2}"),
        None => put!(out, "  Score:         NULL"),
    }
    out
}

pub fn authoritative_scores(scores: &[AuthoritativeScore], names: &CriterionNameMap) -> String {
    let mut out = format!("\nScores ({}):", scores.len());
    for s in scores {
        put!(
            out,
            "\n  - {}: {}\n    id: {}\n",
            s.criterion_id,
            names.display_name(&s.criterion_id),
            s.score_id
        );
        match s.numeric {
            Some(v) => put!(out, "    numeric={v:.2}"),
            None => out.push_str("    numeric=NULL"),
        }
        if let Some(ai) = s.ai_value {
            put!(out, ", ai={ai:.2}");
        }
        if !s.text_or_empty().is_empty() {
            put!(out, ", text={:?}", s.text_or_empty());
        }
        put!(out, ", na={}, ai_scored={}", s.not_applicable, s.ai_scored);
    }
    out
}

pub fn raw_scorecards(rows: &Result<Vec<MirroredScorecard>, String>) -> String {
    match rows {
        Err(err) => format!("Error querying ClickHouse scorecard (raw): {err}"),
        Ok(rows) if rows.is_empty() => "No raw scorecard rows found".to_string(),
        Ok(rows) => {
            let mut out = format!("\nFound {} row version(s):", rows.len());
            for (i, row) in rows.iter().enumerate() {
                put!(
                    out,
                    "\n  Version {}:\n    submit_time={}, update_time={}, score={:.2}",
                    i + 1,
                    format_mirror_time(row.submit_time.as_ref()),
                    format_time(&row.mirror_update_time),
                    row.score
                );
            }
            out
        }
    }
}

pub fn mirrored_scorecard(sc: Option<&MirroredScorecard>) -> String {
    let Some(sc) = sc else {
        return "Scorecard NOT FOUND in ClickHouse".to_string();
    };
    let mut out = String::from("\nScorecard:\n");
    putln!(out, "  Scorecard ID:  {}", sc.scorecard_id);
    putln!(out, "  Customer:      {}", sc.customer);
    putln!(out, "  Profile:       {}", sc.profile);
    putln!(
        out,
        "  Template:      {} (rev {})",
        sc.template_id, sc.template_rev
    );
    putln!(out, "  Agent User ID: {}", sc.agent_user_id);
    putln!(out, "  Creator ID:    {}", sc.creator_user_id);
    putln!(
        out,
        "  Create Time:   {}",
        format_mirror_time(sc.created_at.as_ref())
    );
    putln!(
        out,
        "  Last Update:   {}",
        format_mirror_time(sc.updated_at.as_ref())
    );
    putln!(
        out,
        "  Submit Time:   {}",
        format_mirror_time(sc.submit_time.as_ref())
    );
    putln!(out, "  Submitter ID:  {}", sc.submitter_user_id);
    putln!(out, "  Score:         {:.2}", sc.score);
    put!(
        out,
        "  Update Time:   {}",
        format_time(&sc.mirror_update_time)
    );
    out
}

pub fn raw_scores(rows: &Result<Vec<MirroredScore>, String>) -> String {
    match rows {
        Err(err) => format!("Error querying ClickHouse scores (raw): {err}"),
        Ok(rows) if rows.is_empty() => "No raw score rows found".to_string(),
        Ok(rows) => {
            let mut out = format!("\nFound {} raw score row(s):", rows.len());
            for (i, row) in rows.iter().enumerate() {
                put!(
                    out,
                    "\n  Row {}: criterion={}, submit_time={}, update_time={}",
                    i + 1,
                    row.criterion_id,
                    format_mirror_time(row.submit_time.as_ref()),
                    format_time(&row.mirror_update_time)
                );
            }
            out
        }
    }
}

pub fn mirrored_scores(scores: &[MirroredScore], names: &CriterionNameMap) -> String {
    if scores.is_empty() {
        return "No scores found in ClickHouse".to_string();
    }
    let mut out = format!("\nScores ({}):", scores.len());
    for s in scores {
        put!(
            out,
            "\n  - {}: {}\n    id: {}\n    numeric={:.2}, ai={:.2}",
            s.criterion_id,
            names.display_name(&s.criterion_id),
            s.score_id,
            s.numeric,
            s.ai_value
        );
        if !s.text.is_empty() {
            put!(out, ", text={:?}", s.text);
        }
        put!(
            out,
            ", na={}, ai_scored={}\n    submit_time={}, update_time={}",
            s.not_applicable,
            s.ai_scored,
            format_mirror_time(s.submit_time.as_ref()),
            format_time(&s.mirror_update_time)
        );
    }
    out
}

/// Findings one per line, followed by the boxed summary line.
pub fn findings(findings: &[Finding]) -> String {
    let mut out = String::new();
    for f in findings {
        putln!(out, "{f}");
    }
    let rule = rule();
    put!(out, "\n{rule}\n{}\n{rule}", summary_line(findings));
    out
}

/// Every data section of a reconciliation, in fetch order, ending with the
/// validation results.
pub fn sync_report(snapshot: &SyncSnapshot, found: &[Finding]) -> String {
    let mut out = String::new();

    putln!(out, "{}", section("POSTGRESQL DATA"));
    match &snapshot.scorecard {
        None => putln!(out, "Scorecard NOT FOUND in PostgreSQL"),
        Some(sc) => {
            putln!(out, "{}", authoritative_scorecard(sc));
            if let Some(warning) = &snapshot.names_warning {
                putln!(out, "Warning: could not fetch criterion names: {warning}");
            }
            putln!(
                out,
                "{}",
                authoritative_scores(&snapshot.scores, &snapshot.names)
            );
        }
    }

    putln!(
        out,
        "{}",
        section("CLICKHOUSE DATA (scorecard table - RAW, all versions)")
    );
    putln!(out, "{}", raw_scorecards(&snapshot.raw_scorecards));

    putln!(out, "{}", section("CLICKHOUSE DATA (scorecard table - FINAL)"));
    putln!(out, "{}", mirrored_scorecard(snapshot.mirrored.as_ref()));

    putln!(
        out,
        "{}",
        section("CLICKHOUSE DATA (score table - RAW, all versions)")
    );
    putln!(out, "{}", raw_scores(&snapshot.raw_scores));

    putln!(out, "{}", section("CLICKHOUSE DATA (score table - FINAL)"));
    putln!(
        out,
        "{}",
        mirrored_scores(&snapshot.mirrored_scores, &snapshot.names)
    );

    putln!(out, "{}", section("VALIDATION RESULTS"));
    putln!(out);
    out.push_str(&findings(found));
    out
}
