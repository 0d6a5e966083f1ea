#![forbid(unsafe_code)]

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Last year the columnar store uses to encode an unset timestamp.
pub const SENTINEL_MAX_YEAR: i32 = 1970;

/// Translates a raw columnar timestamp into an explicit optional.
/// Anything in or before 1970 is the store's "unset" encoding.
pub fn mirror_time_from_raw(raw: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if raw.year() <= SENTINEL_MAX_YEAR {
        None
    } else {
        Some(raw)
    }
}

/// Columnar database holding the mirror tables for a customer profile.
pub fn columnar_database_name(customer: &str, profile: &str) -> String {
    format!("{}_{}", customer.replace('-', "_"), profile.replace('-', "_"))
}

/// One version (raw read) or the merged-latest row of `scorecard_d`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirroredScorecard {
    pub scorecard_id: String,
    pub customer: String,
    pub profile: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub submit_time: Option<DateTime<Utc>>,
    pub score: f64,
    pub template_id: String,
    pub template_rev: String,
    pub agent_user_id: String,
    pub creator_user_id: String,
    pub submitter_user_id: String,
    pub mirror_update_time: DateTime<Utc>,
}

/// One version (raw read) or the merged-latest row of `score_d`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirroredScore {
    pub score_id: String,
    pub scorecard_id: String,
    pub criterion_id: String,
    pub numeric: f64,
    pub ai_value: f64,
    pub text: String,
    pub not_applicable: bool,
    pub ai_scored: bool,
    pub submit_time: Option<DateTime<Utc>>,
    pub mirror_update_time: DateTime<Utc>,
}
