#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::validate_segment;
use crate::{ContractViolation, Validate};

const NAME_SHAPE: &str = "customers/{customer}/profiles/{profile}/scorecards/{id}";
const UNKNOWN_CRITERION_NAME: &str = "(unknown)";

/// Canonical `customers/<c>/profiles/<p>/scorecards/<id>` resource name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScorecardRef {
    customer: String,
    profile: String,
    scorecard_id: String,
}

impl ScorecardRef {
    pub fn new(
        customer: impl Into<String>,
        profile: impl Into<String>,
        scorecard_id: impl Into<String>,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            customer: customer.into(),
            profile: profile.into(),
            scorecard_id: scorecard_id.into(),
        };
        r.validate()?;
        Ok(r)
    }

    /// Splits on `/` and checks the three literal segments. The variable
    /// segments are taken as given; only an empty one is rejected.
    pub fn parse(name: &str) -> Result<Self, ContractViolation> {
        let shape_err = || ContractViolation::InvalidShape {
            field: "scorecard_name",
            expected: NAME_SHAPE,
            got: name.to_string(),
        };
        let parts: Vec<&str> = name.split('/').collect();
        if parts.len() != 6 {
            return Err(shape_err());
        }
        if parts[0] != "customers" || parts[2] != "profiles" || parts[4] != "scorecards" {
            return Err(shape_err());
        }
        Self::new(parts[1], parts[3], parts[5])
    }

    pub fn customer(&self) -> &str {
        &self.customer
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn scorecard_id(&self) -> &str {
        &self.scorecard_id
    }

    pub fn parent(&self) -> String {
        profile_parent(&self.customer, &self.profile)
    }
}

pub fn profile_parent(customer: &str, profile: &str) -> String {
    format!("customers/{customer}/profiles/{profile}")
}

impl fmt::Display for ScorecardRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "customers/{}/profiles/{}/scorecards/{}",
            self.customer, self.profile, self.scorecard_id
        )
    }
}

impl Validate for ScorecardRef {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_segment("scorecard_name.customer", &self.customer)?;
        validate_segment("scorecard_name.profile", &self.profile)?;
        validate_segment("scorecard_name.scorecard_id", &self.scorecard_id)
    }
}

/// Row of the authoritative `scorecards` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthoritativeScorecard {
    pub scorecard_id: String,
    pub customer: String,
    pub profile: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub score: Option<f64>,
    pub template_id: String,
    pub template_rev: String,
    pub agent_user_id: String,
    pub creator_user_id: Option<String>,
    pub submitter_user_id: Option<String>,
}

impl AuthoritativeScorecard {
    pub fn is_submitted(&self) -> bool {
        self.submitted_at.is_some()
    }
}

impl Validate for AuthoritativeScorecard {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.scorecard_id.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "authoritative_scorecard.scorecard_id",
                reason: "must not be empty",
            });
        }
        if self.created_at > self.updated_at {
            return Err(ContractViolation::InvalidValue {
                field: "authoritative_scorecard.updated_at",
                reason: "must be >= created_at",
            });
        }
        Ok(())
    }
}

/// Row of the authoritative `scores` table; one per criterion per scorecard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthoritativeScore {
    pub score_id: String,
    pub scorecard_id: String,
    pub criterion_id: String,
    pub numeric: Option<f64>,
    pub ai_value: Option<f64>,
    pub text: Option<String>,
    pub not_applicable: bool,
    pub ai_scored: bool,
}

impl AuthoritativeScore {
    /// Authoritative NULL text compares as the empty string.
    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

/// Criterion id to template display name. Purely decorative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionNameMap(BTreeMap<String, String>);

impl CriterionNameMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, criterion_id: impl Into<String>, display_name: impl Into<String>) {
        self.0.insert(criterion_id.into(), display_name.into());
    }

    pub fn display_name(&self, criterion_id: &str) -> &str {
        match self.0.get(criterion_id) {
            Some(name) if !name.is_empty() => name,
            _ => UNKNOWN_CRITERION_NAME,
        }
    }

    /// `<id> (<display name>)`, as used in per-criterion findings.
    pub fn label(&self, criterion_id: &str) -> String {
        format!("{criterion_id} ({})", self.display_name(criterion_id))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for CriterionNameMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
