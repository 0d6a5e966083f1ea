#![forbid(unsafe_code)]

//! Authoritative store gateway over PostgreSQL.
//!
//! Queries are runtime-checked (`sqlx::query_as`, not the `query!` macros) so
//! the crate builds without a live database. All reads target the `director`
//! schema and are read-only.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scorecard_probe_contracts::{AuthoritativeScore, AuthoritativeScorecard, Deadline};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::{with_deadline, RelStoreRepo, StoreError};

const BACKEND: &str = "postgres";

const SELECT_SCORECARD: &str = r#"
    SELECT resource_id, customer, profile,
           created_at::timestamptz AS created_at,
           updated_at::timestamptz AS updated_at,
           submitted_at::timestamptz AS submitted_at,
           score::float8 AS score,
           template_id, template_revision, agent_user_id,
           creator_user_id, submitter_user_id
    FROM director.scorecards
    WHERE customer = $1 AND profile = $2 AND resource_id = $3
"#;

const SELECT_SCORES: &str = r#"
    SELECT resource_id, scorecard_id, criterion_identifier,
           numeric_value::float8 AS numeric_value,
           ai_value::float8 AS ai_value,
           text_value, not_applicable, ai_scored
    FROM director.scores
    WHERE scorecard_id = $1
    ORDER BY criterion_identifier
"#;

const SELECT_TEMPLATE: &str = r#"
    SELECT template::text AS template
    FROM director.scorecard_template_revisions
    WHERE customer = $1 AND profile = $2 AND template_id = $3 AND resource_id = $4
"#;

#[derive(Debug, Clone)]
pub struct PgRelStoreConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PgRelStoreConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PgScorecardRow {
    resource_id: String,
    customer: String,
    profile: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    score: Option<f64>,
    template_id: String,
    template_revision: String,
    agent_user_id: String,
    creator_user_id: Option<String>,
    submitter_user_id: Option<String>,
}

impl From<PgScorecardRow> for AuthoritativeScorecard {
    fn from(row: PgScorecardRow) -> Self {
        AuthoritativeScorecard {
            scorecard_id: row.resource_id,
            customer: row.customer,
            profile: row.profile,
            created_at: row.created_at,
            updated_at: row.updated_at,
            submitted_at: row.submitted_at,
            score: row.score,
            template_id: row.template_id,
            template_rev: row.template_revision,
            agent_user_id: row.agent_user_id,
            creator_user_id: row.creator_user_id,
            submitter_user_id: row.submitter_user_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PgScoreRow {
    resource_id: String,
    scorecard_id: String,
    criterion_identifier: String,
    numeric_value: Option<f64>,
    ai_value: Option<f64>,
    text_value: Option<String>,
    not_applicable: bool,
    ai_scored: bool,
}

impl From<PgScoreRow> for AuthoritativeScore {
    fn from(row: PgScoreRow) -> Self {
        AuthoritativeScore {
            score_id: row.resource_id,
            scorecard_id: row.scorecard_id,
            criterion_id: row.criterion_identifier,
            numeric: row.numeric_value,
            ai_value: row.ai_value,
            text: row.text_value,
            not_applicable: row.not_applicable,
            ai_scored: row.ai_scored,
        }
    }
}

/// Pooled PostgreSQL gateway. Connections return to the pool on every exit
/// path; [`PgRelStore::close`] drains the pool.
#[derive(Clone)]
pub struct PgRelStore {
    pool: PgPool,
}

impl PgRelStore {
    pub async fn connect(conn_str: &str, config: &PgRelStoreConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(conn_str)
            .await
            .map_err(|e| StoreError::Unavailable {
                backend: BACKEND,
                cause: e.to_string(),
            })?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn query_err(query: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| match e {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) | sqlx::Error::Decode(_) => {
            StoreError::Decode {
                backend: BACKEND,
                query,
                cause: e.to_string(),
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable {
                backend: BACKEND,
                cause: e.to_string(),
            }
        }
        other => StoreError::Query {
            backend: BACKEND,
            query,
            cause: other.to_string(),
        },
    }
}

#[async_trait]
impl RelStoreRepo for PgRelStore {
    async fn ping(&self, deadline: Deadline) -> Result<(), StoreError> {
        with_deadline(deadline, BACKEND, "ping", async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(|e| {
                    tracing::debug!(error = %e, "postgres ping failed");
                    StoreError::Unavailable {
                        backend: BACKEND,
                        cause: e.to_string(),
                    }
                })
        })
        .await
    }

    async fn read_scorecard(
        &self,
        deadline: Deadline,
        customer: &str,
        profile: &str,
        scorecard_id: &str,
    ) -> Result<Option<AuthoritativeScorecard>, StoreError> {
        with_deadline(deadline, BACKEND, "read_scorecard", async {
            let row = sqlx::query_as::<_, PgScorecardRow>(SELECT_SCORECARD)
                .bind(customer)
                .bind(profile)
                .bind(scorecard_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(query_err("read_scorecard"))?;
            Ok(row.map(AuthoritativeScorecard::from))
        })
        .await
    }

    async fn read_scores(
        &self,
        deadline: Deadline,
        scorecard_id: &str,
    ) -> Result<Vec<AuthoritativeScore>, StoreError> {
        with_deadline(deadline, BACKEND, "read_scores", async {
            let rows = sqlx::query_as::<_, PgScoreRow>(SELECT_SCORES)
                .bind(scorecard_id)
                .fetch_all(&self.pool)
                .await
                .map_err(query_err("read_scores"))?;
            Ok(rows.into_iter().map(AuthoritativeScore::from).collect())
        })
        .await
    }

    async fn read_template_document(
        &self,
        deadline: Deadline,
        customer: &str,
        profile: &str,
        template_id: &str,
        rev: &str,
    ) -> Result<String, StoreError> {
        with_deadline(deadline, BACKEND, "read_template_document", async {
            let payload = sqlx::query_scalar::<_, String>(SELECT_TEMPLATE)
                .bind(customer)
                .bind(profile)
                .bind(template_id)
                .bind(rev)
                .fetch_optional(&self.pool)
                .await
                .map_err(query_err("read_template_document"))?;
            payload.ok_or_else(|| StoreError::NotFound {
                what: format!("template {template_id}@{rev}"),
            })
        })
        .await
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Masks the password in a connection string before it is echoed.
/// Handles both `key=value` and URL userinfo forms.
pub fn mask_password(conn_str: &str) -> String {
    if let Some(idx) = conn_str.find("password=") {
        let rest = &conn_str[idx..];
        return match rest.find(' ') {
            Some(end) => format!("{}password=***{}", &conn_str[..idx], &rest[end..]),
            None => format!("{}password=***", &conn_str[..idx]),
        };
    }
    if let Some(scheme_end) = conn_str.find("://") {
        let after_scheme = scheme_end + 3;
        let authority_end = conn_str[after_scheme..]
            .find('/')
            .map(|i| after_scheme + i)
            .unwrap_or(conn_str.len());
        if let Some(at) = conn_str[after_scheme..authority_end].rfind('@') {
            let at = after_scheme + at;
            if let Some(colon) = conn_str[after_scheme..at].find(':') {
                let colon = after_scheme + colon;
                return format!("{}:***{}", &conn_str[..colon], &conn_str[at..]);
            }
        }
    }
    conn_str.to_string()
}
