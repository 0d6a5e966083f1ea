#![forbid(unsafe_code)]

//! Columnar mirror gateway over the ClickHouse HTTP interface.
//!
//! Every query is parameterised server-side (`{name:Type}` placeholders bound
//! through `param_<name>` URL arguments) and answered as `JSONEachRow`. Raw
//! reads hit the versioned tables directly; merged reads go through `FINAL`.
//! Timestamps at or before 1970 are translated to `None` here, so nothing
//! upstream ever sees the sentinel.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, Utc};
use scorecard_probe_contracts::{
    mirror_time_from_raw, Deadline, MirroredScore, MirroredScorecard, ProbeError,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::{with_deadline, ColStoreRepo, StoreError};

const BACKEND: &str = "clickhouse";

pub const CH_HOST_DEFAULT: &str = "clickhouse-conversations.chat-staging.internal.cresta.ai";
pub const CH_PORT_DEFAULT: u16 = 8443;
const CH_REQUEST_TIMEOUT_MS_DEFAULT: u64 = 15_000;

const SCORECARD_COLUMNS: &str = "scorecard_id, customer_id, profile_id, \
     scorecard_create_time, scorecard_last_update_time, scorecard_submit_time, \
     score, scorecard_template_id, scorecard_template_revision, \
     agent_user_id, creator_user_id, submitter_user_id, update_time";

const SCORE_COLUMNS: &str = "score_id, scorecard_id, criterion_id, \
     numeric_value, ai_value, text_value, not_applicable, ai_scored, \
     scorecard_submit_time, update_time";

const KEY_FILTER: &str = "customer_id = {customer:String} \
     AND profile_id = {profile:String} \
     AND scorecard_id = {scorecard_id:String}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChHttpConfig {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub user: String,
    pub password: String,
    pub database: String,
    pub request_timeout: Duration,
}

impl ChHttpConfig {
    /// Reads `CH_USER`/`CH_PASS` (required) and `CH_HOST`/`CH_PORT`/`CH_SECURE`.
    pub fn from_env(database: &str) -> Result<Self, ProbeError> {
        Self::from_lookup(database, |key| env::var(key).ok())
    }

    pub fn from_lookup(
        database: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ProbeError> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ProbeError::Config(format!("{key} environment variable is required")))
        };
        let user = required("CH_USER")?;
        let password = required("CH_PASS")?;
        let host = lookup("CH_HOST")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| CH_HOST_DEFAULT.to_string());
        let port = match lookup("CH_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ProbeError::Config(format!("CH_PORT is not a port: {raw}")))?,
            None => CH_PORT_DEFAULT,
        };
        let secure = lookup("CH_SECURE")
            .map(|v| {
                !matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "0" | "false" | "off" | "no"
                )
            })
            .unwrap_or(true);
        Ok(Self {
            host,
            port,
            secure,
            user,
            password,
            database: database.to_string(),
            request_timeout: Duration::from_millis(CH_REQUEST_TIMEOUT_MS_DEFAULT),
        })
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}:{}/", self.host, self.port)
    }
}

/// Reusable HTTP gateway bound to one columnar database.
#[derive(Clone)]
pub struct ChHttpColStore {
    agent: ureq::Agent,
    base_url: String,
    authorization: String,
    database: String,
}

impl ChHttpColStore {
    pub fn new(config: &ChHttpConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.request_timeout)
            .timeout_read(config.request_timeout)
            .timeout_write(config.request_timeout)
            .try_proxy_from_env(false)
            .build();
        let credentials = BASE64.encode(format!("{}:{}", config.user, config.password));
        Self {
            agent,
            base_url: config.base_url(),
            authorization: format!("Basic {credentials}"),
            database: config.database.clone(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    async fn select<T>(
        &self,
        deadline: Deadline,
        query: &'static str,
        sql: String,
        key: Option<(&str, &str, &str)>,
    ) -> Result<Vec<T>, StoreError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let mut params: Vec<(String, String)> = vec![
            ("database".to_string(), self.database.clone()),
            ("default_format".to_string(), "JSONEachRow".to_string()),
            ("date_time_output_format".to_string(), "iso".to_string()),
        ];
        if let Some((customer, profile, scorecard_id)) = key {
            params.push(("param_customer".to_string(), customer.to_string()));
            params.push(("param_profile".to_string(), profile.to_string()));
            params.push(("param_scorecard_id".to_string(), scorecard_id.to_string()));
        }
        let agent = self.agent.clone();
        let url = self.base_url.clone();
        let authorization = self.authorization.clone();
        with_deadline(deadline, BACKEND, query, async move {
            let body = tokio::task::spawn_blocking(move || {
                post_query(&agent, &url, &authorization, &params, &sql, query)
            })
            .await
            .map_err(|e| StoreError::Query {
                backend: BACKEND,
                query,
                cause: format!("worker join failed: {e}"),
            })??;
            decode_rows(&body, query)
        })
        .await
    }
}

fn post_query(
    agent: &ureq::Agent,
    url: &str,
    authorization: &str,
    params: &[(String, String)],
    sql: &str,
    query: &'static str,
) -> Result<String, StoreError> {
    let mut req = agent
        .post(url)
        .set("authorization", authorization)
        .set("content-type", "text/plain; charset=utf-8");
    for (name, value) in params {
        req = req.query(name, value);
    }
    match req.send_string(sql) {
        Ok(resp) => resp.into_string().map_err(|e| StoreError::Query {
            backend: BACKEND,
            query,
            cause: format!("response read failed: {e}"),
        }),
        Err(ureq::Error::Status(code, resp)) => {
            let detail = resp.into_string().unwrap_or_default();
            let detail = detail.lines().next().unwrap_or("").trim().to_string();
            if matches!(code, 401 | 403 | 516) {
                Err(StoreError::Unavailable {
                    backend: BACKEND,
                    cause: format!("http status {code}: {detail}"),
                })
            } else {
                Err(StoreError::Query {
                    backend: BACKEND,
                    query,
                    cause: format!("http status {code}: {detail}"),
                })
            }
        }
        Err(ureq::Error::Transport(transport)) => Err(StoreError::Unavailable {
            backend: BACKEND,
            cause: format!("transport error: {transport}"),
        }),
    }
}

fn decode_rows<T: DeserializeOwned>(body: &str, query: &'static str) -> Result<Vec<T>, StoreError> {
    body.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<T>(line).map_err(|e| {
                tracing::debug!(query, line = n + 1, error = %e, "undecodable JSONEachRow row");
                StoreError::Decode {
                    backend: BACKEND,
                    query,
                    cause: format!("line {}: {e}", n + 1),
                }
            })
        })
        .collect()
}

/// Accepts `iso` output (`2026-01-15T10:00:00Z`, optional fraction) and the
/// default `simple` output (`2026-01-15 10:00:00`), both read as UTC.
pub fn parse_ch_time(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|t| t.and_utc())
        .map_err(|e| format!("unparseable timestamp {raw:?}: {e}"))
}

fn de_time<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    parse_ch_time(&raw).map_err(serde::de::Error::custom)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlagRepr {
    Bool(bool),
    Int(i64),
    Text(String),
}

/// `Bool` columns arrive as `true`/`false`, `UInt8` columns as `0`/`1`.
fn de_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    match FlagRepr::deserialize(d)? {
        FlagRepr::Bool(b) => Ok(b),
        FlagRepr::Int(i) => Ok(i != 0),
        FlagRepr::Text(s) => match s.as_str() {
            "1" | "true" => Ok(true),
            "0" | "false" => Ok(false),
            other => Err(serde::de::Error::custom(format!("not a flag: {other}"))),
        },
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberRepr {
    Num(f64),
    Text(String),
    Null(()),
}

/// Float and Decimal columns; Decimals may arrive quoted, NULL reads as 0.
fn de_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    match NumberRepr::deserialize(d)? {
        NumberRepr::Num(v) => Ok(v),
        NumberRepr::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("not a number: {s}"))),
        NumberRepr::Null(()) => Ok(0.0),
    }
}

fn de_text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct ChScorecardRow {
    scorecard_id: String,
    customer_id: String,
    profile_id: String,
    #[serde(deserialize_with = "de_time")]
    scorecard_create_time: DateTime<Utc>,
    #[serde(deserialize_with = "de_time")]
    scorecard_last_update_time: DateTime<Utc>,
    #[serde(deserialize_with = "de_time")]
    scorecard_submit_time: DateTime<Utc>,
    #[serde(deserialize_with = "de_f64")]
    score: f64,
    #[serde(deserialize_with = "de_text", default)]
    scorecard_template_id: String,
    #[serde(deserialize_with = "de_text", default)]
    scorecard_template_revision: String,
    #[serde(deserialize_with = "de_text", default)]
    agent_user_id: String,
    #[serde(deserialize_with = "de_text", default)]
    creator_user_id: String,
    #[serde(deserialize_with = "de_text", default)]
    submitter_user_id: String,
    #[serde(deserialize_with = "de_time")]
    update_time: DateTime<Utc>,
}

impl From<ChScorecardRow> for MirroredScorecard {
    fn from(row: ChScorecardRow) -> Self {
        MirroredScorecard {
            scorecard_id: row.scorecard_id,
            customer: row.customer_id,
            profile: row.profile_id,
            created_at: mirror_time_from_raw(row.scorecard_create_time),
            updated_at: mirror_time_from_raw(row.scorecard_last_update_time),
            submit_time: mirror_time_from_raw(row.scorecard_submit_time),
            score: row.score,
            template_id: row.scorecard_template_id,
            template_rev: row.scorecard_template_revision,
            agent_user_id: row.agent_user_id,
            creator_user_id: row.creator_user_id,
            submitter_user_id: row.submitter_user_id,
            mirror_update_time: row.update_time,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChScoreRow {
    score_id: String,
    scorecard_id: String,
    criterion_id: String,
    #[serde(deserialize_with = "de_f64")]
    numeric_value: f64,
    #[serde(deserialize_with = "de_f64")]
    ai_value: f64,
    #[serde(deserialize_with = "de_text", default)]
    text_value: String,
    #[serde(deserialize_with = "de_flag")]
    not_applicable: bool,
    #[serde(deserialize_with = "de_flag")]
    ai_scored: bool,
    #[serde(deserialize_with = "de_time")]
    scorecard_submit_time: DateTime<Utc>,
    #[serde(deserialize_with = "de_time")]
    update_time: DateTime<Utc>,
}

impl From<ChScoreRow> for MirroredScore {
    fn from(row: ChScoreRow) -> Self {
        MirroredScore {
            score_id: row.score_id,
            scorecard_id: row.scorecard_id,
            criterion_id: row.criterion_id,
            numeric: row.numeric_value,
            ai_value: row.ai_value,
            text: row.text_value,
            not_applicable: row.not_applicable,
            ai_scored: row.ai_scored,
            submit_time: mirror_time_from_raw(row.scorecard_submit_time),
            mirror_update_time: row.update_time,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PingRow {
    #[serde(rename = "1")]
    _one: serde_json::Value,
}

#[async_trait]
impl ColStoreRepo for ChHttpColStore {
    async fn ping(&self, deadline: Deadline) -> Result<(), StoreError> {
        let rows: Vec<PingRow> = self
            .select(deadline, "ping", "SELECT 1".to_string(), None)
            .await
            .map_err(|e| {
                tracing::debug!(error = %e, "clickhouse ping failed");
                match e {
                    StoreError::Unavailable { .. } => e,
                    other => StoreError::Unavailable {
                        backend: BACKEND,
                        cause: other.to_string(),
                    },
                }
            })?;
        if rows.is_empty() {
            tracing::debug!("clickhouse ping returned no rows");
            return Err(StoreError::Unavailable {
                backend: BACKEND,
                cause: "ping returned no rows".to_string(),
            });
        }
        Ok(())
    }

    async fn read_scorecards_raw(
        &self,
        deadline: Deadline,
        customer: &str,
        profile: &str,
        scorecard_id: &str,
    ) -> Result<Vec<MirroredScorecard>, StoreError> {
        let sql = format!(
            "SELECT {SCORECARD_COLUMNS} FROM scorecard_d WHERE {KEY_FILTER} ORDER BY update_time"
        );
        let rows: Vec<ChScorecardRow> = self
            .select(
                deadline,
                "read_scorecards_raw",
                sql,
                Some((customer, profile, scorecard_id)),
            )
            .await?;
        Ok(rows.into_iter().map(MirroredScorecard::from).collect())
    }

    async fn read_scorecard_merged(
        &self,
        deadline: Deadline,
        customer: &str,
        profile: &str,
        scorecard_id: &str,
    ) -> Result<Option<MirroredScorecard>, StoreError> {
        let sql = format!(
            "SELECT {SCORECARD_COLUMNS} FROM scorecard_d FINAL WHERE {KEY_FILTER} \
             ORDER BY update_time DESC LIMIT 1"
        );
        let rows: Vec<ChScorecardRow> = self
            .select(
                deadline,
                "read_scorecard_merged",
                sql,
                Some((customer, profile, scorecard_id)),
            )
            .await?;
        Ok(rows.into_iter().next().map(MirroredScorecard::from))
    }

    async fn read_scores_raw(
        &self,
        deadline: Deadline,
        customer: &str,
        profile: &str,
        scorecard_id: &str,
    ) -> Result<Vec<MirroredScore>, StoreError> {
        let sql = format!(
            "SELECT {SCORE_COLUMNS} FROM score_d WHERE {KEY_FILTER} \
             ORDER BY criterion_id, update_time"
        );
        let rows: Vec<ChScoreRow> = self
            .select(
                deadline,
                "read_scores_raw",
                sql,
                Some((customer, profile, scorecard_id)),
            )
            .await?;
        Ok(rows.into_iter().map(MirroredScore::from).collect())
    }

    async fn read_scores_merged(
        &self,
        deadline: Deadline,
        customer: &str,
        profile: &str,
        scorecard_id: &str,
    ) -> Result<Vec<MirroredScore>, StoreError> {
        let sql = format!(
            "SELECT {SCORE_COLUMNS} FROM score_d FINAL WHERE {KEY_FILTER} ORDER BY criterion_id"
        );
        let rows: Vec<ChScoreRow> = self
            .select(
                deadline,
                "read_scores_merged",
                sql,
                Some((customer, profile, scorecard_id)),
            )
            .await?;
        Ok(rows.into_iter().map(MirroredScore::from).collect())
    }
}
