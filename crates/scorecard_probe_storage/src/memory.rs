#![forbid(unsafe_code)]

//! In-memory stand-ins for both gateways. The columnar one keeps every
//! appended version and derives merged views the way a replacing table does:
//! per key, the version with the greatest mirror update time wins, later
//! appends breaking ties.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use scorecard_probe_contracts::{
    AuthoritativeScore, AuthoritativeScorecard, Deadline, MirroredScore, MirroredScorecard,
};

use crate::{ColStoreRepo, RelStoreRepo, StoreError};

type ScorecardKey = (String, String, String);
type TemplateKey = (String, String, String, String);

#[derive(Debug, Default)]
struct RelState {
    scorecards: BTreeMap<ScorecardKey, AuthoritativeScorecard>,
    scores: BTreeMap<(String, String), AuthoritativeScore>,
    templates: BTreeMap<TemplateKey, String>,
    unavailable: bool,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryRelStore {
    state: Mutex<RelState>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unavailable(backend: &'static str) -> StoreError {
    StoreError::Unavailable {
        backend,
        cause: "connection refused".to_string(),
    }
}

impl InMemoryRelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.state).unavailable = unavailable;
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn upsert_scorecard(&self, scorecard: AuthoritativeScorecard) {
        let key = (
            scorecard.customer.clone(),
            scorecard.profile.clone(),
            scorecard.scorecard_id.clone(),
        );
        lock(&self.state).scorecards.insert(key, scorecard);
    }

    /// `(scorecard_id, criterion_id)` is the row key; a second write replaces.
    pub fn upsert_score(&self, score: AuthoritativeScore) {
        let key = (score.scorecard_id.clone(), score.criterion_id.clone());
        lock(&self.state).scores.insert(key, score);
    }

    pub fn put_template(
        &self,
        customer: &str,
        profile: &str,
        template_id: &str,
        rev: &str,
        payload: impl Into<String>,
    ) {
        let key = (
            customer.to_string(),
            profile.to_string(),
            template_id.to_string(),
            rev.to_string(),
        );
        lock(&self.state).templates.insert(key, payload.into());
    }

    pub fn scorecard(
        &self,
        customer: &str,
        profile: &str,
        scorecard_id: &str,
    ) -> Option<AuthoritativeScorecard> {
        let key = (
            customer.to_string(),
            profile.to_string(),
            scorecard_id.to_string(),
        );
        lock(&self.state).scorecards.get(&key).cloned()
    }

    pub fn remove_scorecard(&self, customer: &str, profile: &str, scorecard_id: &str) {
        let mut state = lock(&self.state);
        let key = (
            customer.to_string(),
            profile.to_string(),
            scorecard_id.to_string(),
        );
        state.scorecards.remove(&key);
        state.scores.retain(|(sc, _), _| sc != scorecard_id);
    }
}

#[async_trait]
impl RelStoreRepo for InMemoryRelStore {
    async fn ping(&self, _deadline: Deadline) -> Result<(), StoreError> {
        if lock(&self.state).unavailable {
            return Err(unavailable("postgres"));
        }
        Ok(())
    }

    async fn read_scorecard(
        &self,
        _deadline: Deadline,
        customer: &str,
        profile: &str,
        scorecard_id: &str,
    ) -> Result<Option<AuthoritativeScorecard>, StoreError> {
        if lock(&self.state).unavailable {
            return Err(unavailable("postgres"));
        }
        Ok(self.scorecard(customer, profile, scorecard_id))
    }

    async fn read_scores(
        &self,
        _deadline: Deadline,
        scorecard_id: &str,
    ) -> Result<Vec<AuthoritativeScore>, StoreError> {
        let state = lock(&self.state);
        if state.unavailable {
            return Err(unavailable("postgres"));
        }
        Ok(state
            .scores
            .iter()
            .filter(|((sc, _), _)| sc == scorecard_id)
            .map(|(_, score)| score.clone())
            .collect())
    }

    async fn read_template_document(
        &self,
        _deadline: Deadline,
        customer: &str,
        profile: &str,
        template_id: &str,
        rev: &str,
    ) -> Result<String, StoreError> {
        let state = lock(&self.state);
        if state.unavailable {
            return Err(unavailable("postgres"));
        }
        let key = (
            customer.to_string(),
            profile.to_string(),
            template_id.to_string(),
            rev.to_string(),
        );
        state
            .templates
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                what: format!("template {template_id}@{rev}"),
            })
    }

    async fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        state.unavailable = true;
    }
}

#[derive(Debug, Default)]
struct ColState {
    scorecards: Vec<MirroredScorecard>,
    scores: Vec<MirroredScore>,
    unavailable: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryColStore {
    state: Mutex<ColState>,
}

impl InMemoryColStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.state).unavailable = unavailable;
    }

    pub fn append_scorecard_version(&self, row: MirroredScorecard) {
        lock(&self.state).scorecards.push(row);
    }

    pub fn append_score_version(&self, row: MirroredScore) {
        lock(&self.state).scores.push(row);
    }

    fn check(&self) -> Result<MutexGuard<'_, ColState>, StoreError> {
        let state = lock(&self.state);
        if state.unavailable {
            return Err(unavailable("clickhouse"));
        }
        Ok(state)
    }
}

fn scorecard_matches(row: &MirroredScorecard, customer: &str, profile: &str, id: &str) -> bool {
    row.customer == customer && row.profile == profile && row.scorecard_id == id
}

/// Score rows carry no customer/profile columns of their own; the scorecard id
/// is unique across a columnar database.
fn score_matches(row: &MirroredScore, id: &str) -> bool {
    row.scorecard_id == id
}

#[async_trait]
impl ColStoreRepo for InMemoryColStore {
    async fn ping(&self, _deadline: Deadline) -> Result<(), StoreError> {
        self.check().map(|_| ())
    }

    async fn read_scorecards_raw(
        &self,
        _deadline: Deadline,
        customer: &str,
        profile: &str,
        scorecard_id: &str,
    ) -> Result<Vec<MirroredScorecard>, StoreError> {
        let state = self.check()?;
        let mut rows: Vec<MirroredScorecard> = state
            .scorecards
            .iter()
            .filter(|r| scorecard_matches(r, customer, profile, scorecard_id))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.mirror_update_time);
        Ok(rows)
    }

    async fn read_scorecard_merged(
        &self,
        _deadline: Deadline,
        customer: &str,
        profile: &str,
        scorecard_id: &str,
    ) -> Result<Option<MirroredScorecard>, StoreError> {
        let state = self.check()?;
        let mut latest: Option<&MirroredScorecard> = None;
        for row in state
            .scorecards
            .iter()
            .filter(|r| scorecard_matches(r, customer, profile, scorecard_id))
        {
            if latest.map_or(true, |l| row.mirror_update_time >= l.mirror_update_time) {
                latest = Some(row);
            }
        }
        Ok(latest.cloned())
    }

    async fn read_scores_raw(
        &self,
        _deadline: Deadline,
        _customer: &str,
        _profile: &str,
        scorecard_id: &str,
    ) -> Result<Vec<MirroredScore>, StoreError> {
        let state = self.check()?;
        let mut rows: Vec<MirroredScore> = state
            .scores
            .iter()
            .filter(|r| score_matches(r, scorecard_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (a.criterion_id.as_str(), a.mirror_update_time)
                .cmp(&(b.criterion_id.as_str(), b.mirror_update_time))
        });
        Ok(rows)
    }

    async fn read_scores_merged(
        &self,
        _deadline: Deadline,
        _customer: &str,
        _profile: &str,
        scorecard_id: &str,
    ) -> Result<Vec<MirroredScore>, StoreError> {
        let state = self.check()?;
        let mut latest: BTreeMap<&str, &MirroredScore> = BTreeMap::new();
        for row in state.scores.iter().filter(|r| score_matches(r, scorecard_id)) {
            let replace = latest
                .get(row.criterion_id.as_str())
                .map_or(true, |l| row.mirror_update_time >= l.mirror_update_time);
            if replace {
                latest.insert(row.criterion_id.as_str(), row);
            }
        }
        Ok(latest.into_values().cloned().collect())
    }
}
