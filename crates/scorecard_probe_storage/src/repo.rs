#![forbid(unsafe_code)]

use async_trait::async_trait;
use scorecard_probe_contracts::{
    AuthoritativeScore, AuthoritativeScorecard, Deadline, MirroredScore, MirroredScorecard,
};

use crate::StoreError;

/// Typed read interface over the authoritative row store.
/// Each call is snapshot-consistent on its own; nothing is assumed across calls.
#[async_trait]
pub trait RelStoreRepo: Send + Sync {
    async fn ping(&self, deadline: Deadline) -> Result<(), StoreError>;

    async fn read_scorecard(
        &self,
        deadline: Deadline,
        customer: &str,
        profile: &str,
        scorecard_id: &str,
    ) -> Result<Option<AuthoritativeScorecard>, StoreError>;

    /// Child scores ordered by criterion id ascending.
    async fn read_scores(
        &self,
        deadline: Deadline,
        scorecard_id: &str,
    ) -> Result<Vec<AuthoritativeScore>, StoreError>;

    /// Serialized template payload for `(customer, profile, template_id, rev)`.
    async fn read_template_document(
        &self,
        deadline: Deadline,
        customer: &str,
        profile: &str,
        template_id: &str,
        rev: &str,
    ) -> Result<String, StoreError>;

    /// Releases pooled connections. Reads after this fail.
    async fn close(&self) {}
}

/// Read interface over the versioned columnar mirror.
/// Raw reads return every stored version; merged reads return latest-wins per key.
#[async_trait]
pub trait ColStoreRepo: Send + Sync {
    async fn ping(&self, deadline: Deadline) -> Result<(), StoreError>;

    /// All versions, ordered by mirror update time ascending.
    async fn read_scorecards_raw(
        &self,
        deadline: Deadline,
        customer: &str,
        profile: &str,
        scorecard_id: &str,
    ) -> Result<Vec<MirroredScorecard>, StoreError>;

    async fn read_scorecard_merged(
        &self,
        deadline: Deadline,
        customer: &str,
        profile: &str,
        scorecard_id: &str,
    ) -> Result<Option<MirroredScorecard>, StoreError>;

    /// All versions, ordered by `(criterion_id, mirror update time)` ascending.
    async fn read_scores_raw(
        &self,
        deadline: Deadline,
        customer: &str,
        profile: &str,
        scorecard_id: &str,
    ) -> Result<Vec<MirroredScore>, StoreError>;

    /// One merged row per criterion, ordered by criterion id.
    async fn read_scores_merged(
        &self,
        deadline: Deadline,
        customer: &str,
        profile: &str,
        scorecard_id: &str,
    ) -> Result<Vec<MirroredScore>, StoreError>;
}
