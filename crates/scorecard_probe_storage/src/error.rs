#![forbid(unsafe_code)]

use std::future::Future;

use scorecard_probe_contracts::{Deadline, ProbeError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{backend} unavailable: {cause}")]
    Unavailable {
        backend: &'static str,
        cause: String,
    },
    #[error("{backend} query {query} failed: {cause}")]
    Query {
        backend: &'static str,
        query: &'static str,
        cause: String,
    },
    #[error("{backend} row decode failed in {query}: {cause}")]
    Decode {
        backend: &'static str,
        query: &'static str,
        cause: String,
    },
    #[error("{what} not found")]
    NotFound { what: String },
    #[error("{backend} query {query} exceeded deadline")]
    DeadlineExceeded {
        backend: &'static str,
        query: &'static str,
    },
}

impl StoreError {
    pub fn backend(&self) -> Option<&'static str> {
        match self {
            StoreError::Unavailable { backend, .. }
            | StoreError::Query { backend, .. }
            | StoreError::Decode { backend, .. }
            | StoreError::DeadlineExceeded { backend, .. } => Some(backend),
            StoreError::NotFound { .. } => None,
        }
    }
}

impl From<StoreError> for ProbeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { backend, cause } => {
                ProbeError::GatewayUnavailable { backend, cause }
            }
            StoreError::NotFound { what } => ProbeError::DataMissing { what },
            other => ProbeError::RemoteFailure {
                op: other.backend().unwrap_or("store"),
                cause: other.to_string(),
            },
        }
    }
}

/// Runs `fut` until it completes or `deadline` passes.
pub async fn with_deadline<T, F>(
    deadline: Deadline,
    backend: &'static str,
    query: &'static str,
    fut: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    let at = tokio::time::Instant::from_std(deadline.instant());
    match tokio::time::timeout_at(at, fut).await {
        Ok(out) => out,
        Err(_) => Err(StoreError::DeadlineExceeded { backend, query }),
    }
}
