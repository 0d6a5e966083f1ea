#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
    #[error("invalid {field}: expected '{expected}', got '{got}'")]
    InvalidShape {
        field: &'static str,
        expected: &'static str,
        got: String,
    },
}

pub trait Validate {
    fn validate(&self) -> Result<(), ContractViolation>;
}

/// Process-level failure taxonomy shared by the harness and the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("config error: {0}")]
    Config(String),
    #[error("auth error: {0}")]
    Auth(String),
    #[error("{backend} unavailable: {cause}")]
    GatewayUnavailable {
        backend: &'static str,
        cause: String,
    },
    #[error("{op} failed: {cause}")]
    RemoteFailure { op: &'static str, cause: String },
    #[error("{what} not found")]
    DataMissing { what: String },
    #[error("invalid {field}: unset sentinel")]
    SentinelTimestamp { field: &'static str },
    #[error("interrupted")]
    Interrupted,
}

impl From<ContractViolation> for ProbeError {
    fn from(v: ContractViolation) -> Self {
        ProbeError::Config(v.to_string())
    }
}

/// Absolute point in time after which in-flight remote work is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

pub(crate) fn validate_segment(field: &'static str, value: &str) -> Result<(), ContractViolation> {
    if value.is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not be empty",
        });
    }
    if value.contains('/') {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not contain '/'",
        });
    }
    Ok(())
}
