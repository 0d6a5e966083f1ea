#![forbid(unsafe_code)]

pub mod common;
pub mod finding;
pub mod iteration;
pub mod mirror;
pub mod scorecard;

pub use common::{ContractViolation, Deadline, ProbeError, Validate};
pub use finding::{Finding, FindingRule, Severity};
pub use iteration::{FailedIteration, IterationLatency, IterationResult, RunSummary};
pub use mirror::{columnar_database_name, mirror_time_from_raw, MirroredScore, MirroredScorecard};
pub use scorecard::{
    profile_parent, AuthoritativeScore, AuthoritativeScorecard, CriterionNameMap, ScorecardRef,
};
