#![forbid(unsafe_code)]

pub mod race;
pub mod reconcile;
pub mod scope;
pub mod template;

pub use race::{MirrorCheckFailure, RaceConfig, RaceFixture, RaceHarness, RaceRun};
pub use reconcile::{format_time, reconcile, summary_line, Reconciler, SyncSnapshot};
pub use scope::{cancel_pair, CancelToken, Canceller};
pub use template::{parse_criterion_names, ResolvedNames, TemplateParseError, TemplateResolver};
