#![forbid(unsafe_code)]

pub mod cli;
pub mod credentials;
pub mod logging;
pub mod report;
pub mod sync_session;
