#![forbid(unsafe_code)]

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "info,h2=warn,hyper=warn,sqlx=warn";

/// Installs the global subscriber. Events go to stderr so stdout carries only
/// the report. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let ansi = std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();
}
