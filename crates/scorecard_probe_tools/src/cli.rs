#![forbid(unsafe_code)]

use std::time::Duration;

use clap::Parser;
use scorecard_probe_adapter::grpc::GRPC_HOST_DEFAULT;
use scorecard_probe_contracts::columnar_database_name;
use scorecard_probe_engines::race::staging;
use scorecard_probe_engines::{RaceConfig, RaceFixture};

pub const CLUSTER_DEFAULT: &str = "chat-staging";

/// Races Update against Submit on the coaching service and checks that the
/// columnar mirror ends up with a real submit time.
#[derive(Debug, Clone, Parser)]
#[command(name = "test_async_order")]
pub struct AsyncOrderArgs {
    /// Number of create/update/submit iterations
    #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(u32).range(1..))]
    pub iterations: u32,
    /// Seconds to wait before verifying the columnar mirror
    #[arg(long, default_value_t = 2)]
    pub wait: u64,
    /// Milliseconds between the Update and Submit calls
    #[arg(long, default_value_t = 10)]
    pub api_delay: u64,
    /// Coaching service endpoint (host:port or URI)
    #[arg(long, env = "PROBE_GRPC_HOST", default_value = GRPC_HOST_DEFAULT)]
    pub grpc_host: String,
    /// Cluster passed to the credential command
    #[arg(long, env = "PROBE_CLUSTER", default_value = CLUSTER_DEFAULT)]
    pub cluster: String,
    #[arg(long, default_value = staging::CUSTOMER)]
    pub customer: String,
    #[arg(long, default_value = staging::PROFILE)]
    pub profile: String,
    /// Template resource name, including the revision suffix
    #[arg(long, default_value = staging::TEMPLATE)]
    pub template: String,
    #[arg(long, default_value = staging::AGENT_USER)]
    pub agent_user: String,
    #[arg(long, default_value = staging::CONVERSATION)]
    pub conversation: String,
    #[arg(long, default_value = staging::CRITERION_1)]
    pub criterion_1: String,
    #[arg(long, default_value = staging::CRITERION_2)]
    pub criterion_2: String,
    /// Seconds allowed for the remote calls of one iteration, on top of
    /// --api-delay and --wait
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub call_timeout: u64,
}

impl AsyncOrderArgs {
    pub fn race_config(&self) -> RaceConfig {
        RaceConfig {
            iterations: self.iterations,
            wait: Duration::from_secs(self.wait),
            api_delay: Duration::from_millis(self.api_delay),
            call_timeout: Duration::from_secs(self.call_timeout),
            fixture: RaceFixture {
                customer: self.customer.clone(),
                profile: self.profile.clone(),
                template_name: self.template.clone(),
                agent_user_name: self.agent_user.clone(),
                conversation_name: self.conversation.clone(),
                criterion_1: self.criterion_1.clone(),
                criterion_2: self.criterion_2.clone(),
            },
        }
    }

    pub fn columnar_database(&self) -> String {
        columnar_database_name(&self.customer, &self.profile)
    }
}

/// Compares one scorecard between PostgreSQL and the ClickHouse mirror.
#[derive(Debug, Clone, Parser)]
#[command(name = "verify_sync")]
pub struct VerifySyncArgs {
    /// Full scorecard name: customers/<c>/profiles/<p>/scorecards/<id>
    #[arg(long)]
    pub name: String,
    /// PostgreSQL connection string (default: from the credential command)
    #[arg(long, env = "PROBE_PG", hide_env_values = true)]
    pub pg: Option<String>,
    /// Accepted for compatibility; ClickHouse settings come from CH_* variables
    #[arg(long, hide = true)]
    pub ch: Option<String>,
    /// Cluster passed to the credential command
    #[arg(long, env = "PROBE_CLUSTER", default_value = CLUSTER_DEFAULT)]
    pub cluster: String,
    /// Seconds allowed for each store call
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub call_timeout: u64,
}

impl VerifySyncArgs {
    /// The explicit connection string, if a non-blank one was given.
    pub fn explicit_pg(&self) -> Option<&str> {
        self.pg.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout)
    }
}

/// Parses the process arguments. Help and version exit 0; any other parse
/// error exits 1.
pub fn parse_or_exit<T: Parser>() -> T {
    match T::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    }
}
