#![forbid(unsafe_code)]

use std::process::Stdio;

use async_trait::async_trait;
use scorecard_probe_contracts::ProbeError;
use tokio::process::Command;

pub const TOKEN_CMD_ENV: &str = "PROBE_TOKEN_CMD";
pub const CONNSTRING_CMD_ENV: &str = "PROBE_CONNSTRING_CMD";
const CREDENTIAL_PROGRAM: &str = "cresta-cli";

/// One-call source of a secret line (bearer token, connection string).
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self) -> Result<String, ProbeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticCredential(String);

impl StaticCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn fetch(&self) -> Result<String, ProbeError> {
        let value = self.0.trim();
        if value.is_empty() {
            return Err(ProbeError::Auth("static credential is empty".to_string()));
        }
        Ok(value.to_string())
    }
}

/// Runs an external command and takes its trimmed stdout as the credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCredential {
    what: &'static str,
    program: String,
    args: Vec<String>,
}

impl CommandCredential {
    pub fn new(what: &'static str, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            what,
            program: program.into(),
            args,
        }
    }

    /// Splits on whitespace; quoting is not interpreted.
    pub fn from_command_line(what: &'static str, line: &str) -> Result<Self, ProbeError> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| ProbeError::Config(format!("{what} command is empty")))?;
        Ok(Self::new(what, program, parts.collect()))
    }

    /// `cresta-cli cresta-token <cluster> <customer> --bearer`, unless
    /// `PROBE_TOKEN_CMD` is set.
    pub fn bearer_token(cluster: &str, customer: &str) -> Result<Self, ProbeError> {
        Self::with_override(
            "auth token",
            std::env::var(TOKEN_CMD_ENV).ok(),
            vec![
                "cresta-token".to_string(),
                cluster.to_string(),
                customer.to_string(),
                "--bearer".to_string(),
            ],
        )
    }

    /// `cresta-cli connstring -i --read-only <cluster> <cluster> <customer>-<profile>`,
    /// unless `PROBE_CONNSTRING_CMD` is set.
    pub fn pg_connection_string(
        cluster: &str,
        customer: &str,
        profile: &str,
    ) -> Result<Self, ProbeError> {
        Self::with_override(
            "connection string",
            std::env::var(CONNSTRING_CMD_ENV).ok(),
            vec![
                "connstring".to_string(),
                "-i".to_string(),
                "--read-only".to_string(),
                cluster.to_string(),
                cluster.to_string(),
                format!("{customer}-{profile}"),
            ],
        )
    }

    fn with_override(
        what: &'static str,
        command_line: Option<String>,
        default_args: Vec<String>,
    ) -> Result<Self, ProbeError> {
        match command_line.filter(|line| !line.trim().is_empty()) {
            Some(line) => Self::from_command_line(what, &line),
            None => Ok(Self::new(what, CREDENTIAL_PROGRAM, default_args)),
        }
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl CredentialProvider for CommandCredential {
    async fn fetch(&self) -> Result<String, ProbeError> {
        tracing::debug!(what = self.what, program = %self.program, "running credential command");
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProbeError::Auth(format!("{}: run {}: {e}", self.what, self.program)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Auth(format!(
                "{}: {} exited with {}: {}",
                self.what,
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        let line = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if line.is_empty() {
            return Err(ProbeError::Auth(format!(
                "{}: {} printed nothing",
                self.what, self.program
            )));
        }
        Ok(line)
    }
}
