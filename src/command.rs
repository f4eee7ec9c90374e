//! External command execution
//!
//! Every external process the orchestrator starts goes through [`CommandRunner`].
//! Arguments are always passed as a discrete vector (never through a shell), and
//! every invocation is bounded by a timeout.

use crate::error::{OrchestratorError, OrchestratorResult};
use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Stderr marker the Foundry CLI prints when it has to start the service first
const SERVICE_STARTED_MARKER: &str = "Service is Started";

// ============================================================================
// Trait Definitions
// ============================================================================

/// A single external invocation
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout,
        }
    }

    /// First two arguments, e.g. `cache ls`; used to identify the subcommand
    pub fn subcommand(&self) -> String {
        self.args
            .iter()
            .take(2)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {:?}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Log stderr as a warning unless it only carries the service-started notice
    pub fn log_stderr(&self, description: &str) {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() && !stderr.contains(SERVICE_STARTED_MARKER) {
            tracing::warn!(command = %description, stderr = %stderr, "Command wrote to stderr");
        }
    }

    /// Turn a non-zero exit into an operational error carrying stderr
    pub fn ensure_success(self, description: &str) -> OrchestratorResult<Self> {
        self.log_stderr(description);

        if self.success {
            return Ok(self);
        }

        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };

        Err(OrchestratorError::operational(format!(
            "'{}' failed (exit code {}): {}",
            description,
            self.exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string()),
            detail
        )))
    }
}

/// Trait for running external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output
    ///
    /// Returns an error only when the process could not be run or timed out;
    /// a non-zero exit is reported through [`CommandOutput::success`].
    async fn run(&self, spec: CommandSpec) -> OrchestratorResult<CommandOutput>;
}

// ============================================================================
// Production Implementation
// ============================================================================

/// Production runner using tokio::process
#[derive(Debug, Default)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, spec: CommandSpec) -> OrchestratorResult<CommandOutput> {
        tracing::debug!(command = %spec, timeout_secs = spec.timeout.as_secs(), "Running command");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(spec.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(OrchestratorError::operational(format!(
                    "Failed to run '{}': {}",
                    spec.program, e
                )));
            }
            Err(_) => {
                // kill_on_drop reaps the child once the future is dropped
                tracing::error!(command = %spec, timeout_secs = spec.timeout.as_secs(), "Command timed out");
                return Err(OrchestratorError::operational(format!(
                    "'{}' timed out after {}s",
                    spec,
                    spec.timeout.as_secs()
                )));
            }
        };

        Ok(CommandOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================
