//! Command executor for running job commands through the system shell.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest stderr excerpt copied into a failure message.
const ERROR_EXCERPT_MAX_CHARS: usize = 512;

/// Captured output of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Result of running one job command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The command exited with status 0.
    Success {
        duration: Duration,
        output: CommandOutput,
    },
    /// Non-zero exit, signal, timeout or spawn failure.
    Failure {
        /// Exit code, when the process exited normally.
        code: Option<i32>,
        message: String,
        duration: Duration,
        output: CommandOutput,
    },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn duration(&self) -> Duration {
        match self {
            Self::Success { duration, .. } | Self::Failure { duration, .. } => *duration,
        }
    }

    pub fn output(&self) -> &CommandOutput {
        match self {
            Self::Success { output, .. } | Self::Failure { output, .. } => output,
        }
    }

    /// Failure description recorded as the job's `last_error`.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { message, .. } => Some(message),
        }
    }

    fn failure(code: Option<i32>, message: impl Into<String>, started: Instant) -> Self {
        Self::Failure {
            code,
            message: message.into(),
            duration: started.elapsed(),
            output: CommandOutput::default(),
        }
    }
}

/// Runs job commands.
///
/// Implementations never return an error: every way a command can fail is an
/// [`ExecutionOutcome::Failure`].
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &str, timeout: Option<Duration>) -> ExecutionOutcome;
}

/// Executes commands with `sh -c` (`cmd /C` on Windows).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn run(&self, command: &str, timeout: Option<Duration>) -> ExecutionOutcome {
        let started = Instant::now();

        let mut cmd = process_utils::tokio_shell_command(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn command '{}': {}", command, e);
                return ExecutionOutcome::failure(
                    None,
                    format!("Failed to spawn command: {}", e),
                    started,
                );
            }
        };

        // Dropping the `wait_with_output` future on timeout drops the child,
        // which kills it (`kill_on_drop`).
        let waited = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(waited) => waited,
                Err(_) => {
                    return ExecutionOutcome::failure(
                        None,
                        format!("Timed out after {} ms", limit.as_millis()),
                        started,
                    );
                }
            },
            None => child.wait_with_output().await,
        };

        let raw = match waited {
            Ok(raw) => raw,
            Err(e) => {
                return ExecutionOutcome::failure(
                    None,
                    format!("Failed to wait for command: {}", e),
                    started,
                );
            }
        };

        let duration = started.elapsed();
        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
        };
        if !output.stdout.is_empty() {
            debug!("stdout: {}", output.stdout.trim_end());
        }
        if !output.stderr.is_empty() {
            debug!("stderr: {}", output.stderr.trim_end());
        }

        if raw.status.success() {
            return ExecutionOutcome::Success { duration, output };
        }

        let code = raw.status.code();
        let mut message = match code {
            Some(code) => format!("Exit code {}", code),
            None => describe_signal(&raw.status),
        };
        let excerpt = stderr_excerpt(&output.stderr);
        if !excerpt.is_empty() {
            message.push_str(": ");
            message.push_str(&excerpt);
        }

        ExecutionOutcome::Failure {
            code,
            message,
            duration,
            output,
        }
    }
}

#[cfg(unix)]
fn describe_signal(status: &std::process::ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(signal) => format!("Terminated by signal {}", signal),
        None => format!("Command failed: {}", status),
    }
}

#[cfg(not(unix))]
fn describe_signal(status: &std::process::ExitStatus) -> String {
    format!("Command failed: {}", status)
}

/// Last characters of stderr, trimmed, for inclusion in `last_error`.
fn stderr_excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= ERROR_EXCERPT_MAX_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - ERROR_EXCERPT_MAX_CHARS).collect()
}
