#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! Error types for the command profiler
//!
//! Two channels are kept apart:
//! - [`ProfilingError`] reports misuse of the engine (bad configuration, unreadable
//!   config files). These are returned before any command is spawned.
//! - [`ProfileFailure`] is the terminal outcome of a measurement that could not be
//!   completed (the command would not start, crashed, or ran past its deadline).

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Exit code reported when the command could not be spawned.
pub const START_FAILURE_EXIT_CODE: i32 = -1;

/// Exit code reported when every timing run completed without producing a duration.
pub const NO_SUCCESSFUL_RUNS_EXIT_CODE: i32 = -1;

/// Exit code reported for a run that was killed at its deadline.
///
/// Matches what a shell reports for a SIGKILLed child (128 + 9), so the default
/// fatal set treats timeouts and OOM kills alike.
pub const TIMEOUT_EXIT_CODE: i32 = 137;

/// Result type alias for profiler construction and configuration
pub type Result<T> = std::result::Result<T, ProfilingError>;

/// Errors raised while configuring the profiler
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProfilingError {
    /// Configuration value out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Fewer than two total runs requested
    #[error("at least 2 runs are required (1 timing run + 1 memory run), got {0}")]
    TooFewRuns(u32),

    /// Blank command string
    #[error("command to profile cannot be empty")]
    EmptyCommand,

    /// Fatal exit code set was empty
    #[error("fatal exit code set cannot be empty")]
    EmptyFatalExitCodes,

    /// Config file could not be read
    #[error("failed to read configuration file: {0}")]
    ConfigRead(String),

    /// Config file could not be parsed
    #[error("failed to parse configuration: {0}")]
    ConfigParse(String),
}

impl From<toml::de::Error> for ProfilingError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

/// Why a measurement was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The child process could not be spawned or polled
    StartFailure,
    /// The command exited with one of the configured fatal codes
    FatalExitCode,
    /// The command ran past the configured deadline and was killed
    Timeout,
    /// No timing run produced a duration
    NoSuccessfulRuns,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::StartFailure => "start failure",
            Self::FatalExitCode => "fatal exit code",
            Self::Timeout => "timeout",
            Self::NoSuccessfulRuns => "no successful runs",
        };
        f.write_str(label)
    }
}

/// Terminal failure of a profiling call. No partial statistics accompany it.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[error("{reason} (exit code {exit_code}): {command}")]
pub struct ProfileFailure {
    command: String,
    exit_code: i32,
    kind: FailureKind,
    reason: String,
}

impl ProfileFailure {
    /// Create a failure record
    #[must_use]
    pub fn new(
        command: impl Into<String>,
        exit_code: i32,
        kind: FailureKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            exit_code,
            kind,
            reason: reason.into(),
        }
    }

    /// The command could not be started
    #[must_use]
    pub fn start_failure(command: &str, detail: impl fmt::Display) -> Self {
        Self::new(
            command,
            START_FAILURE_EXIT_CODE,
            FailureKind::StartFailure,
            format!("Failed to start process: {detail}"),
        )
    }

    /// The command exited with a fatal code
    #[must_use]
    pub fn fatal_exit(command: &str, exit_code: i32) -> Self {
        Self::new(
            command,
            exit_code,
            FailureKind::FatalExitCode,
            format!("Process failed (exit code {exit_code})"),
        )
    }

    /// The command was killed at its deadline
    #[must_use]
    pub fn timed_out(command: &str, phase: &str) -> Self {
        Self::new(
            command,
            TIMEOUT_EXIT_CODE,
            FailureKind::Timeout,
            format!("{phase} timed out"),
        )
    }

    /// No timing run produced a duration
    #[must_use]
    pub fn no_successful_runs(command: &str) -> Self {
        Self::new(
            command,
            NO_SUCCESSFUL_RUNS_EXIT_CODE,
            FailureKind::NoSuccessfulRuns,
            "No successful timing runs",
        )
    }

    /// The command that failed
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Exit code of the failed run, or a sentinel when there was none
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Failure category
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Human-readable reason
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}
