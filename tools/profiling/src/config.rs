#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! Configuration for the command profiler

use crate::error::{ProfilingError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default total number of runs (N-1 timing runs + 1 memory run)
pub const DEFAULT_RUNS: u32 = 10;

/// Minimum total runs: one timing run plus the dedicated memory run
pub const MIN_RUNS: u32 = 2;

/// Exit codes treated as fatal unless overridden: SIGKILL/timeout (137) and 255
pub const DEFAULT_FATAL_EXIT_CODES: [i32; 2] = [137, 255];

/// Interval between liveness checks of a running command
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Interval between process-tree RSS samples during the memory run
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(50);

/// Polled peaks below this many MB are cross-checked against the kernel's
/// max-RSS figure. Coarse polling tends to miss the peak of short-lived tools,
/// and below this size the re-run is cheap. Tuned empirically.
pub const DEFAULT_FALLBACK_THRESHOLD_MB: f64 = 100.0;

/// Upper bound for both polling intervals
const MAX_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for a [`CommandProfiler`](crate::CommandProfiler)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Total runs; `runs - 1` are timed, one measures memory
    runs: u32,

    /// Deadline for each individual run
    #[serde(
        rename = "timeout_secs",
        with = "optional_secs",
        skip_serializing_if = "Option::is_none"
    )]
    timeout: Option<Duration>,

    /// Exit codes that abort profiling immediately
    fatal_exit_codes: Vec<i32>,

    /// Best-effort command run before every measured run
    prepare_command: Option<String>,

    /// Isolated directory the command and prepare hook run in
    working_dir: PathBuf,

    /// Interval between liveness checks
    #[serde(rename = "poll_interval_ms", with = "millis")]
    poll_interval: Duration,

    /// Interval between RSS samples during the memory run
    #[serde(rename = "sample_interval_ms", with = "millis")]
    sample_interval: Duration,

    /// Peaks below this (MB) trigger the kernel max-RSS cross-check
    fallback_threshold_mb: f64,
}

/// Intervals are written as whole milliseconds in config files
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// The timeout is written as whole seconds in config files
mod optional_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::ref_option)] // signature fixed by serde's `with`
    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(timeout) => serializer.serialize_u64(timeout.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|secs| secs.map(Duration::from_secs))
    }
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            runs: DEFAULT_RUNS,
            timeout: None,
            fatal_exit_codes: DEFAULT_FATAL_EXIT_CODES.to_vec(),
            prepare_command: None,
            working_dir: std::env::temp_dir(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            fallback_threshold_mb: DEFAULT_FALLBACK_THRESHOLD_MB,
        }
    }
}

impl ProfilerConfig {
    /// Create a configuration for `runs` total runs with default settings
    ///
    /// # Errors
    ///
    /// Returns [`ProfilingError::TooFewRuns`] if `runs < 2`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use toolchain_profiler::ProfilerConfig;
    /// # use std::time::Duration;
    /// let config = ProfilerConfig::new(5)
    ///     .and_then(|c| c.with_timeout(Duration::from_secs(300)));
    /// assert!(config.is_ok());
    /// ```
    pub fn new(runs: u32) -> Result<Self> {
        let config = Self {
            runs,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; omitted keys take their defaults
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed or fails validation.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| ProfilingError::ConfigRead(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Set the total number of runs
    ///
    /// # Errors
    ///
    /// Returns [`ProfilingError::TooFewRuns`] if `runs < 2`.
    pub fn with_runs(mut self, runs: u32) -> Result<Self> {
        Self::validate_runs(runs)?;
        self.runs = runs;
        Ok(self)
    }

    /// Set the per-run deadline
    ///
    /// # Errors
    ///
    /// Returns error if the timeout is zero.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        Self::validate_timeout(Some(timeout))?;
        self.timeout = Some(timeout);
        Ok(self)
    }

    /// Replace the fatal exit code set
    ///
    /// # Errors
    ///
    /// Returns [`ProfilingError::EmptyFatalExitCodes`] if `codes` is empty.
    pub fn with_fatal_exit_codes(mut self, codes: Vec<i32>) -> Result<Self> {
        Self::validate_fatal_exit_codes(&codes)?;
        self.fatal_exit_codes = codes;
        Ok(self)
    }

    /// Set the prepare command (e.g. clearing a tool's cache)
    ///
    /// # Errors
    ///
    /// Returns error if the command is blank.
    pub fn with_prepare_command(mut self, command: impl Into<String>) -> Result<Self> {
        let command = command.into();
        Self::validate_prepare_command(Some(&command))?;
        self.prepare_command = Some(command);
        Ok(self)
    }

    /// Set the working directory for measured runs and the prepare hook
    #[must_use]
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = dir;
        self
    }

    /// Set the liveness polling interval
    ///
    /// # Errors
    ///
    /// Returns error if the interval is zero or longer than one second.
    pub fn with_poll_interval(mut self, interval: Duration) -> Result<Self> {
        Self::validate_interval("poll_interval", interval)?;
        self.poll_interval = interval;
        Ok(self)
    }

    /// Set the RSS sampling interval
    ///
    /// # Errors
    ///
    /// Returns error if the interval is zero or longer than one second.
    pub fn with_sample_interval(mut self, interval: Duration) -> Result<Self> {
        Self::validate_interval("sample_interval", interval)?;
        self.sample_interval = interval;
        Ok(self)
    }

    /// Set the low-confidence threshold for the kernel max-RSS cross-check
    ///
    /// # Errors
    ///
    /// Returns error if the threshold is negative or not finite.
    pub fn with_fallback_threshold_mb(mut self, threshold_mb: f64) -> Result<Self> {
        Self::validate_threshold(threshold_mb)?;
        self.fallback_threshold_mb = threshold_mb;
        Ok(self)
    }

    /// Total runs
    #[must_use]
    pub const fn runs(&self) -> u32 {
        self.runs
    }

    /// Number of timed runs (`runs - 1`)
    #[must_use]
    pub const fn timing_runs(&self) -> u32 {
        self.runs.saturating_sub(1)
    }

    /// Per-run deadline
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Fatal exit codes
    #[must_use]
    pub fn fatal_exit_codes(&self) -> &[i32] {
        &self.fatal_exit_codes
    }

    /// Whether `code` aborts profiling
    #[must_use]
    pub fn is_fatal(&self, code: i32) -> bool {
        self.fatal_exit_codes.contains(&code)
    }

    /// Prepare command, if any
    #[must_use]
    pub fn prepare_command(&self) -> Option<&str> {
        self.prepare_command.as_deref()
    }

    /// Working directory
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Liveness polling interval
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// RSS sampling interval
    #[must_use]
    pub const fn sample_interval(&self) -> Duration {
        self.sample_interval
    }

    /// Kernel cross-check threshold in MB
    #[must_use]
    pub const fn fallback_threshold_mb(&self) -> f64 {
        self.fallback_threshold_mb
    }

    /// Check every field; used after deserialization
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<()> {
        Self::validate_runs(self.runs)?;
        Self::validate_timeout(self.timeout)?;
        Self::validate_fatal_exit_codes(&self.fatal_exit_codes)?;
        Self::validate_prepare_command(self.prepare_command.as_deref())?;
        Self::validate_interval("poll_interval", self.poll_interval)?;
        Self::validate_interval("sample_interval", self.sample_interval)?;
        Self::validate_threshold(self.fallback_threshold_mb)?;
        if self.working_dir.as_os_str().is_empty() {
            return Err(ProfilingError::InvalidConfig(
                "working directory cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_runs(runs: u32) -> Result<()> {
        if runs < MIN_RUNS {
            Err(ProfilingError::TooFewRuns(runs))
        } else {
            Ok(())
        }
    }

    fn validate_timeout(timeout: Option<Duration>) -> Result<()> {
        match timeout {
            Some(t) if t.is_zero() => Err(ProfilingError::InvalidConfig(
                "timeout must be greater than 0".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn validate_fatal_exit_codes(codes: &[i32]) -> Result<()> {
        if codes.is_empty() {
            Err(ProfilingError::EmptyFatalExitCodes)
        } else {
            Ok(())
        }
    }

    fn validate_prepare_command(command: Option<&str>) -> Result<()> {
        match command {
            Some(c) if c.trim().is_empty() => Err(ProfilingError::InvalidConfig(
                "prepare command cannot be blank".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn validate_interval(name: &str, interval: Duration) -> Result<()> {
        if interval.is_zero() || interval > MAX_INTERVAL {
            Err(ProfilingError::InvalidConfig(format!(
                "{name} must be between 1ns and {}ms, got {}ms",
                MAX_INTERVAL.as_millis(),
                interval.as_millis()
            )))
        } else {
            Ok(())
        }
    }

    fn validate_threshold(threshold_mb: f64) -> Result<()> {
        if threshold_mb.is_finite() && threshold_mb >= 0.0 {
            Ok(())
        } else {
            Err(ProfilingError::InvalidConfig(format!(
                "fallback threshold must be a non-negative number, got {threshold_mb}"
            )))
        }
    }
}
