#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! Command profiler: timing runs followed by one dedicated memory run

use crate::clock::{Clock, MonotonicClock};
use crate::config::ProfilerConfig;
use crate::error::{ProfileFailure, ProfilingError, Result};
use crate::memory::MemoryProfiler;
use crate::peak::{PeakRssReader, TimePeakReader};
use crate::performance::PerformanceProfiler;
use crate::profile::CommandProfile;
use crate::tree::{ProcessTreeRssSampler, RssSampler};
use tracing::{debug, info};

/// Profiles a command's execution time and peak memory.
///
/// With `runs = N`, the command is timed `N - 1` times and then run once more
/// for memory. Timing runs are not sampled, so sampling overhead never shows up
/// in the timings, and the memory run is not timed. Any failure is terminal:
/// the memory run is skipped if the timing runs fail, and no partial profile is
/// returned.
///
/// # Examples
///
/// ```no_run
/// # use toolchain_profiler::{CommandProfiler, ProfilerConfig};
/// # use std::time::Duration;
/// let config = ProfilerConfig::new(10)?
///     .with_timeout(Duration::from_secs(300))?
///     .with_fatal_exit_codes(vec![137, 139, 255])?
///     .with_prepare_command("rm -rf /tmp/cache")?;
///
/// let profiler = CommandProfiler::new(config)?;
/// match profiler.profile("mago lint /path/to/project") {
///     Ok(profile) => println!("{} peak", profile.memory()),
///     Err(failure) => eprintln!("{}", failure.reason()),
/// }
/// # Ok::<(), toolchain_profiler::ProfilingError>(())
/// ```
pub struct CommandProfiler {
    config: ProfilerConfig,
    clock: Box<dyn Clock>,
    sampler: Box<dyn RssSampler>,
    peak_reader: Box<dyn PeakRssReader>,
}

impl CommandProfiler {
    /// Create a profiler using the real clock, `ps` sampling, and `/usr/bin/time`
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn new(config: ProfilerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock: Box::new(MonotonicClock),
            sampler: Box::new(ProcessTreeRssSampler),
            peak_reader: Box::new(TimePeakReader),
        })
    }

    /// Replace the time source
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Replace the process-tree RSS sampler
    #[must_use]
    pub fn with_sampler(mut self, sampler: impl RssSampler + 'static) -> Self {
        self.sampler = Box::new(sampler);
        self
    }

    /// Replace the kernel peak RSS reader used by the low-confidence fallback
    #[must_use]
    pub fn with_peak_reader(mut self, reader: impl PeakRssReader + 'static) -> Self {
        self.peak_reader = Box::new(reader);
        self
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Profile `command` (a complete shell command line).
    ///
    /// # Errors
    ///
    /// Returns [`ProfileFailure`] from whichever phase failed first.
    pub fn profile(&self, command: &str) -> std::result::Result<CommandProfile, ProfileFailure> {
        if command.trim().is_empty() {
            return Err(ProfileFailure::start_failure(
                command,
                ProfilingError::EmptyCommand,
            ));
        }

        info!(command, runs = self.config.runs(), "profiling started");

        let performance = PerformanceProfiler::new(&self.config, self.clock.as_ref())
            .measure(command, self.config.timing_runs())?;
        debug!(
            command,
            mean_ms = performance.mean().as_millis(),
            "timing runs complete"
        );

        let memory = MemoryProfiler::new(
            &self.config,
            self.clock.as_ref(),
            self.sampler.as_ref(),
            self.peak_reader.as_ref(),
        )
        .measure(command)?;

        info!(command, peak_mb = memory.peak_mb(), "profiling finished");

        Ok(CommandProfile::new(command, performance, memory))
    }
}
