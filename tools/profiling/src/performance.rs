#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! Wall-clock timing over repeated runs

use crate::clock::Clock;
use crate::config::ProfilerConfig;
use crate::error::{FailureKind, ProfileFailure, START_FAILURE_EXIT_CODE};
use crate::prepare::PrepareHook;
use crate::process::{ProfiledProcess, WatchOutcome};
use crate::profile::PerformanceProfile;
use std::time::Duration;
use tracing::debug;

/// Times a command over several sequential runs
pub struct PerformanceProfiler<'a> {
    config: &'a ProfilerConfig,
    clock: &'a dyn Clock,
}

impl<'a> PerformanceProfiler<'a> {
    /// Create a profiler using `config`'s timeout, fatal codes, and prepare hook
    #[must_use]
    pub const fn new(config: &'a ProfilerConfig, clock: &'a dyn Clock) -> Self {
        Self { config, clock }
    }

    /// Run `command` `runs` times and collect one duration per run.
    ///
    /// Fails fast: a timeout, a start failure, or a fatal exit code ends the
    /// whole measurement and no partial timings are returned.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileFailure`] on the first run that fails.
    pub fn measure(&self, command: &str, runs: u32) -> Result<PerformanceProfile, ProfileFailure> {
        // Grows with completed runs; `runs` is caller-controlled and unbounded
        let mut durations = Vec::new();

        for run in 1..=runs {
            PrepareHook::run(self.config.prepare_command(), self.config.working_dir());

            let (elapsed, code) = self.run_once(command)?;
            debug!(
                command,
                run,
                runs,
                elapsed_ms = elapsed.as_millis(),
                exit_code = code,
                "timing run finished"
            );

            if self.config.is_fatal(code) {
                return Err(ProfileFailure::fatal_exit(command, code));
            }

            durations.push(elapsed);
        }

        PerformanceProfile::new(durations).ok_or_else(|| ProfileFailure::no_successful_runs(command))
    }

    /// One timed run: elapsed time from spawn to observed exit, and the exit code
    fn run_once(&self, command: &str) -> Result<(Duration, i32), ProfileFailure> {
        let started = self.clock.now();

        let mut process = ProfiledProcess::spawn(command, self.config.working_dir())
            .map_err(|e| ProfileFailure::start_failure(command, e))?;

        match process.watch(
            self.clock,
            started,
            self.config.poll_interval(),
            self.config.timeout(),
            |_| {},
        ) {
            WatchOutcome::Exited(code) => Ok((self.clock.since(started), code)),
            WatchOutcome::TimedOut => Err(ProfileFailure::timed_out(command, "Process")),
            WatchOutcome::PollFailed(e) => Err(ProfileFailure::new(
                command,
                START_FAILURE_EXIT_CODE,
                FailureKind::StartFailure,
                format!("Failed to poll process: {e}"),
            )),
        }
    }
}
