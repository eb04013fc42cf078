#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! Peak memory measurement
//!
//! The command runs once while the RSS of its whole process tree is polled.
//! Polling can miss the peak of fast processes, so a low or missing reading is
//! cross-checked against the kernel's own max-RSS figure from a second run, and
//! the larger value wins. The second run is held to the same deadline.

use crate::clock::Clock;
use crate::config::ProfilerConfig;
use crate::error::{FailureKind, ProfileFailure, START_FAILURE_EXIT_CODE};
use crate::peak::{PeakReading, PeakRssReader, PeakRun};
use crate::prepare::PrepareHook;
use crate::process::{ProfiledProcess, WatchOutcome};
use crate::profile::{MemoryProfile, kb_to_mb};
use crate::tree::RssSampler;
use tracing::debug;

/// Measures the peak RSS of a command's process tree
pub struct MemoryProfiler<'a> {
    config: &'a ProfilerConfig,
    clock: &'a dyn Clock,
    sampler: &'a dyn RssSampler,
    peak_reader: &'a dyn PeakRssReader,
}

impl<'a> MemoryProfiler<'a> {
    /// Create a memory profiler
    #[must_use]
    pub const fn new(
        config: &'a ProfilerConfig,
        clock: &'a dyn Clock,
        sampler: &'a dyn RssSampler,
        peak_reader: &'a dyn PeakRssReader,
    ) -> Self {
        Self {
            config,
            clock,
            sampler,
            peak_reader,
        }
    }

    /// Run `command` once and report its peak memory.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileFailure`] if the command cannot start, exits with a
    /// fatal code, or exceeds the timeout.
    pub fn measure(&self, command: &str) -> Result<MemoryProfile, ProfileFailure> {
        PrepareHook::run(self.config.prepare_command(), self.config.working_dir());

        let (code, peak_kb) = self.poll_peak(command)?;

        if self.config.is_fatal(code) {
            return Err(ProfileFailure::fatal_exit(command, code));
        }

        let polled_mb = (peak_kb > 0).then(|| kb_to_mb(peak_kb));
        let peak_mb = match polled_mb {
            Some(mb) if mb >= self.config.fallback_threshold_mb() => mb,
            polled => {
                let kernel_mb = self.kernel_peak_mb(command)?;
                debug!(
                    command,
                    polled_mb = ?polled,
                    kernel_mb = ?kernel_mb,
                    "low-confidence peak, cross-checked with kernel max RSS"
                );
                polled.unwrap_or(0.0).max(kernel_mb.unwrap_or(0.0))
            }
        };

        Ok(MemoryProfile::new(peak_mb))
    }

    /// Spawn the command and sample its tree until exit.
    /// Returns the exit code and the highest summed RSS seen (KB, 0 if none).
    fn poll_peak(&self, command: &str) -> Result<(i32, u64), ProfileFailure> {
        let started = self.clock.now();

        let mut process = ProfiledProcess::spawn(command, self.config.working_dir())
            .map_err(|e| ProfileFailure::start_failure(command, e))?;
        let pid = process.pid();

        let mut peak_kb = 0_u64;
        let mut last_descendants = Vec::new();
        let outcome = process.watch(
            self.clock,
            started,
            self.config.sample_interval(),
            self.config.timeout(),
            |pid| {
                let sample = self.sampler.sample_tree(pid);
                peak_kb = peak_kb.max(sample.rss_kb);
                if !sample.descendants.is_empty() {
                    last_descendants = sample.descendants;
                }
            },
        );

        match outcome {
            WatchOutcome::Exited(code) => {
                // Final sample: the root is already reaped, but descendants that
                // outlived it are still part of the command's footprint
                peak_kb = peak_kb.max(self.sampler.survivors_kb(&last_descendants));
                debug!(command, pid, peak_kb, exit_code = code, "memory run finished");
                Ok((code, peak_kb))
            }
            WatchOutcome::TimedOut => Err(ProfileFailure::timed_out(command, "Memory measurement")),
            WatchOutcome::PollFailed(e) => Err(ProfileFailure::new(
                command,
                START_FAILURE_EXIT_CODE,
                FailureKind::StartFailure,
                format!("Failed to poll process: {e}"),
            )),
        }
    }

    /// Re-run under the kernel peak reader; not timed and not counted as a run
    fn kernel_peak_mb(&self, command: &str) -> Result<Option<f64>, ProfileFailure> {
        PrepareHook::run(self.config.prepare_command(), self.config.working_dir());

        let run = PeakRun {
            working_dir: self.config.working_dir(),
            clock: self.clock,
            poll_interval: self.config.poll_interval(),
            timeout: self.config.timeout(),
        };

        match self.peak_reader.peak_rss_kb(command, &run) {
            PeakReading::Measured(kb) => Ok(Some(kb_to_mb(kb))),
            PeakReading::Unavailable => Ok(None),
            PeakReading::TimedOut => Err(ProfileFailure::timed_out(command, "Memory measurement")),
        }
    }
}
