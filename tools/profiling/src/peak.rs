#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! Kernel-reported peak RSS
//!
//! Runs a command once under `/usr/bin/time`, which reports the `ru_maxrss`
//! figure the kernel tracked for it. No sampling is involved, so short-lived
//! allocation spikes cannot be missed.

use crate::clock::Clock;
use crate::process::{ProfiledProcess, WatchOutcome};
use regex::Regex;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

/// Location of the `time` utility (not the shell builtin)
pub const TIME_BINARY: &str = "/usr/bin/time";

/// Flag asking `time` for its resource usage report
#[cfg(target_os = "linux")]
const TIME_VERBOSE_FLAG: &str = "-v";
#[cfg(not(target_os = "linux"))]
const TIME_VERBOSE_FLAG: &str = "-l";

/// GNU time: "Maximum resident set size (kbytes): 12345"
static GNU_MAX_RSS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Maximum resident set size \(kbytes\):\s*(\d+)").ok());

/// BSD/macOS time: "  12345678  maximum resident set size" (bytes)
static BSD_MAX_RSS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+maximum resident set size").ok());

/// Where and under which deadline a kernel-measured run executes
#[derive(Clone, Copy)]
pub struct PeakRun<'a> {
    /// Directory the command runs in
    pub working_dir: &'a Path,
    /// Time source for the deadline
    pub clock: &'a dyn Clock,
    /// Interval between liveness checks
    pub poll_interval: Duration,
    /// Deadline for the run, if any
    pub timeout: Option<Duration>,
}

/// Outcome of one kernel-measured run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakReading {
    /// Peak RSS in KB
    Measured(u64),
    /// No figure could be obtained
    Unavailable,
    /// The run passed its deadline and its tree was killed
    TimedOut,
}

/// Source of a kernel-measured peak RSS for one execution of a command
pub trait PeakRssReader: Send + Sync {
    /// Run `command` once under `run`'s limits and report its peak RSS
    fn peak_rss_kb(&self, command: &str, run: &PeakRun<'_>) -> PeakReading;
}

/// [`PeakRssReader`] backed by `/usr/bin/time`
#[derive(Debug, Clone, Copy, Default)]
pub struct TimePeakReader;

impl PeakRssReader for TimePeakReader {
    fn peak_rss_kb(&self, command: &str, run: &PeakRun<'_>) -> PeakReading {
        // Group the command so its own output is silenced but time's report is not
        let silenced = format!("{{ {command}\n}} >/dev/null 2>&1");

        let mut program = Command::new(TIME_BINARY);
        program
            .arg(TIME_VERBOSE_FLAG)
            .args(["sh", "-c", silenced.as_str()])
            .current_dir(run.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let started = run.clock.now();
        let mut process = match ProfiledProcess::spawn_program(program) {
            Ok(process) => process,
            Err(e) => {
                debug!(command, error = %e, "could not run {TIME_BINARY}");
                return PeakReading::Unavailable;
            }
        };

        match process.watch(run.clock, started, run.poll_interval, run.timeout, |_| {}) {
            // A failing command still gets a report; only the figure matters
            WatchOutcome::Exited(_) => {
                let mut report = String::new();
                if let Some(Err(e)) = process
                    .take_stderr()
                    .map(|mut stderr| stderr.read_to_string(&mut report))
                {
                    debug!(command, error = %e, "could not read {TIME_BINARY} report");
                }
                let peak = parse_time_report(&report);
                debug!(command, peak_kb = ?peak, "kernel peak RSS reading");
                peak.map_or(PeakReading::Unavailable, PeakReading::Measured)
            }
            WatchOutcome::TimedOut => PeakReading::TimedOut,
            WatchOutcome::PollFailed(e) => {
                debug!(command, error = %e, "lost track of {TIME_BINARY}");
                PeakReading::Unavailable
            }
        }
    }
}

/// Extract max RSS in KB from GNU or BSD `time` output; zero counts as no reading
#[must_use]
pub fn parse_time_report(report: &str) -> Option<u64> {
    let capture = |regex: &Option<Regex>| -> Option<u64> {
        regex
            .as_ref()?
            .captures(report)?
            .get(1)?
            .as_str()
            .parse()
            .ok()
    };

    capture(&GNU_MAX_RSS)
        .or_else(|| capture(&BSD_MAX_RSS).map(|bytes| bytes.saturating_div(1024)))
        .filter(|kb| *kb > 0)
}
