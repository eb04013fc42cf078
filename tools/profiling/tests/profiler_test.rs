//! End-to-end tests for the command profiler.
//!
//! These tests spawn real `sh` commands and verify that:
//! - Runs are split N-1 timing / 1 memory
//! - Fatal exit codes fail fast after a single run
//! - Timeouts kill the whole process tree within a bounded overshoot
//! - Process-tree RSS includes descendants
//! - The kernel max-RSS fallback wins over a low polled peak
//! - The kernel cross-check run obeys the same timeout

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use toolchain_profiler::error::TIMEOUT_EXIT_CODE;
use toolchain_profiler::process::ProfiledProcess;
use toolchain_profiler::{
    Clock, CommandProfiler, FailureKind, PeakReading, PeakRssReader, PeakRun,
    ProcessTreeRssSampler, ProcessTreeSnapshot, ProfilerConfig, RssSampler, TimePeakReader,
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Clock that advances only when slept on
struct VirtualClock {
    base: Instant,
    offset_nanos: AtomicU64,
}

impl VirtualClock {
    fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_nanos: AtomicU64::new(0),
        }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.offset_nanos.fetch_add(nanos, Ordering::SeqCst);
        // yield so the child still makes real progress
        thread::yield_now();
    }
}

/// Kernel reader stub with a fixed answer
struct FixedPeak(u64);

impl PeakRssReader for FixedPeak {
    fn peak_rss_kb(&self, _command: &str, _run: &PeakRun<'_>) -> PeakReading {
        PeakReading::Measured(self.0)
    }
}

/// Sampler stub with a fixed answer
struct FixedSampler(u64);

impl RssSampler for FixedSampler {
    fn sample_kb(&self, _root_pid: u32) -> u64 {
        self.0
    }
}

fn fast_config(runs: u32) -> toolchain_profiler::Result<ProfilerConfig> {
    ProfilerConfig::new(runs)?
        .with_poll_interval(Duration::from_millis(10))?
        .with_sample_interval(Duration::from_millis(10))
}

/// Alive means present in the process table and not a zombie
fn is_alive(pid: u32) -> bool {
    Command::new("ps")
        .args(["-o", "stat=", "-p"])
        .arg(pid.to_string())
        .output()
        .map(|out| {
            let stat = String::from_utf8_lossy(&out.stdout);
            out.status.success() && !stat.trim().is_empty() && !stat.trim().starts_with('Z')
        })
        .unwrap_or(false)
}

fn wait_until_dead(pid: u32, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if !is_alive(pid) {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    !is_alive(pid)
}

/// Profiling `true` with 3 total runs.
///
/// # GIVEN
/// A command that exits 0 immediately
///
/// # WHEN
/// It is profiled with runs = 3
///
/// # THEN
/// There are 2 timed runs, each under a second, and a small non-negative peak
#[test]
fn test_profile_true_end_to_end() -> TestResult {
    let profiler = CommandProfiler::new(fast_config(3)?)?;

    let profile = profiler.profile("true")?;

    assert_eq!(profile.command(), "true");
    assert_eq!(profile.performance().durations().len(), 2);
    assert!(
        profile
            .performance()
            .durations()
            .iter()
            .all(|d| *d < Duration::from_secs(1))
    );
    assert!(profile.memory().peak_mb() >= 0.0);
    assert!(profile.memory().peak_mb() < 1024.0);
    Ok(())
}

/// N total runs always produce N-1 durations.
#[test]
fn test_timing_run_count_follows_budget() -> TestResult {
    for runs in 2..=5 {
        let profiler = CommandProfiler::new(fast_config(runs)?)?.with_peak_reader(FixedPeak(1));
        let profile = profiler.profile("exit 0")?;

        assert_eq!(profile.performance().len(), usize::try_from(runs - 1)?);
    }
    Ok(())
}

/// A fatal exit code stops profiling after the first run.
///
/// # GIVEN
/// A command that logs each invocation and exits 3, with 3 marked fatal
///
/// # WHEN
/// It is profiled with runs = 6
///
/// # THEN
/// The failure carries exit code 3 and the command ran exactly once
#[test]
fn test_fatal_exit_code_fails_fast() -> TestResult {
    let dir = TempDir::new()?;
    let config = fast_config(6)?
        .with_fatal_exit_codes(vec![3])?
        .with_working_dir(dir.path().to_path_buf());
    let profiler = CommandProfiler::new(config)?;

    let result = profiler.profile("echo run >> invocations.log; exit 3");

    let failure = result.err().ok_or("expected a failure")?;
    assert_eq!(failure.exit_code(), 3);
    assert_eq!(failure.kind(), FailureKind::FatalExitCode);

    let log = std::fs::read_to_string(dir.path().join("invocations.log"))?;
    assert_eq!(log.lines().count(), 1);
    Ok(())
}

/// A command that outlives its timeout is killed with its children.
///
/// # GIVEN
/// A command that starts a background `sleep 30` and waits on it
///
/// # WHEN
/// It is profiled with a 1 second timeout
///
/// # THEN
/// A timeout failure returns shortly after 1s and the background child is gone
#[test]
fn test_timeout_kills_process_tree() -> TestResult {
    let dir = TempDir::new()?;
    let config = ProfilerConfig::new(2)?
        .with_timeout(Duration::from_secs(1))?
        .with_working_dir(dir.path().to_path_buf());
    let profiler = CommandProfiler::new(config)?;

    let started = Instant::now();
    let result = profiler.profile("sleep 30 & echo $! > child.pid; wait");
    let elapsed = started.elapsed();

    let failure = result.err().ok_or("expected a timeout")?;
    assert_eq!(failure.kind(), FailureKind::Timeout);
    assert_eq!(failure.exit_code(), TIMEOUT_EXIT_CODE);
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1500), "overshoot: {elapsed:?}");

    let child_pid: u32 = std::fs::read_to_string(dir.path().join("child.pid"))?
        .trim()
        .parse()?;
    assert!(wait_until_dead(child_pid, Duration::from_secs(2)));
    Ok(())
}

/// Timeouts are measured on the injected clock, not the wall clock.
#[test]
fn test_timeout_uses_injected_clock() -> TestResult {
    let config = ProfilerConfig::new(2)?.with_timeout(Duration::from_secs(10))?;
    let profiler = CommandProfiler::new(config)?.with_clock(VirtualClock::new());

    let started = Instant::now();
    let result = profiler.profile("sleep 30");

    assert!(matches!(result, Err(f) if f.kind() == FailureKind::Timeout));
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}

/// The kernel cross-check run is held to the same deadline as measured runs.
///
/// # GIVEN
/// A command that finishes quickly twice, then hangs on its third invocation
///
/// # WHEN
/// It is profiled with runs = 2 and a 1 second timeout, so the third
/// invocation is the kernel cross-check under `/usr/bin/time`
///
/// # THEN
/// Profiling returns a memory timeout shortly after 1s instead of hanging
#[test]
fn test_kernel_cross_check_honours_timeout() -> TestResult {
    if !std::path::Path::new("/usr/bin/time").exists() {
        return Ok(());
    }
    let dir = TempDir::new()?;
    let config = fast_config(2)?
        .with_timeout(Duration::from_secs(1))?
        .with_working_dir(dir.path().to_path_buf());
    let profiler = CommandProfiler::new(config)?.with_peak_reader(TimePeakReader);

    let started = Instant::now();
    let result = profiler.profile(
        "if [ -f second ]; then sleep 30; elif [ -f first ]; then touch second; else touch first; fi",
    );
    let elapsed = started.elapsed();

    let failure = result.err().ok_or("expected a timeout")?;
    assert_eq!(failure.kind(), FailureKind::Timeout);
    assert_eq!(failure.reason(), "Memory measurement timed out");
    assert!(elapsed < Duration::from_secs(5), "hung for {elapsed:?}");
    Ok(())
}

/// The kernel reading wins over a low polled peak.
///
/// # GIVEN
/// A sampler that sees 3 MB and a kernel reader that reports 250 MB
///
/// # WHEN
/// A short command is profiled
///
/// # THEN
/// The reported peak is 250.0 MB
#[test]
fn test_kernel_fallback_wins_over_low_polled_peak() -> TestResult {
    let profiler = CommandProfiler::new(fast_config(2)?)?
        .with_sampler(FixedSampler(3 * 1024))
        .with_peak_reader(FixedPeak(250 * 1024));

    let profile = profiler.profile("true")?;

    assert!((profile.memory().peak_mb() - 250.0).abs() < f64::EPSILON);
    Ok(())
}

/// Tree RSS includes the children of the sampled process.
#[test]
fn test_tree_rss_includes_descendants() -> TestResult {
    let process = ProfiledProcess::spawn("sleep 5 & sleep 5 & wait", &std::env::temp_dir())?;
    let pid = process.pid();

    let deadline = Instant::now() + Duration::from_secs(3);
    let mut snapshot = ProcessTreeSnapshot::capture()?;
    while snapshot.descendants(pid).len() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
        snapshot = ProcessTreeSnapshot::capture()?;
    }

    assert!(snapshot.descendants(pid).len() >= 2);
    let own = snapshot.rss_kb(pid).ok_or("root missing from snapshot")?;
    let tree = snapshot.tree_rss_kb(pid);
    let children: u64 = snapshot
        .descendants(pid)
        .into_iter()
        .filter_map(|child| snapshot.rss_kb(child))
        .sum();

    assert_eq!(tree, own + children);
    assert!(tree > own);
    assert!(ProcessTreeRssSampler.sample_kb(pid) > 0);

    drop(process);
    Ok(())
}

/// Sampling a process that no longer exists reads as zero.
#[test]
fn test_sampling_exited_process_is_zero() -> TestResult {
    let mut process = ProfiledProcess::spawn("true", &std::env::temp_dir())?;
    let pid = process.pid();

    let deadline = Instant::now() + Duration::from_secs(5);
    while process.try_exit_code()?.is_none() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(ProcessTreeRssSampler.sample_kb(pid), 0);
    Ok(())
}

/// A missing binary exits 127 from the shell and is not fatal by default.
#[test]
fn test_missing_binary_is_not_fatal_by_default() -> TestResult {
    let profiler = CommandProfiler::new(fast_config(2)?)?.with_peak_reader(FixedPeak(1));

    let profile = profiler.profile("definitely-not-a-real-binary-4242")?;

    assert_eq!(profile.performance().len(), 1);
    Ok(())
}
