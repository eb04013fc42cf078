#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! Profiling results: timing statistics, peak memory, and the combined profile

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Timings from the performance runs.
///
/// Statistics are derived from the stored durations on every call; nothing is
/// cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformanceProfile {
    durations: Vec<Duration>,
}

impl PerformanceProfile {
    /// Wrap a non-empty duration list; `None` if `durations` is empty
    #[must_use]
    pub fn new(durations: Vec<Duration>) -> Option<Self> {
        if durations.is_empty() {
            None
        } else {
            Some(Self { durations })
        }
    }

    /// Durations in run order
    #[must_use]
    pub fn durations(&self) -> &[Duration] {
        &self.durations
    }

    /// Number of timed runs
    #[must_use]
    pub fn len(&self) -> usize {
        self.durations.len()
    }

    /// Always false; kept for API symmetry with `len`
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    /// Fastest run
    #[must_use]
    pub fn min(&self) -> Duration {
        self.durations.iter().copied().min().unwrap_or_default()
    }

    /// Slowest run
    #[must_use]
    pub fn max(&self) -> Duration {
        self.durations.iter().copied().max().unwrap_or_default()
    }

    /// Arithmetic mean, computed in integer nanoseconds
    #[must_use]
    pub fn mean(&self) -> Duration {
        let total = self
            .durations
            .iter()
            .map(Duration::as_nanos)
            .fold(0_u128, u128::saturating_add);
        let count = u128::try_from(self.durations.len()).unwrap_or(u128::MAX);
        total.checked_div(count).map_or(Duration::ZERO, nanos_to_duration)
    }

    /// Population standard deviation
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // nanosecond counts well within f64 range for run times
    pub fn stddev(&self) -> Duration {
        let count = self.durations.len().max(1) as f64;
        let mean = self.mean().as_nanos() as f64;
        let variance = self
            .durations
            .iter()
            .map(|d| {
                let diff = d.as_nanos() as f64 - mean;
                diff * diff
            })
            .sum::<f64>()
            / count;

        Duration::try_from_secs_f64(variance.sqrt() / 1e9).unwrap_or_default()
    }
}

fn nanos_to_duration(nanos: u128) -> Duration {
    u64::try_from(nanos).map_or(Duration::MAX, Duration::from_nanos)
}

impl Serialize for PerformanceProfile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let secs: Vec<f64> = self.durations.iter().map(Duration::as_secs_f64).collect();
        let mut state = serializer.serialize_struct("PerformanceProfile", 6)?;
        state.serialize_field("times", &secs)?;
        state.serialize_field("mean", &self.mean().as_secs_f64())?;
        state.serialize_field("stddev", &self.stddev().as_secs_f64())?;
        state.serialize_field("min", &self.min().as_secs_f64())?;
        state.serialize_field("max", &self.max().as_secs_f64())?;
        state.serialize_field("runs", &self.len())?;
        state.end()
    }
}

/// Peak memory from the dedicated memory run
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryProfile {
    peak_mb: f64,
}

impl MemoryProfile {
    /// Peak in MB, rounded to one decimal; negative or non-finite input becomes 0
    #[must_use]
    pub fn new(peak_mb: f64) -> Self {
        let peak_mb = if peak_mb.is_finite() && peak_mb > 0.0 {
            round_tenth(peak_mb)
        } else {
            0.0
        };
        Self { peak_mb }
    }

    /// Peak from a KB reading
    #[must_use]
    pub fn from_kb(peak_kb: u64) -> Self {
        Self::new(kb_to_mb(peak_kb))
    }

    /// Peak RSS in megabytes
    #[must_use]
    pub const fn peak_mb(&self) -> f64 {
        self.peak_mb
    }
}

impl fmt::Display for MemoryProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} MB", self.peak_mb)
    }
}

/// KB to MB, rounded to one decimal
#[must_use]
#[allow(clippy::cast_precision_loss)] // RSS in KB is far below 2^52
pub fn kb_to_mb(kb: u64) -> f64 {
    round_tenth(kb as f64 / 1024.0)
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Complete profile of one command: timings plus peak memory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandProfile {
    command: String,
    performance: PerformanceProfile,
    memory: MemoryProfile,
    profiled_at: DateTime<Utc>,
}

impl CommandProfile {
    /// Assemble a profile, stamped with the current time
    #[must_use]
    pub fn new(
        command: impl Into<String>,
        performance: PerformanceProfile,
        memory: MemoryProfile,
    ) -> Self {
        Self {
            command: command.into(),
            performance,
            memory,
            profiled_at: Utc::now(),
        }
    }

    /// The profiled command
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Timing results from the `runs - 1` performance runs
    #[must_use]
    pub const fn performance(&self) -> &PerformanceProfile {
        &self.performance
    }

    /// Peak memory from the memory run
    #[must_use]
    pub const fn memory(&self) -> &MemoryProfile {
        &self.memory
    }

    /// When profiling finished
    #[must_use]
    pub const fn profiled_at(&self) -> &DateTime<Utc> {
        &self.profiled_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_millis).collect()
    }

    #[test]
    fn test_empty_durations_rejected() {
        assert!(PerformanceProfile::new(vec![]).is_none());
    }

    #[test]
    fn test_statistics() {
        let profile = PerformanceProfile::new(ms(&[100, 200, 300, 400]));
        assert!(profile.is_some());

        if let Some(p) = profile {
            assert_eq!(p.min(), Duration::from_millis(100));
            assert_eq!(p.max(), Duration::from_millis(400));
            assert_eq!(p.mean(), Duration::from_millis(250));
            // population stddev of 100..400 step 100 = sqrt(12500) ms
            let expected = 12_500_f64.sqrt() / 1000.0;
            assert!((p.stddev().as_secs_f64() - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_extreme_durations_do_not_overflow() {
        let profile = PerformanceProfile::new(vec![Duration::MAX, Duration::MAX]);

        assert_eq!(profile.as_ref().map(PerformanceProfile::mean), Some(Duration::MAX));
        assert_eq!(profile.map(|p| p.stddev()), Some(Duration::ZERO));
    }

    #[test]
    fn test_single_run_has_zero_stddev() {
        let profile = PerformanceProfile::new(ms(&[42]));
        assert_eq!(profile.map(|p| p.stddev()), Some(Duration::ZERO));
    }

    #[test]
    fn test_memory_rounds_to_one_decimal() {
        assert!((MemoryProfile::new(12.345).peak_mb() - 12.3).abs() < f64::EPSILON);
        assert!((MemoryProfile::new(12.36).peak_mb() - 12.4).abs() < 1e-9);
        assert!((MemoryProfile::from_kb(1536).peak_mb() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_memory_never_negative() {
        assert!(MemoryProfile::new(-3.0).peak_mb().abs() < f64::EPSILON);
        assert!(MemoryProfile::new(f64::NAN).peak_mb().abs() < f64::EPSILON);
    }

    #[test]
    fn test_memory_display() {
        assert_eq!(MemoryProfile::new(256.04).to_string(), "256.0 MB");
        assert_eq!(MemoryProfile::from_kb(0).to_string(), "0.0 MB");
    }

    #[test]
    fn test_command_profile_serializes_seconds() {
        let performance = PerformanceProfile::new(ms(&[500, 1500]));
        if let Some(performance) = performance {
            let profile = CommandProfile::new("true", performance, MemoryProfile::new(3.2));
            let json = serde_json::to_value(&profile);

            assert!(json.is_ok());
            if let Ok(json) = json {
                assert_eq!(json["command"], "true");
                assert_eq!(json["performance"]["runs"], 2);
                assert_eq!(json["performance"]["mean"], 1.0);
                assert_eq!(json["memory"]["peak_mb"], 3.2);
            }
        }
    }

    proptest! {
        #[test]
        fn prop_statistics_are_pure_and_bounded(values in proptest::collection::vec(0u64..10_000_000, 1..50)) {
            let durations: Vec<Duration> = values.iter().copied().map(Duration::from_micros).collect();
            let profile = PerformanceProfile::new(durations);
            prop_assert!(profile.is_some());

            if let Some(p) = profile {
                prop_assert_eq!(p.mean(), p.mean());
                prop_assert_eq!(p.stddev(), p.stddev());
                prop_assert!(p.min() <= p.mean());
                prop_assert!(p.mean() <= p.max());
                prop_assert!(p.stddev() <= p.max() - p.min());
            }
        }

        #[test]
        fn prop_memory_has_one_decimal(kb in 0u64..100_000_000) {
            let mb = MemoryProfile::from_kb(kb).peak_mb();
            prop_assert!(mb >= 0.0);
            prop_assert!(((mb * 10.0).round() - mb * 10.0).abs() < 1e-6);
        }
    }
}
