#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

//! Command profiling engine for benchmarking external developer tools
//!
//! Runs a shell command several times and reports trustworthy wall-clock timings
//! and the peak resident memory of its whole process tree. Timeouts kill the
//! entire tree, fatal exit codes fail fast, and low memory readings are
//! cross-checked against the kernel's max-RSS figure.
//!
//! Unix only: commands run through `sh`, process trees are read from `ps`, and
//! the kernel figure comes from `/usr/bin/time`.

pub mod clock;
pub mod config;
pub mod error;
pub mod memory;
pub mod peak;
pub mod performance;
pub mod prepare;
pub mod process;
pub mod profile;
pub mod profiler;
pub mod tree;

pub use clock::{Clock, MonotonicClock};
pub use config::ProfilerConfig;
pub use error::{FailureKind, ProfileFailure, ProfilingError, Result};
pub use memory::MemoryProfiler;
pub use peak::{PeakReading, PeakRssReader, PeakRun, TimePeakReader};
pub use performance::PerformanceProfiler;
pub use prepare::PrepareHook;
pub use profile::{CommandProfile, MemoryProfile, PerformanceProfile};
pub use profiler::CommandProfiler;
pub use tree::{ProcessTreeRssSampler, ProcessTreeSnapshot, RssSampler, TreeSample};
