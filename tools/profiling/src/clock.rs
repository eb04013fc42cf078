//! Monotonic time source for deadlines and run timing

use std::thread;
use std::time::{Duration, Instant};

/// Time source used by the polling loops.
///
/// Every deadline check and run measurement goes through this trait so that the
/// sleep-poll-check loops can be driven by a virtual clock in tests.
pub trait Clock: Send + Sync {
    /// Current monotonic instant
    fn now(&self) -> Instant;

    /// Block the caller for `duration`
    fn sleep(&self, duration: Duration);

    /// Time elapsed since `start`
    fn since(&self, start: Instant) -> Duration {
        self.now().saturating_duration_since(start)
    }
}

/// Real monotonic clock (`Instant::now` + `thread::sleep`)
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock;
        let start = clock.now();
        clock.sleep(Duration::from_millis(5));

        assert!(clock.since(start) >= Duration::from_millis(5));
    }
}
