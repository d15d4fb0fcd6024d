//! Wall-clock source used to align traffic windows.

use std::fmt::Debug;

/// Source of the current time in whole seconds since the Unix epoch.
///
/// The counter store asks the clock once per operation and uses the value as
/// the window identifier, so swapping the clock is enough to drive window
/// transitions deterministically.
pub trait Clock: Send + Sync + Debug {
    /// Current time, truncated to whole seconds.
    fn now_secs(&self) -> u64;
}

/// Clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        // Pre-epoch clocks collapse onto window 0.
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

#[cfg(test)]
pub(crate) use manual::ManualClock;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_secs() > 1_577_836_800);
    }

    #[test]
    fn test_manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_secs(), 100);

        clock.advance(2);
        assert_eq!(clock.now_secs(), 102);

        clock.set(50);
        assert_eq!(clock.now_secs(), 50);
    }
}
