//! Time capability and debounced elapsed-time checks.
//!
//! Components never read hardware timers directly: they receive a [`Clock`]
//! so the same logic runs against the MCU monotonic timer, the emulator's
//! simulated time, and the fixed instants used in tests. Seconds are counted
//! from power-on, not from the last deep-sleep wake.

/// Monotonic time source injected into every component that needs it.
pub trait Clock {
    /// Whole seconds elapsed since power-on.
    fn seconds_since_power_on(&self) -> u64;

    /// Milliseconds elapsed since power-on.
    fn now_millis(&self) -> u64;
}

impl<C: Clock> Clock for &C {
    fn seconds_since_power_on(&self) -> u64 {
        (*self).seconds_since_power_on()
    }

    fn now_millis(&self) -> u64 {
        (*self).now_millis()
    }
}

/// Returns `true` when `interval_sec` has elapsed since `last_check_sec`.
///
/// A zero `last_check_sec` means "never checked" and always reports elapsed,
/// so periodic work fires immediately after boot.
#[must_use]
pub fn seconds_elapsed(clock: &impl Clock, last_check_sec: u64, interval_sec: u64) -> bool {
    let current = clock.seconds_since_power_on();
    last_check_sec == 0 || current.saturating_sub(last_check_sec) > interval_sec
}

/// Debounced variant of [`seconds_elapsed`] that stamps `last_check_sec` with
/// the current time when it reports elapsed, suppressing re-triggering until
/// the interval has passed again.
pub fn seconds_elapsed_and_update(
    clock: &impl Clock,
    last_check_sec: &mut u64,
    interval_sec: u64,
) -> bool {
    if seconds_elapsed(clock, *last_check_sec, interval_sec) {
        *last_check_sec = clock.seconds_since_power_on();
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::{Clock, seconds_elapsed, seconds_elapsed_and_update};

    struct FixedClock {
        seconds: u64,
    }

    impl Clock for FixedClock {
        fn seconds_since_power_on(&self) -> u64 {
            self.seconds
        }

        fn now_millis(&self) -> u64 {
            self.seconds * 1_000
        }
    }

    #[test]
    fn zero_last_check_always_reports_elapsed() {
        let clock = FixedClock { seconds: 5 };
        assert!(seconds_elapsed(&clock, 0, 0));
        assert!(seconds_elapsed(&clock, 0, 1_000_000));
    }

    #[test]
    fn interval_must_strictly_pass() {
        let clock = FixedClock { seconds: 100 };
        assert!(!seconds_elapsed(&clock, 90, 10));
        assert!(seconds_elapsed(&clock, 89, 10));
    }

    #[test]
    fn update_variant_debounces_immediate_recheck() {
        let clock = FixedClock { seconds: 42 };
        let mut last_check = 0;

        assert!(seconds_elapsed_and_update(&clock, &mut last_check, 30));
        assert_eq!(last_check, 42);
        assert!(!seconds_elapsed_and_update(&clock, &mut last_check, 30));
        assert_eq!(last_check, 42);
    }

    #[test]
    fn update_variant_fires_again_after_interval() {
        let mut last_check = 0;
        assert!(seconds_elapsed_and_update(
            &FixedClock { seconds: 10 },
            &mut last_check,
            30
        ));
        assert!(!seconds_elapsed_and_update(
            &FixedClock { seconds: 40 },
            &mut last_check,
            30
        ));
        assert!(seconds_elapsed_and_update(
            &FixedClock { seconds: 41 },
            &mut last_check,
            30
        ));
        assert_eq!(last_check, 41);
    }
}
