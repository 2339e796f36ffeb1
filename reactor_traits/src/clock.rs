use chrono::{Local, NaiveDateTime};

/// Wall-clock source for experiment timestamps.
///
/// - now(): local wall time, second resolution is enough for the tick log
/// - hours_between(): elapsed hours from a marked reference instant
pub trait Clock {
    fn now(&self) -> NaiveDateTime;

    /// Hours elapsed from `mark` to `at`, negative when `at` precedes the mark.
    fn hours_between(&self, mark: NaiveDateTime, at: NaiveDateTime) -> f64 {
        let secs = at.signed_duration_since(mark).num_seconds();
        secs as f64 / 3600.0
    }
}

/// Default clock backed by the host's local time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_clock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Deterministic clock whose time only moves when told to.
    #[derive(Debug, Clone)]
    pub struct TestClock {
        now: Arc<Mutex<NaiveDateTime>>,
    }

    impl TestClock {
        pub fn at(start: NaiveDateTime) -> Self {
            Self {
                now: Arc::new(Mutex::new(start)),
            }
        }

        /// Advance the clock by the given duration.
        pub fn advance(&self, d: chrono::Duration) {
            if let Ok(mut now) = self.now.lock() {
                *now += d;
            }
        }

        pub fn set(&self, at: NaiveDateTime) {
            if let Ok(mut now) = self.now.lock() {
                *now = at;
            }
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> NaiveDateTime {
            self.now
                .lock()
                .map(|g| *g)
                .unwrap_or(NaiveDateTime::MIN)
        }
    }

}
