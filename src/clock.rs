//! Wall-clock abstraction.
//!
//! Every time-dependent decision (policy freshness, eligibility windows,
//! liveness, backoff) reads the clock through [`Clock`] so tests can pin
//! and advance time without sleeping.

use chrono::{DateTime, Duration, Local, NaiveDateTime, Utc};
use std::sync::Mutex;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Absolute instant, used for ages and intervals.
    fn now(&self) -> DateTime<Utc>;

    /// Local wall-clock time, used for working windows and holidays.
    fn local_now(&self) -> NaiveDateTime;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A manually driven clock whose local time equals UTC.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock reading the given local wall-clock time.
    #[must_use]
    pub fn at_local(local: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(local.and_utc()),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: std::time::Duration) {
        let delta = Duration::from_std(by).unwrap_or(Duration::zero());
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += delta;
    }

    /// Jump to a specific local wall-clock time.
    pub fn set_local(&self, local: NaiveDateTime) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard = local.and_utc();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn local_now(&self) -> NaiveDateTime {
        self.now().naive_utc()
    }
}

/// Elapsed time from `earlier` to `later`, clamped at zero.
#[must_use]
pub fn elapsed(earlier: DateTime<Utc>, later: DateTime<Utc>) -> std::time::Duration {
    (later - earlier).to_std().unwrap_or_default()
}
