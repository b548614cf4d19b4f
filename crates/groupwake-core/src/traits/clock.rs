//! Time source: wall clock in production, settable in tests.

use chrono::{DateTime, Local, Timelike, Utc};
use std::sync::Mutex;

/// Source of "now" for policy evaluation and timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current hour in local wall-clock time.
    fn local_hour(&self) -> u32 {
        self.now().with_timezone(&Local).hour()
    }
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// The local hour is set independently of the instant so window and
/// time-of-day behaviour does not depend on the host time zone.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<(DateTime<Utc>, u32)>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>, local_hour: u32) -> Self {
        Self {
            state: Mutex::new((now, local_hour)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.lock().0 = now;
    }

    pub fn set_local_hour(&self, hour: u32) {
        self.lock().1 = hour;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut state = self.lock();
        state.0 += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, (DateTime<Utc>, u32)> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().0
    }

    fn local_hour(&self) -> u32 {
        self.lock().1
    }
}
