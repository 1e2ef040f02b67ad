//! Wall-clock scheduling for the daily rotation.
//!
//! The trigger only computes the next fire time; the main loop polls it.
//! Time comes from a [`Clock`] so tests can step across day boundaries.

use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime};
use std::sync::Mutex;

/// Source of local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The host's local time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = now;
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut guard = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// First occurrence of `at` strictly after `now`.
pub fn next_occurrence(at: NaiveTime, now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// Fires once per day at a fixed wall-clock time.
#[derive(Debug, Clone)]
pub struct DailyTrigger {
    at: NaiveTime,
    next_fire: NaiveDateTime,
}

impl DailyTrigger {
    pub fn new(at: NaiveTime, now: NaiveDateTime) -> Self {
        Self {
            at,
            next_fire: next_occurrence(at, now),
        }
    }

    pub fn at(&self) -> NaiveTime {
        self.at
    }

    pub fn next_fire(&self) -> NaiveDateTime {
        self.next_fire
    }

    /// True when the fire time has been reached; re-arms for the next day.
    ///
    /// After a long stall this fires once, not once per missed day.
    pub fn poll(&mut self, now: NaiveDateTime) -> bool {
        if now < self.next_fire {
            return false;
        }
        self.next_fire = next_occurrence(self.at, now);
        true
    }
}
