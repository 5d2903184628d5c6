//! Defines watchers that turn the raw tick stream into higher-level signals.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::time::Duration;
use tokio::time::Instant;

/// Watches the clock for calendar-day changes in the mosque's timezone.
#[derive(Debug, Clone)]
pub struct DateWatcher {
    timezone: Tz,
    last_known_date: Option<NaiveDate>,
}

impl DateWatcher {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            last_known_date: None,
        }
    }

    /// The local date at `now`.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }

    /// Returns the new local date when it differs from the last one seen.
    ///
    /// The first call always reports a change. Going back a day (a clock
    /// correction) counts as a change too.
    pub fn process_tick(&mut self, now: DateTime<Utc>) -> Option<NaiveDate> {
        let current_date = self.local_date(now);
        if self.last_known_date == Some(current_date) {
            return None;
        }
        self.last_known_date = Some(current_date);
        Some(current_date)
    }
}

/// Fires at most once per `interval`, checked on each tick.
#[derive(Debug, Clone)]
pub struct IntervalWatcher {
    interval: Duration,
    last_fired: Instant,
}

impl IntervalWatcher {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: Instant::now(),
        }
    }

    /// Returns `true` if the interval has elapsed since it last fired.
    pub fn process_tick(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last_fired) >= self.interval {
            self.last_fired = now;
            return true;
        }
        false
    }
}
