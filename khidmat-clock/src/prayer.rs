//! Daily prayer slots and the provider seam that produces them.
//!
//! Astronomical calculation lives outside this crate. A `PrayerTimeProvider`
//! is treated as a pure function of coordinates, date and timezone; the
//! bundled `FixedTimesProvider` simply maps configured local times onto a date.

use crate::common::PrayerName;
use crate::error::{KhidmatError, Result};
use crate::settings::PrayerSettings;
use crate::window::windows_for;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

/// Geographic position of the mosque.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Coordinates plus the timezone calendar days are counted in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub coordinates: Coordinates,
    pub timezone: Tz,
}

/// One prayer on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrayerSlot {
    pub name: PrayerName,
    pub timestamp: DateTime<Utc>,
}

/// Computes the five prayer instants for a date.
pub trait PrayerTimeProvider: Send + Sync {
    /// Returns Fajr, Dhuhr, Asr, Maghrib and Isha as UTC instants.
    fn compute_times(
        &self,
        coordinates: Coordinates,
        date: NaiveDate,
        timezone: Tz,
    ) -> Result<[DateTime<Utc>; 5]>;
}

/// A provider that returns the same local times every day.
///
/// Useful when the mosque publishes a fixed timetable, and as the stand-in for
/// a real astronomical provider in tests.
#[derive(Debug, Clone)]
pub struct FixedTimesProvider {
    times: [NaiveTime; 5],
}

impl FixedTimesProvider {
    pub fn new(times: [NaiveTime; 5]) -> Self {
        Self { times }
    }
}

impl PrayerTimeProvider for FixedTimesProvider {
    fn compute_times(
        &self,
        _coordinates: Coordinates,
        date: NaiveDate,
        timezone: Tz,
    ) -> Result<[DateTime<Utc>; 5]> {
        let mut out = [DateTime::<Utc>::MIN_UTC; 5];
        for (slot, time) in out.iter_mut().zip(self.times) {
            let local = timezone
                .from_local_datetime(&date.and_time(time))
                .earliest()
                .ok_or_else(|| KhidmatError::PrayerTimes {
                    date,
                    reason: format!("{time} does not exist in {timezone}"),
                })?;
            *slot = local.with_timezone(&Utc);
        }
        Ok(out)
    }
}

/// The five slots of one local calendar day. Recomputed, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaySchedule {
    pub date: NaiveDate,
    pub slots: [PrayerSlot; 5],
}

impl DaySchedule {
    /// Asks `provider` for `date` and checks the result is strictly ascending.
    pub fn compute(
        provider: &dyn PrayerTimeProvider,
        location: &Location,
        date: NaiveDate,
    ) -> Result<Self> {
        let times = provider.compute_times(location.coordinates, date, location.timezone)?;
        if times.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(KhidmatError::PrayerTimes {
                date,
                reason: "prayer times are not in ascending order".to_string(),
            });
        }
        let slots = std::array::from_fn(|i| PrayerSlot {
            name: PrayerName::ALL[i],
            timestamp: times[i],
        });
        Ok(Self { date, slots })
    }

    /// The first prayer strictly after `now`, wrapping to today's Fajr.
    pub fn next_prayer(&self, now: DateTime<Utc>) -> PrayerSlot {
        self.slots
            .iter()
            .find(|slot| slot.timestamp > now)
            .copied()
            .unwrap_or(self.slots[0])
    }

    /// Rejects settings whose windows would run into the following prayer.
    pub fn check_windows(&self, settings: &PrayerSettings, alarm_secs: u32) -> Result<()> {
        for pair in self.slots.windows(2) {
            let durations = settings.durations_for(pair[0].name, self.date, alarm_secs);
            let salat = windows_for(pair[0].timestamp, &durations)[3];
            if salat.end > pair[1].timestamp {
                return Err(KhidmatError::OverlappingWindows {
                    prayer: pair[0].name,
                    next: pair[1].name,
                });
            }
        }
        Ok(())
    }
}
