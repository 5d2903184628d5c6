//! Phase windows derived from a prayer slot and its durations.
//!
//! Windows are never stored. They are recomputed from the slot timestamp
//! whenever the engine needs them, so they always reflect the settings in
//! force at that moment.

use crate::common::PhaseKind;
use crate::prayer::{DaySchedule, PrayerSlot};
use crate::settings::{PhaseDurations, PrayerSettings};
use chrono::{DateTime, Duration, Utc};

/// A half-open interval `[start, end)` during which one phase is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseWindow {
    pub kind: PhaseKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PhaseWindow {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }

    /// Window length in whole seconds.
    pub fn length_secs(&self) -> u32 {
        secs_between(self.start, self.end)
    }

    /// Whole seconds left at `now`, rounded up so a window that contains
    /// `now` always reports at least one.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u32 {
        secs_between(now, self.end)
    }
}

fn secs_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u32 {
    let millis = (to - from).num_milliseconds().max(0);
    u32::try_from((millis + 999) / 1000).unwrap_or(u32::MAX)
}

fn secs(value: u32) -> Duration {
    Duration::seconds(i64::from(value))
}

/// The four contiguous windows of a prayer whose adhan is at `adhan`.
pub fn windows_for(adhan: DateTime<Utc>, durations: &PhaseDurations) -> [PhaseWindow; 4] {
    let adhan_end = adhan + secs(durations.alarm_secs);
    let iqamah_end = (adhan + secs(durations.iqamah_secs)).max(adhan_end);
    let pre_salat_end = iqamah_end + secs(durations.alarm_secs);
    let salat_end = pre_salat_end + secs(durations.salat_secs);
    [
        PhaseWindow {
            kind: PhaseKind::Adhan,
            start: adhan,
            end: adhan_end,
        },
        PhaseWindow {
            kind: PhaseKind::IqamahCountdown,
            start: adhan_end,
            end: iqamah_end,
        },
        PhaseWindow {
            kind: PhaseKind::PreSalatAlarm,
            start: iqamah_end,
            end: pre_salat_end,
        },
        PhaseWindow {
            kind: PhaseKind::Salat,
            start: pre_salat_end,
            end: salat_end,
        },
    ]
}

/// Returns the window that follows `kind` for the given slot, if any.
pub fn window_after(
    slot: &PrayerSlot,
    durations: &PhaseDurations,
    kind: PhaseKind,
) -> Option<PhaseWindow> {
    let next = kind.next()?;
    windows_for(slot.timestamp, durations)
        .into_iter()
        .find(|window| window.kind == next)
}

/// Finds the first slot, in prayer order, with a window containing `now`.
pub fn locate(
    schedule: &DaySchedule,
    settings: &PrayerSettings,
    alarm_secs: u32,
    now: DateTime<Utc>,
) -> Option<(PrayerSlot, PhaseWindow)> {
    schedule.slots.iter().find_map(|slot| {
        let durations = settings.durations_for(slot.name, schedule.date, alarm_secs);
        windows_for(slot.timestamp, &durations)
            .into_iter()
            .find(|window| window.contains(now))
            .map(|window| (*slot, window))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, h, m, s).unwrap()
    }

    fn standard() -> PhaseDurations {
        PhaseDurations {
            alarm_secs: 10,
            iqamah_secs: 600,
            salat_secs: 1200,
        }
    }

    #[test]
    fn boundaries_follow_the_adhan() {
        let [adhan, countdown, pre_salat, salat] = windows_for(at(10, 0, 0), &standard());
        assert_eq!(adhan.end, at(10, 0, 10));
        assert_eq!(countdown.end, at(10, 10, 0));
        assert_eq!(pre_salat.end, at(10, 10, 10));
        assert_eq!(salat.end, at(10, 30, 10));
        assert_eq!(countdown.length_secs(), 590);
    }

    #[test]
    fn remaining_rounds_partial_seconds_up() {
        let [adhan, ..] = windows_for(at(10, 0, 0), &standard());
        let now = at(10, 0, 5) + Duration::milliseconds(300);
        assert_eq!(adhan.remaining_secs(now), 5);
        assert_eq!(adhan.remaining_secs(at(10, 0, 5)), 5);
    }

    #[test]
    fn end_instant_belongs_to_the_next_window() {
        let windows = windows_for(at(10, 0, 0), &standard());
        let owner: Vec<_> = windows
            .iter()
            .filter(|w| w.contains(at(10, 10, 0)))
            .map(|w| w.kind)
            .collect();
        assert_eq!(owner, vec![PhaseKind::PreSalatAlarm]);
    }

    proptest! {
        #[test]
        fn windows_are_contiguous_and_ordered(
            alarm in 1u32..120,
            iqamah_minutes in 1u32..60,
            salat_minutes in 1u32..90,
        ) {
            let durations = PhaseDurations {
                alarm_secs: alarm,
                iqamah_secs: iqamah_minutes * 60,
                salat_secs: salat_minutes * 60,
            };
            let windows = windows_for(at(4, 30, 0), &durations);
            prop_assert_eq!(windows[0].start, at(4, 30, 0));
            for pair in windows.windows(2) {
                prop_assert_eq!(pair[0].end, pair[1].start);
                prop_assert!(pair[0].start <= pair[0].end);
            }
            let span = windows[3].end - windows[0].start;
            prop_assert_eq!(span.num_seconds(), i64::from(durations.total_secs()));
        }
    }
}
