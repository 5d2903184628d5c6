//! Contains common, primitive types shared by every part of the scheduler.
//!
//! This module defines the five daily prayers, the four phases a prayer moves
//! through, and the identifiers used for playbacks and simulation runs. Using
//! distinct types keeps the engines from mixing up, say, a simulation run and a
//! playback handle.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Identifies an in-flight sound playback held by an `AlarmDispatcher`.
    ///
    /// Keys are never reused, so a stale handle cannot stop a newer playback.
    pub struct PlaybackId;
}

/// Identifies one simulation run.
///
/// Stage ticks carry the run they were scheduled for; the simulation engine
/// ignores any tick whose run is no longer the active one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(pub u64);

/// One of the five daily prayers, in chronological order.
///
/// On the wire the display names are used (`"Dzuhur"`), but the English names
/// are accepted as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrayerName {
    #[serde(rename = "Subuh", alias = "Fajr")]
    Fajr,
    #[serde(rename = "Dzuhur", alias = "Dhuhr")]
    Dhuhr,
    #[serde(rename = "Ashar", alias = "Asr")]
    Asr,
    #[serde(rename = "Maghrib")]
    Maghrib,
    #[serde(rename = "Isya", alias = "Isha")]
    Isha,
}

impl PrayerName {
    /// All prayers in the order they occur during a day.
    pub const ALL: [PrayerName; 5] = [
        PrayerName::Fajr,
        PrayerName::Dhuhr,
        PrayerName::Asr,
        PrayerName::Maghrib,
        PrayerName::Isha,
    ];

    /// The name shown on the display screen.
    pub fn display_name(self) -> &'static str {
        match self {
            PrayerName::Fajr => "Subuh",
            PrayerName::Dhuhr => "Dzuhur",
            PrayerName::Asr => "Ashar",
            PrayerName::Maghrib => "Maghrib",
            PrayerName::Isha => "Isya",
        }
    }

    /// Lowercase identifier used inside alarm keys.
    pub fn key(self) -> &'static str {
        match self {
            PrayerName::Fajr => "fajr",
            PrayerName::Dhuhr => "dhuhr",
            PrayerName::Asr => "asr",
            PrayerName::Maghrib => "maghrib",
            PrayerName::Isha => "isha",
        }
    }

    /// Parses either the display name or the English name, case-insensitively.
    pub fn parse(input: &str) -> Option<Self> {
        let needle = input.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|prayer| {
            prayer.key() == needle || prayer.display_name().to_ascii_lowercase() == needle
        })
    }
}

impl fmt::Display for PrayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// The four phases every prayer walks through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// The call to prayer is sounding.
    Adhan,
    /// Counting down from the adhan to the iqamah.
    IqamahCountdown,
    /// The iqamah alarm overlay right before the prayer starts.
    PreSalatAlarm,
    /// The prayer itself.
    Salat,
}

impl PhaseKind {
    /// The phase that follows this one, or `None` after `Salat`.
    pub fn next(self) -> Option<Self> {
        match self {
            PhaseKind::Adhan => Some(PhaseKind::IqamahCountdown),
            PhaseKind::IqamahCountdown => Some(PhaseKind::PreSalatAlarm),
            PhaseKind::PreSalatAlarm => Some(PhaseKind::Salat),
            PhaseKind::Salat => None,
        }
    }

    /// Lowercase identifier used inside alarm keys.
    pub fn key(self) -> &'static str {
        match self {
            PhaseKind::Adhan => "adhan",
            PhaseKind::IqamahCountdown => "iqamah",
            PhaseKind::PreSalatAlarm => "pre-salat",
            PhaseKind::Salat => "salat",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
