//! Prayer settings supplied by the surrounding dashboard.
//!
//! The core never writes these. It reads them on every phase transition, so a
//! refreshed value takes effect at the next transition rather than mid-phase.

use crate::common::PrayerName;
use crate::error::{KhidmatError, Result};
use chrono::{Datelike, NaiveDate, Weekday};
use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The iqamah countdown lengths the dashboard offers, in minutes.
pub const COUNTDOWN_OPTIONS: [u32; 3] = [5, 10, 15];

/// Longest accepted salat, khutbah or jumaah duration: one day.
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;

/// User-facing alarm and duration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrayerSettings {
    /// Minutes from the adhan to the iqamah.
    pub iqamah_countdown_minutes: u32,
    pub adhan_sound_path: String,
    pub iqamah_sound_path: String,
    pub adhan_alarm_enabled: bool,
    pub iqamah_alarm_enabled: bool,
    /// Length of the in-prayer overlay.
    pub salat_duration_minutes: u32,
    /// Friday sermon length; replaces the iqamah countdown for Friday dhuhr.
    pub jumaah_khutbah_minutes: u32,
    /// Friday prayer overlay length.
    pub jumaah_salat_duration_minutes: u32,
}

impl Default for PrayerSettings {
    fn default() -> Self {
        Self {
            iqamah_countdown_minutes: 10,
            adhan_sound_path: "/sounds/adhan-default.mp3".to_string(),
            iqamah_sound_path: "/sounds/iqamah-default.mp3".to_string(),
            adhan_alarm_enabled: true,
            iqamah_alarm_enabled: true,
            salat_duration_minutes: 20,
            jumaah_khutbah_minutes: 30,
            jumaah_salat_duration_minutes: 15,
        }
    }
}

impl PrayerSettings {
    /// Checks every value against the ranges the dashboard accepts.
    pub fn validate(&self) -> Result<()> {
        if !COUNTDOWN_OPTIONS.contains(&self.iqamah_countdown_minutes) {
            return Err(KhidmatError::InvalidSettings(format!(
                "iqamah countdown must be one of {:?} minutes, got {}",
                COUNTDOWN_OPTIONS, self.iqamah_countdown_minutes
            )));
        }
        let durations = [
            ("salat duration", self.salat_duration_minutes),
            ("jumaah khutbah", self.jumaah_khutbah_minutes),
            ("jumaah salat duration", self.jumaah_salat_duration_minutes),
        ];
        for (label, minutes) in durations {
            if minutes < 1 {
                return Err(KhidmatError::InvalidSettings(format!(
                    "{label} must be at least 1 minute"
                )));
            }
            if minutes > MAX_DURATION_MINUTES {
                return Err(KhidmatError::InvalidSettings(format!(
                    "{label} must be at most {MAX_DURATION_MINUTES} minutes, got {minutes}"
                )));
            }
        }
        Ok(())
    }

    /// Resolves the window lengths for one prayer on one date.
    ///
    /// Friday dhuhr is the jumaah prayer: the khutbah takes the place of the
    /// iqamah countdown and the jumaah salat length replaces the regular one.
    pub fn durations_for(
        &self,
        prayer: PrayerName,
        date: NaiveDate,
        alarm_secs: u32,
    ) -> PhaseDurations {
        let is_jumaah = prayer == PrayerName::Dhuhr && date.weekday() == Weekday::Fri;
        let (iqamah_minutes, salat_minutes) = if is_jumaah {
            (self.jumaah_khutbah_minutes, self.jumaah_salat_duration_minutes)
        } else {
            (self.iqamah_countdown_minutes, self.salat_duration_minutes)
        };
        PhaseDurations {
            alarm_secs,
            iqamah_secs: iqamah_minutes.saturating_mul(60),
            salat_secs: salat_minutes.saturating_mul(60),
        }
    }
}

/// Window lengths for a single prayer, in seconds.
///
/// `iqamah_secs` is measured from the adhan itself, so the iqamah countdown
/// window is `iqamah_secs - alarm_secs` long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseDurations {
    pub alarm_secs: u32,
    pub iqamah_secs: u32,
    pub salat_secs: u32,
}

impl PhaseDurations {
    /// Seconds from the adhan until the salat overlay ends.
    pub fn total_secs(&self) -> u32 {
        self.iqamah_secs
            .max(self.alarm_secs)
            .saturating_add(self.alarm_secs)
            .saturating_add(self.salat_secs)
    }
}

/// Something that can hand the engine the latest settings.
///
/// The runtime polls this periodically; implementations should be cheap.
pub trait SettingsSource: Send + Sync {
    fn load(&self) -> Result<PrayerSettings>;
}

/// Reads settings from a TOML file on every refresh.
///
/// The dashboard rewrites the file when an administrator saves the settings
/// form; missing keys fall back to the defaults.
#[derive(Debug, Clone)]
pub struct FileSettingsSource {
    path: PathBuf,
}

impl FileSettingsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsSource for FileSettingsSource {
    fn load(&self) -> Result<PrayerSettings> {
        let settings: PrayerSettings = Config::builder()
            .add_source(File::from(self.path.as_path()).required(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }
}
