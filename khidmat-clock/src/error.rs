//! Error taxonomy for the scheduler core.
//!
//! None of these errors terminate the display. Engines log them, degrade to
//! `Idle` or skip the alarm, and keep ticking.

use crate::common::PrayerName;
use chrono::NaiveDate;
use thiserror::Error;

/// Errors surfaced by the scheduler core.
#[derive(Debug, Error)]
pub enum KhidmatError {
    /// Coordinates or timezone are not configured, so no schedule can exist.
    #[error("mosque coordinates are not configured")]
    ConfigurationMissing,

    /// The prayer-time provider could not produce a schedule for a date.
    #[error("prayer times unavailable for {date}: {reason}")]
    PrayerTimes { date: NaiveDate, reason: String },

    /// The sound backend refused or failed to play a file.
    #[error("failed to play sound '{path}': {reason}")]
    SoundPlaybackFailed { path: String, reason: String },

    /// A control frame could not be decoded.
    #[error("malformed control message: {0}")]
    MalformedControlMessage(String),

    /// Consecutive ticks were too far apart, or time went backwards.
    #[error("clock jumped by {gap_ms} ms between ticks")]
    ClockAnomaly { gap_ms: i64 },

    /// Settings values are outside their accepted ranges.
    #[error("invalid prayer settings: {0}")]
    InvalidSettings(String),

    /// The configured durations make one prayer's windows run into the next.
    #[error("{prayer} windows end after {next} begins")]
    OverlappingWindows { prayer: PrayerName, next: PrayerName },

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KhidmatError>;
