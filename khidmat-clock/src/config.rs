//! Defines all configuration structures for the Khidmat display.
//!
//! These structs are deserialized with `serde` and loaded through the `config`
//! crate: an optional TOML file first, then `KHIDMAT__SECTION__KEY` environment
//! overrides. Every section has defaults, so an empty file is a valid (if
//! coordinate-less) configuration.

use crate::error::{KhidmatError, Result};
use crate::prayer::{Coordinates, Location};
use crate::settings::PrayerSettings;
use chrono::NaiveTime;
use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// The top-level configuration for the `DisplayEngine`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KhidmatConfig {
    #[serde(default)]
    pub mosque: MosqueConfig,

    /// Local prayer times for the fixed-time provider.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Initial prayer settings, used until a settings source says otherwise.
    #[serde(default)]
    pub settings: PrayerSettings,

    #[serde(default)]
    pub engine: EngineTuning,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub audio: AudioConfig,
}

/// Where the mosque is. Without coordinates no schedule is computed.
#[derive(Debug, Clone, Deserialize)]
pub struct MosqueConfig {
    #[serde(default = "default_mosque_name")]
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// IANA timezone name, e.g. "Asia/Jakarta".
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
}

impl MosqueConfig {
    /// The mosque location, or `None` while coordinates are unset.
    pub fn location(&self) -> Option<Location> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Location {
                coordinates: Coordinates {
                    latitude,
                    longitude,
                },
                timezone: self.timezone,
            }),
            _ => None,
        }
    }
}

impl Default for MosqueConfig {
    fn default() -> Self {
        Self {
            name: default_mosque_name(),
            latitude: None,
            longitude: None,
            timezone: default_timezone(),
        }
    }
}

/// Local wall-clock prayer times, `HH:MM` or `HH:MM:SS`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(deserialize_with = "de_time_of_day")]
    pub fajr: NaiveTime,
    #[serde(deserialize_with = "de_time_of_day")]
    pub dhuhr: NaiveTime,
    #[serde(deserialize_with = "de_time_of_day")]
    pub asr: NaiveTime,
    #[serde(deserialize_with = "de_time_of_day")]
    pub maghrib: NaiveTime,
    #[serde(deserialize_with = "de_time_of_day")]
    pub isha: NaiveTime,
}

impl ScheduleConfig {
    /// The five times in prayer order.
    pub fn times(&self) -> [NaiveTime; 5] {
        [self.fajr, self.dhuhr, self.asr, self.maghrib, self.isha]
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        let at = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN);
        Self {
            fajr: at(4, 30),
            dhuhr: at(11, 50),
            asr: at(15, 10),
            maghrib: at(17, 55),
            isha: at(19, 5),
        }
    }
}

/// Engine timing knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineTuning {
    /// Length of the adhan and pre-salat alarm overlays.
    pub alarm_overlay_secs: u32,
    /// A gap between ticks larger than this forces a resync from wall clock.
    pub resync_gap_secs: u32,
    /// How often stale alarm keys are purged.
    pub gc_interval_secs: u64,
    /// How often the settings source is polled.
    pub settings_refresh_secs: u64,
    /// Settings file re-read on every refresh. Unset means the `[settings]`
    /// table stays in force.
    pub settings_file: Option<PathBuf>,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            alarm_overlay_secs: 10,
            resync_gap_secs: 3,
            gc_interval_secs: 60,
            settings_refresh_secs: 300,
            settings_file: None,
        }
    }
}

/// The simulation control channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Logical channel name, used to label the control bus.
    pub channel: String,
    /// Bind address for receiving control frames from another process.
    pub udp_bind: Option<SocketAddr>,
    /// Where to mirror display state frames, if anywhere.
    pub state_peer: Option<SocketAddr>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            channel: "khidmat-display-sim".to_string(),
            udp_bind: None,
            state_peer: None,
        }
    }
}

/// Sound output.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AudioConfig {
    /// External player command, e.g. `"mpv --no-video"`. The sound path is
    /// appended as the last argument. When unset, playback is only logged.
    pub command: Option<String>,
}

impl KhidmatConfig {
    /// Loads the configuration from an optional TOML file plus environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("KHIDMAT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks settings ranges and engine timing sanity.
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        if self.engine.alarm_overlay_secs == 0 {
            return Err(KhidmatError::InvalidSettings(
                "alarm overlay must last at least one second".to_string(),
            ));
        }
        if self.engine.resync_gap_secs < 2 {
            return Err(KhidmatError::InvalidSettings(
                "resync gap must be at least two seconds".to_string(),
            ));
        }
        Ok(())
    }
}

// --- Default value functions for serde ---

fn default_mosque_name() -> String {
    "Masjid".to_string()
}

fn default_timezone() -> Tz {
    chrono_tz::Asia::Jakarta
}

fn de_time_of_day<'de, D>(deserializer: D) -> std::result::Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    NaiveTime::parse_from_str(&raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M"))
        .map_err(serde::de::Error::custom)
}
