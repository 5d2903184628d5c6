//! # Khidmat
//!
//! The phase scheduler behind a mosque information display.
//!
//! Khidmat decides what the screen shows around each of the five daily
//! prayers and when the adhan and iqamah alarms sound. It also lets an
//! operator rehearse a whole prayer cycle in about a minute without touching
//! the real schedule.
//!
//! ## Core Concepts
//!
//! - **PhaseEngine**: follows the real clock. Around each prayer it walks
//!   Adhan → IqamahCountdown → PreSalatAlarm → Salat, counting the seconds
//!   itself once a phase has begun.
//! - **SimulationEngine**: an operator-started rehearsal on a compressed
//!   timeline, with its own sound channel and alarm bookkeeping.
//! - **Projection**: a running simulation wins over the real schedule; the
//!   selected state is formatted into a `RenderFrame`.
//! - **DisplayEngine**: the runtime. It ticks once per second, listens on the
//!   control bus and publishes frames and events on broadcast streams.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use khidmat::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = KhidmatConfig::load(None)?;
//!     let provider = FixedTimesProvider::new(config.schedule.times());
//!     let engine = DisplayEngine::new(
//!         config,
//!         Arc::new(SystemWallClock),
//!         Arc::new(provider),
//!         Arc::new(LogPlayer),
//!     );
//!
//!     let mut frames = engine.subscribe_render();
//!     tokio::spawn(async move {
//!         while let Ok(frame) = frames.recv().await {
//!             println!("{} {}", frame.projection.label, frame.projection.clock);
//!         }
//!     });
//!
//!     engine.run().await
//! }
//! ```

pub const ENGINE_NAME: &str = "Khidmat Display";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod alarm;
pub mod common;
pub mod components;
pub mod config;
pub mod control;
pub mod display;
pub mod engine;
pub mod error;
pub mod events;
pub mod phase;
pub mod prayer;
pub mod settings;
pub mod simulation;
pub mod sound;
pub mod time;
pub mod window;

/// A prelude module for easy importing of the most common Khidmat types.
pub mod prelude {
    pub use crate::common::{PhaseKind, PrayerName, RunId};
    pub use crate::config::KhidmatConfig;
    pub use crate::control::{ControlBus, ControlMessage};
    pub use crate::display::{DisplayKind, DisplayPhaseState, Projection, RenderFrame};
    pub use crate::engine::DisplayEngine;
    pub use crate::error::KhidmatError;
    pub use crate::events::{PhaseEvent, SystemEvent};
    pub use crate::prayer::{DaySchedule, FixedTimesProvider, PrayerSlot, PrayerTimeProvider};
    pub use crate::settings::{FileSettingsSource, PrayerSettings, SettingsSource};
    pub use crate::simulation::{SimulationRequest, SoundConfig};
    pub use crate::sound::{CommandPlayer, LogPlayer, SoundPlayer};
    pub use crate::time::{SystemWallClock, WallClock};
}
