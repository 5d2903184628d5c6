//! Defines all public event types broadcast by the display engine.
//!
//! Listeners subscribe to these streams for logging, dashboards or tests. The
//! render stream (`RenderFrame`) lives in `display` because it is what the
//! screen consumes; these are the side channels.

use crate::alarm::FireOutcome;
use crate::common::{PrayerName, RunId};
use crate::display::DisplayKind;
use chrono::NaiveDate;
use tokio::time::Instant;

/// Events about the engine itself and its inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemEvent {
    /// Fired once when the dispatcher loop begins.
    EngineStarted { timestamp: Instant },
    /// Fired once when the dispatcher loop is about to exit.
    EngineShutdown,
    /// A new day's prayer slots were computed.
    ScheduleComputed { date: NaiveDate },
    /// No schedule can be produced; the display stays idle.
    ConfigurationMissing { reason: String },
    /// Ticks arrived too far apart; the real-time engine resynchronised.
    ClockAnomaly { gap_ms: i64 },
    /// Today's slots are too close together for the configured durations.
    WindowsOverlap { prayer: PrayerName, next: PrayerName },
    /// New settings were accepted.
    SettingsApplied,
    /// New settings were refused; the previous ones stay in force.
    SettingsRejected { reason: String },
    /// A control frame could not be decoded and was dropped.
    ControlRejected { reason: String },
}

/// Events about phases and alarms, from either engine.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseEvent {
    PhaseEntered {
        prayer: PrayerName,
        kind: DisplayKind,
        remaining_secs: u32,
        simulated: bool,
    },
    PhaseCompleted {
        prayer: PrayerName,
        kind: DisplayKind,
        simulated: bool,
    },
    AlarmFired {
        key: String,
        outcome: FireOutcome,
        simulated: bool,
    },
    SimulationStarted { run: RunId, prayer: PrayerName },
    SimulationStopped { run: RunId },
    SimulationCompleted { run: RunId },
}

/// Anything an engine reports back from a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    System(SystemEvent),
    Phase(PhaseEvent),
}

impl From<SystemEvent> for EngineEvent {
    fn from(event: SystemEvent) -> Self {
        EngineEvent::System(event)
    }
}

impl From<PhaseEvent> for EngineEvent {
    fn from(event: PhaseEvent) -> Self {
        EngineEvent::Phase(event)
    }
}
