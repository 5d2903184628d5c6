//! The real-time phase engine.
//!
//! While idle, every tick looks for a prayer window containing the current
//! instant. Once a phase is entered the engine stops consulting the wall clock
//! and drives the phase with its own countdown, one second per tick, walking
//! Adhan → IqamahCountdown → PreSalatAlarm → Salat → Idle. This keeps brief
//! clock jitter from skipping or repeating a transition.
//!
//! The countdown is only abandoned when ticks arrive further apart than the
//! resync gap (or time runs backwards). The engine then re-derives the phase
//! from the wall clock on that same tick.

use crate::alarm::{AlarmDispatcher, AlarmFireKey, FireOutcome};
use crate::common::{PhaseKind, PrayerName};
use crate::components::watcher::DateWatcher;
use crate::config::EngineTuning;
use crate::display::DisplayPhaseState;
use crate::error::KhidmatError;
use crate::events::{EngineEvent, PhaseEvent, SystemEvent};
use crate::prayer::{DaySchedule, Location, PrayerSlot, PrayerTimeProvider};
use crate::settings::PrayerSettings;
use crate::window::{locate, window_after};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// A phase the engine is currently counting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActivePhase {
    slot: PrayerSlot,
    /// The schedule date the slot belongs to; alarm keys use this date.
    date: NaiveDate,
    kind: PhaseKind,
    remaining: u32,
    total: u32,
}

/// Owns the authoritative "what phase is it really" state.
pub struct PhaseEngine {
    location: Option<Location>,
    provider: Arc<dyn PrayerTimeProvider>,
    alarm_secs: u32,
    resync_gap: Duration,
    dates: DateWatcher,
    schedule: Option<DaySchedule>,
    active: Option<ActivePhase>,
    last_tick: Option<DateTime<Utc>>,
    missing_reported: bool,
    alarms: AlarmDispatcher,
    state: DisplayPhaseState,
}

impl PhaseEngine {
    pub fn new(
        location: Option<Location>,
        provider: Arc<dyn PrayerTimeProvider>,
        tuning: &EngineTuning,
        alarms: AlarmDispatcher,
    ) -> Self {
        let timezone = location.map_or(chrono_tz::UTC, |l| l.timezone);
        Self {
            location,
            provider,
            alarm_secs: tuning.alarm_overlay_secs,
            resync_gap: Duration::seconds(i64::from(tuning.resync_gap_secs)),
            dates: DateWatcher::new(timezone),
            schedule: None,
            active: None,
            last_tick: None,
            missing_reported: false,
            alarms,
            state: DisplayPhaseState::idle(),
        }
    }

    /// Advances the engine to `now`. Called once per wall-clock tick.
    pub fn tick(&mut self, now: DateTime<Utc>, settings: &PrayerSettings) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        self.check_clock(now, &mut events);
        self.refresh_schedule(now, settings, &mut events);

        if let Some(active) = self.active.take() {
            self.active = self.count_down(active, settings, &mut events);
        }
        if self.active.is_none() {
            self.enter_from_wall_clock(now, settings, &mut events);
        }

        self.state = match &self.active {
            Some(active) => DisplayPhaseState::active(
                active.kind.into(),
                active.slot.name,
                active.remaining,
                active.total,
                false,
            ),
            None => DisplayPhaseState::idle(),
        };
        trace!(state = ?self.state.kind, "Phase engine ticked");
        events
    }

    pub fn state(&self) -> &DisplayPhaseState {
        &self.state
    }

    pub fn schedule(&self) -> Option<&DaySchedule> {
        self.schedule.as_ref()
    }

    /// The mosque-local date at `now`.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        self.dates.local_date(now)
    }

    /// Forgets alarm keys from previous days.
    pub fn purge_stale_alarms(&mut self, now: DateTime<Utc>) -> usize {
        let today = self.local_date(now);
        self.alarms.purge_stale(today)
    }

    pub fn alarms(&self) -> &AlarmDispatcher {
        &self.alarms
    }

    fn check_clock(&mut self, now: DateTime<Utc>, events: &mut Vec<EngineEvent>) {
        if let Some(last) = self.last_tick {
            let gap = now - last;
            if gap < Duration::zero() || gap > self.resync_gap {
                let gap_ms = gap.num_milliseconds();
                let anomaly = KhidmatError::ClockAnomaly { gap_ms };
                warn!(error = %anomaly, "Resynchronising from wall clock");
                events.push(SystemEvent::ClockAnomaly { gap_ms }.into());
                if let Some(dropped) = self.active.take() {
                    debug!(
                        prayer = %dropped.slot.name,
                        kind = %dropped.kind,
                        "Dropped in-flight countdown"
                    );
                }
            }
        }
        self.last_tick = Some(now);
    }

    fn refresh_schedule(
        &mut self,
        now: DateTime<Utc>,
        settings: &PrayerSettings,
        events: &mut Vec<EngineEvent>,
    ) {
        let Some(location) = self.location else {
            if !self.missing_reported {
                let missing = KhidmatError::ConfigurationMissing;
                warn!(error = %missing, "Display stays idle");
                events.push(
                    SystemEvent::ConfigurationMissing {
                        reason: missing.to_string(),
                    }
                    .into(),
                );
                self.missing_reported = true;
            }
            return;
        };
        let Some(date) = self.dates.process_tick(now) else {
            return;
        };
        match DaySchedule::compute(self.provider.as_ref(), &location, date) {
            Ok(schedule) => {
                info!(%date, "Computed prayer schedule");
                if let Err(e) = schedule.check_windows(settings, self.alarm_secs) {
                    error!(error = %e, "Configured durations overlap today's prayers");
                    if let KhidmatError::OverlappingWindows { prayer, next } = e {
                        events.push(SystemEvent::WindowsOverlap { prayer, next }.into());
                    }
                }
                events.push(SystemEvent::ScheduleComputed { date }.into());
                self.schedule = Some(schedule);
            }
            Err(e) => {
                warn!(error = %e, "Prayer times unavailable; display stays idle");
                events.push(
                    SystemEvent::ConfigurationMissing {
                        reason: e.to_string(),
                    }
                    .into(),
                );
                self.schedule = None;
            }
        }
    }

    /// One second passes inside an active phase.
    fn count_down(
        &mut self,
        mut active: ActivePhase,
        settings: &PrayerSettings,
        events: &mut Vec<EngineEvent>,
    ) -> Option<ActivePhase> {
        active.remaining = active.remaining.saturating_sub(1);
        if active.remaining > 0 {
            return Some(active);
        }

        events.push(
            PhaseEvent::PhaseCompleted {
                prayer: active.slot.name,
                kind: active.kind.into(),
                simulated: false,
            }
            .into(),
        );

        // Settings changes take effect here, at the transition.
        let durations = settings.durations_for(active.slot.name, active.date, self.alarm_secs);
        let mut kind = active.kind;
        while let Some(window) = window_after(&active.slot, &durations, kind) {
            kind = window.kind;
            let length = window.length_secs();
            if length == 0 {
                continue;
            }
            let next = ActivePhase {
                kind,
                remaining: length,
                total: length,
                ..active
            };
            self.on_enter(&next, settings, events);
            return Some(next);
        }

        debug!(prayer = %active.slot.name, "Prayer cycle finished");
        None
    }

    fn enter_from_wall_clock(
        &mut self,
        now: DateTime<Utc>,
        settings: &PrayerSettings,
        events: &mut Vec<EngineEvent>,
    ) {
        let Some(schedule) = &self.schedule else {
            return;
        };
        let Some((slot, window)) = locate(schedule, settings, self.alarm_secs, now) else {
            return;
        };
        let active = ActivePhase {
            slot,
            date: schedule.date,
            kind: window.kind,
            remaining: window.remaining_secs(now),
            total: window.length_secs(),
        };
        self.on_enter(&active, settings, events);
        self.active = Some(active);
    }

    fn on_enter(
        &mut self,
        active: &ActivePhase,
        settings: &PrayerSettings,
        events: &mut Vec<EngineEvent>,
    ) {
        info!(
            prayer = %active.slot.name,
            kind = %active.kind,
            remaining = active.remaining,
            "Entered phase"
        );
        events.push(
            PhaseEvent::PhaseEntered {
                prayer: active.slot.name,
                kind: active.kind.into(),
                remaining_secs: active.remaining,
                simulated: false,
            }
            .into(),
        );
        if let Some(event) = self.fire_alarm(active.kind, active.slot.name, active.date, settings) {
            events.push(event.into());
        }
    }

    fn fire_alarm(
        &mut self,
        kind: PhaseKind,
        prayer: PrayerName,
        date: NaiveDate,
        settings: &PrayerSettings,
    ) -> Option<PhaseEvent> {
        let (enabled, path) = match kind {
            PhaseKind::Adhan => (settings.adhan_alarm_enabled, &settings.adhan_sound_path),
            PhaseKind::PreSalatAlarm => {
                (settings.iqamah_alarm_enabled, &settings.iqamah_sound_path)
            }
            PhaseKind::IqamahCountdown | PhaseKind::Salat => return None,
        };
        if !enabled {
            debug!(%prayer, %kind, "Alarm disabled in settings");
            return None;
        }
        let key = AlarmFireKey { kind, prayer, date };
        match self.alarms.fire(path, &key) {
            FireOutcome::Suppressed => None,
            outcome => Some(PhaseEvent::AlarmFired {
                key: key.to_string(),
                outcome,
                simulated: false,
            }),
        }
    }
}
