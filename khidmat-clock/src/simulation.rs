//! Operator-triggered rehearsal of a full prayer cycle.
//!
//! A run walks Preview → Adhan → IqamahCountdown → PreSalatAlarm → Salat on a
//! compressed timeline, one stage tick per second. Each run gets a fresh
//! `RunId` and its own `StageTimer`; ticks carrying any other id are ignored.

use crate::alarm::AlarmDispatcher;
use crate::common::{PrayerName, RunId};
use crate::components::sequence::{StageSequence, StageStep};
use crate::display::{DisplayKind, DisplayPhaseState};
use crate::events::PhaseEvent;
use crate::settings::PrayerSettings;
use crate::time::{StageTick, StageTimer};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

pub const PREVIEW_SECS: u32 = 10;
pub const ADHAN_SECS: u32 = 10;
pub const PRE_SALAT_SECS: u32 = 10;

/// Iqamah and salat durations offered to operators, in seconds.
pub const DURATION_PRESETS: [u32; 3] = [15, 30, 60];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimStage {
    Preview,
    Adhan,
    IqamahCountdown,
    PreSalatAlarm,
    Salat,
}

impl From<SimStage> for DisplayKind {
    fn from(stage: SimStage) -> Self {
        match stage {
            SimStage::Preview => DisplayKind::Preview,
            SimStage::Adhan => DisplayKind::Adhan,
            SimStage::IqamahCountdown => DisplayKind::IqamahCountdown,
            SimStage::PreSalatAlarm => DisplayKind::PreSalatAlarm,
            SimStage::Salat => DisplayKind::Salat,
        }
    }
}

/// Which sounds a run plays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundConfig {
    pub adhan_sound_path: String,
    pub iqamah_sound_path: String,
    pub adhan_alarm_enabled: bool,
    pub iqamah_alarm_enabled: bool,
}

impl From<&PrayerSettings> for SoundConfig {
    fn from(settings: &PrayerSettings) -> Self {
        Self {
            adhan_sound_path: settings.adhan_sound_path.clone(),
            iqamah_sound_path: settings.iqamah_sound_path.clone(),
            adhan_alarm_enabled: settings.adhan_alarm_enabled,
            iqamah_alarm_enabled: settings.iqamah_alarm_enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationRequest {
    pub prayer: PrayerName,
    pub iqamah_duration_secs: u32,
    pub salat_duration_secs: u32,
    pub sounds: SoundConfig,
}

impl SimulationRequest {
    /// Stage plan for this request, in order.
    pub fn stages(&self) -> StageSequence<SimStage> {
        StageSequence::new(vec![
            (SimStage::Preview, PREVIEW_SECS),
            (SimStage::Adhan, ADHAN_SECS),
            (SimStage::IqamahCountdown, self.iqamah_duration_secs),
            (SimStage::PreSalatAlarm, PRE_SALAT_SECS),
            (SimStage::Salat, self.salat_duration_secs),
        ])
    }
}

struct SimRun {
    id: RunId,
    prayer: PrayerName,
    sounds: SoundConfig,
    sequence: StageSequence<SimStage>,
    stage: SimStage,
    remaining: u32,
    total: u32,
    // Dropping the run cancels its timer.
    timer: Option<StageTimer>,
}

pub struct SimulationEngine {
    alarms: AlarmDispatcher,
    ticks: Option<broadcast::Sender<StageTick>>,
    period: Duration,
    next_run: u64,
    run: Option<SimRun>,
}

impl SimulationEngine {
    /// With `ticks` set, every run spawns a `StageTimer` publishing on it.
    /// Without it the caller drives runs through `advance`.
    pub fn new(alarms: AlarmDispatcher, ticks: Option<broadcast::Sender<StageTick>>) -> Self {
        Self {
            alarms,
            ticks,
            period: Duration::from_secs(1),
            next_run: 0,
            run: None,
        }
    }

    /// Starts a new run, stopping any run already in progress.
    pub fn start(&mut self, request: SimulationRequest) -> (RunId, Vec<PhaseEvent>) {
        let mut events = Vec::new();
        if let Some(stopped) = self.stop() {
            events.push(stopped);
        }

        self.next_run += 1;
        let id = RunId(self.next_run);
        let sequence = request.stages();
        let Some((stage, duration)) = sequence.current() else {
            // Unreachable in practice: preview and adhan always have length.
            return (id, events);
        };

        info!(run = id.0, prayer = %request.prayer, "Simulation started");
        let timer = self
            .ticks
            .clone()
            .map(|sender| StageTimer::spawn(id, self.period, sender));
        events.push(PhaseEvent::SimulationStarted {
            run: id,
            prayer: request.prayer,
        });
        events.push(PhaseEvent::PhaseEntered {
            prayer: request.prayer,
            kind: stage.into(),
            remaining_secs: duration,
            simulated: true,
        });
        self.run = Some(SimRun {
            id,
            prayer: request.prayer,
            sounds: request.sounds,
            sequence,
            stage,
            remaining: duration,
            total: duration,
            timer,
        });
        (id, events)
    }

    /// Cancels the current run and silences its sound. No-op when idle.
    pub fn stop(&mut self) -> Option<PhaseEvent> {
        let run = self.run.take()?;
        if let Some(timer) = &run.timer {
            timer.cancel();
        }
        let silenced = self.alarms.stop_all();
        info!(run = run.id.0, silenced, "Simulation stopped");
        Some(PhaseEvent::SimulationStopped { run: run.id })
    }

    /// One simulated second for `run`. Stale runs are ignored.
    pub fn advance(&mut self, run: RunId) -> Vec<PhaseEvent> {
        let mut events = Vec::new();
        let Some(active) = self.run.as_mut() else {
            trace!(run = run.0, "Stage tick with no simulation running");
            return events;
        };
        if active.id != run {
            trace!(run = run.0, current = active.id.0, "Ignoring stale stage tick");
            return events;
        }

        active.remaining = active.remaining.saturating_sub(1);
        if active.remaining > 0 {
            return events;
        }
        events.push(PhaseEvent::PhaseCompleted {
            prayer: active.prayer,
            kind: active.stage.into(),
            simulated: true,
        });

        match active.sequence.advance() {
            StageStep::Next {
                stage,
                duration_secs,
            } => {
                active.stage = stage;
                active.remaining = duration_secs;
                active.total = duration_secs;
                debug!(run = run.0, ?stage, "Simulation stage entered");
                events.push(PhaseEvent::PhaseEntered {
                    prayer: active.prayer,
                    kind: stage.into(),
                    remaining_secs: duration_secs,
                    simulated: true,
                });
                let sound = match stage {
                    SimStage::Adhan if active.sounds.adhan_alarm_enabled => {
                        Some(active.sounds.adhan_sound_path.clone())
                    }
                    SimStage::PreSalatAlarm if active.sounds.iqamah_alarm_enabled => {
                        Some(active.sounds.iqamah_sound_path.clone())
                    }
                    _ => None,
                };
                if let Some(path) = sound {
                    self.alarms.play(&path);
                }
            }
            StageStep::Completed => {
                self.run = None;
                self.alarms.stop_all();
                info!(run = run.0, "Simulation completed");
                events.push(PhaseEvent::SimulationCompleted { run });
            }
        }
        events
    }

    /// The simulated state, or `None` when no run is in progress.
    pub fn state(&self) -> Option<DisplayPhaseState> {
        self.run.as_ref().map(|run| {
            DisplayPhaseState::active(run.stage.into(), run.prayer, run.remaining, run.total, true)
        })
    }

    pub fn current_run(&self) -> Option<RunId> {
        self.run.as_ref().map(|run| run.id)
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::MemoryPlayer;
    use std::sync::Arc;

    fn request(iqamah: u32, salat: u32) -> SimulationRequest {
        SimulationRequest {
            prayer: PrayerName::Maghrib,
            iqamah_duration_secs: iqamah,
            salat_duration_secs: salat,
            sounds: SoundConfig::from(&PrayerSettings::default()),
        }
    }

    fn engine(player: &MemoryPlayer) -> SimulationEngine {
        SimulationEngine::new(AlarmDispatcher::new("sim", Arc::new(player.clone())), None)
    }

    #[test]
    fn full_run_lasts_sixty_seconds_for_fifteen_fifteen() {
        let player = MemoryPlayer::new();
        let mut sim = engine(&player);
        let (run, events) = sim.start(request(15, 15));
        assert!(matches!(events[0], PhaseEvent::SimulationStarted { .. }));
        assert_eq!(sim.state().map(|s| s.kind), Some(DisplayKind::Preview));

        let mut kinds = vec![DisplayKind::Preview];
        let mut seconds = 0;
        while sim.is_running() {
            seconds += 1;
            for event in sim.advance(run) {
                if let PhaseEvent::PhaseEntered { kind, .. } = event {
                    kinds.push(kind);
                }
            }
        }
        assert_eq!(seconds, 60);
        assert_eq!(
            kinds,
            vec![
                DisplayKind::Preview,
                DisplayKind::Adhan,
                DisplayKind::IqamahCountdown,
                DisplayKind::PreSalatAlarm,
                DisplayKind::Salat,
            ]
        );
        assert_eq!(
            player.played(),
            vec!["/sounds/adhan-default.mp3", "/sounds/iqamah-default.mp3"]
        );
        assert_eq!(player.active(), 0);
        assert!(sim.state().is_none());
    }

    #[test]
    fn stop_silences_and_goes_idle() {
        let player = MemoryPlayer::new();
        let mut sim = engine(&player);
        let (run, _) = sim.start(request(15, 15));
        for _ in 0..12 {
            sim.advance(run);
        }
        assert_eq!(sim.state().map(|s| s.kind), Some(DisplayKind::Adhan));
        assert_eq!(player.active(), 1);

        assert_eq!(sim.stop(), Some(PhaseEvent::SimulationStopped { run }));
        assert_eq!(player.active(), 0);
        assert!(sim.state().is_none());
        assert_eq!(sim.stop(), None);
    }

    #[test]
    fn restart_ignores_ticks_from_the_old_run() {
        let player = MemoryPlayer::new();
        let mut sim = engine(&player);
        let (first, _) = sim.start(request(15, 15));
        let (second, events) = sim.start(request(30, 30));
        assert_ne!(first, second);
        assert_eq!(events[0], PhaseEvent::SimulationStopped { run: first });

        for _ in 0..20 {
            assert!(sim.advance(first).is_empty());
        }
        assert_eq!(sim.state().and_then(|s| s.remaining_secs), Some(PREVIEW_SECS));
        sim.advance(second);
        assert_eq!(sim.state().and_then(|s| s.remaining_secs), Some(PREVIEW_SECS - 1));
    }

    #[test]
    fn disabled_sounds_stay_silent() {
        let player = MemoryPlayer::new();
        let mut sim = engine(&player);
        let mut req = request(15, 15);
        req.sounds.adhan_alarm_enabled = false;
        req.sounds.iqamah_alarm_enabled = false;
        let (run, _) = sim.start(req);
        while sim.is_running() {
            sim.advance(run);
        }
        assert!(player.played().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stage_timer_drives_the_run() {
        let (tx, mut rx) = broadcast::channel(64);
        let player = MemoryPlayer::new();
        let mut sim =
            SimulationEngine::new(AlarmDispatcher::new("sim", Arc::new(player.clone())), Some(tx));
        sim.start(request(15, 15));

        for _ in 0..60 {
            let tick = rx.recv().await.unwrap();
            sim.advance(tick.run);
        }
        assert!(!sim.is_running());
        assert_eq!(sim.current_run(), None);
        assert_eq!(player.played().len(), 2);
    }
}
