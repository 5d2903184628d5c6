use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use khidmat::alarm::FireOutcome;
use khidmat::prelude::*;
use khidmat::sound::MemoryPlayer;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Wall clock that advances with tokio's (paused) clock.
struct PausedClock {
    start: DateTime<Utc>,
    origin: Instant,
}

impl WallClock for PausedClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().duration_since(self.origin);
        self.start + chrono::Duration::from_std(elapsed).unwrap()
    }
}

fn jakarta(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    chrono_tz::Asia::Jakarta
        .with_ymd_and_hms(2026, 10, 19, h, m, s)
        .unwrap()
        .with_timezone(&Utc)
}

fn engine_at(start: DateTime<Utc>, player: &MemoryPlayer) -> DisplayEngine {
    engine_with(start, player, |_| {})
}

fn engine_with(
    start: DateTime<Utc>,
    player: &MemoryPlayer,
    configure: impl FnOnce(&mut KhidmatConfig),
) -> DisplayEngine {
    let mut config = KhidmatConfig::default();
    config.mosque.latitude = Some(-6.2);
    config.mosque.longitude = Some(106.8);
    configure(&mut config);
    let times = [(4, 30), (10, 0), (15, 10), (17, 55), (19, 5)]
        .map(|(h, m)| NaiveTime::from_hms_opt(h, m, 0).unwrap());
    DisplayEngine::new(
        config,
        Arc::new(PausedClock {
            start,
            origin: Instant::now(),
        }),
        Arc::new(FixedTimesProvider::new(times)),
        Arc::new(player.clone()),
    )
}

struct Running {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl Running {
    async fn shutdown(self) {
        self.stop.send(()).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

/// Starts the engine and waits until its dispatcher is listening.
async fn start(engine: &DisplayEngine) -> Running {
    let mut system_rx = engine.subscribe_system_events();
    let (stop, stop_rx) = oneshot::channel::<()>();
    let runner = engine.clone();
    let handle = tokio::spawn(async move {
        runner
            .run_until(async {
                stop_rx.await.ok();
                Ok::<(), anyhow::Error>(())
            })
            .await
    });
    loop {
        if let SystemEvent::EngineStarted { .. } = system_rx.recv().await.unwrap() {
            break;
        }
    }
    Running { stop, handle }
}

async fn wait_for<T: Clone, F: Fn(&T) -> bool>(rx: &mut broadcast::Receiver<T>, pred: F) -> T {
    loop {
        let event = rx.recv().await.unwrap();
        if pred(&event) {
            return event;
        }
    }
}

/// Settings an administrator can change while the engine runs.
#[derive(Clone, Default)]
struct SharedSettings(Arc<Mutex<PrayerSettings>>);

impl SharedSettings {
    fn set(&self, settings: PrayerSettings) {
        *self.0.lock().unwrap() = settings;
    }
}

impl SettingsSource for SharedSettings {
    fn load(&self) -> khidmat::error::Result<PrayerSettings> {
        Ok(self.0.lock().unwrap().clone())
    }
}

fn request(prayer: PrayerName) -> SimulationRequest {
    SimulationRequest {
        prayer,
        iqamah_duration_secs: 15,
        salat_duration_secs: 15,
        sounds: SoundConfig::from(&PrayerSettings::default()),
    }
}

#[tokio::test(start_paused = true)]
async fn simulation_runs_to_completion_over_the_bus() {
    let player = MemoryPlayer::new();
    let engine = engine_at(jakarta(3, 0, 0), &player);
    let mut phase_rx = engine.subscribe_phase_events();
    let mut frames = engine.subscribe_render();
    let running = start(&engine).await;

    let started = Instant::now();
    engine.start_simulation(&request(PrayerName::Isha)).unwrap();

    let mut entered = Vec::new();
    loop {
        match phase_rx.recv().await.unwrap() {
            PhaseEvent::PhaseEntered {
                kind,
                simulated: true,
                ..
            } => entered.push(kind),
            PhaseEvent::SimulationCompleted { .. } => break,
            _ => {}
        }
    }
    assert_eq!(
        entered,
        vec![
            DisplayKind::Preview,
            DisplayKind::Adhan,
            DisplayKind::IqamahCountdown,
            DisplayKind::PreSalatAlarm,
            DisplayKind::Salat,
        ]
    );
    assert_eq!(started.elapsed().as_secs(), 60);

    let simulated = wait_for(&mut frames, |frame: &RenderFrame| frame.state.is_simulated).await;
    assert_eq!(simulated.state.prayer, Some(PrayerName::Isha));
    assert!(engine.snapshot().await.state.is_idle());
    assert_eq!(player.played().len(), 2);

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stop_silences_the_simulation_immediately() {
    let player = MemoryPlayer::new();
    let engine = engine_at(jakarta(3, 0, 0), &player);
    let mut phase_rx = engine.subscribe_phase_events();
    let running = start(&engine).await;

    engine.start_simulation(&request(PrayerName::Fajr)).unwrap();
    wait_for(&mut phase_rx, |event: &PhaseEvent| {
        matches!(
            event,
            PhaseEvent::PhaseEntered {
                kind: DisplayKind::Adhan,
                ..
            }
        )
    })
    .await;
    assert_eq!(player.active(), 1);

    engine.stop_simulation().unwrap();
    wait_for(&mut phase_rx, |event: &PhaseEvent| {
        matches!(event, PhaseEvent::SimulationStopped { .. })
    })
    .await;
    assert_eq!(player.active(), 0);
    assert!(engine.snapshot().await.state.is_idle());

    // A stop while idle changes nothing.
    engine.stop_simulation().unwrap();
    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
    assert!(engine.snapshot().await.state.is_idle());

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn real_schedule_fires_the_adhan_once() {
    let player = MemoryPlayer::new();
    let engine = engine_at(jakarta(9, 59, 55), &player);
    let mut phase_rx = engine.subscribe_phase_events();
    let running = start(&engine).await;

    let fired = wait_for(&mut phase_rx, |event: &PhaseEvent| {
        matches!(event, PhaseEvent::AlarmFired { .. })
    })
    .await;
    assert_eq!(
        fired,
        PhaseEvent::AlarmFired {
            key: "adhan-dhuhr-2026-10-19".to_string(),
            outcome: FireOutcome::Played,
            simulated: false,
        }
    );

    wait_for(&mut phase_rx, |event: &PhaseEvent| {
        matches!(
            event,
            PhaseEvent::PhaseEntered {
                kind: DisplayKind::IqamahCountdown,
                ..
            }
        )
    })
    .await;
    let frame = engine.snapshot().await;
    assert_eq!(frame.state.kind, DisplayKind::IqamahCountdown);
    assert_eq!(frame.state.prayer, Some(PrayerName::Dhuhr));
    assert!(!frame.state.is_simulated);
    assert_eq!(player.played(), vec!["/sounds/adhan-default.mp3"]);

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn simulation_overrides_and_then_yields_to_the_real_phase() {
    let player = MemoryPlayer::new();
    let engine = engine_at(jakarta(10, 1, 0), &player);
    let mut phase_rx = engine.subscribe_phase_events();
    let running = start(&engine).await;

    wait_for(&mut phase_rx, |event: &PhaseEvent| {
        matches!(event, PhaseEvent::PhaseEntered { simulated: false, .. })
    })
    .await;
    engine.start_simulation(&request(PrayerName::Asr)).unwrap();
    wait_for(&mut phase_rx, |event: &PhaseEvent| {
        matches!(event, PhaseEvent::SimulationStarted { .. })
    })
    .await;
    let frame = engine.snapshot().await;
    assert!(frame.state.is_simulated);
    assert_eq!(frame.state.kind, DisplayKind::Preview);

    engine.stop_simulation().unwrap();
    wait_for(&mut phase_rx, |event: &PhaseEvent| {
        matches!(event, PhaseEvent::SimulationStopped { .. })
    })
    .await;
    let frame = engine.snapshot().await;
    assert!(!frame.state.is_simulated);
    assert_eq!(frame.state.kind, DisplayKind::IqamahCountdown);

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_reported_and_dropped() {
    let engine = engine_at(jakarta(3, 0, 0), &MemoryPlayer::new());
    let mut system_rx = engine.subscribe_system_events();
    let running = start(&engine).await;

    engine
        .control()
        .publish_raw(r#"{"type":"START_SIM","prayer":"Maghrib"}"#.to_string());
    wait_for(&mut system_rx, |event: &SystemEvent| {
        matches!(event, SystemEvent::ControlRejected { .. })
    })
    .await;
    assert!(engine.snapshot().await.state.is_idle());

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn settings_are_validated_before_they_apply() {
    let engine = engine_at(jakarta(3, 0, 0), &MemoryPlayer::new());
    let mut system_rx = engine.subscribe_system_events();
    let running = start(&engine).await;
    wait_for(&mut system_rx, |event: &SystemEvent| {
        matches!(event, SystemEvent::ScheduleComputed { .. })
    })
    .await;

    let invalid = PrayerSettings {
        iqamah_countdown_minutes: 7,
        ..Default::default()
    };
    assert!(matches!(
        engine.apply_settings(invalid).await,
        Err(KhidmatError::InvalidSettings(_))
    ));

    // Asr at 15:10 plus a three-hour salat runs into Maghrib.
    let overlapping = PrayerSettings {
        salat_duration_minutes: 180,
        ..Default::default()
    };
    assert!(matches!(
        engine.apply_settings(overlapping).await,
        Err(KhidmatError::OverlappingWindows { .. })
    ));
    assert_eq!(engine.settings().await, PrayerSettings::default());

    let shorter = PrayerSettings {
        salat_duration_minutes: 10,
        ..Default::default()
    };
    engine.apply_settings(shorter.clone()).await.unwrap();
    assert_eq!(engine.settings().await, shorter);

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn real_alarm_keeps_sounding_when_a_simulation_stops() {
    let player = MemoryPlayer::new();
    let engine = engine_at(jakarta(9, 59, 55), &player);
    let mut phase_rx = engine.subscribe_phase_events();
    let running = start(&engine).await;

    engine.start_simulation(&request(PrayerName::Fajr)).unwrap();
    let fired = wait_for(&mut phase_rx, |event: &PhaseEvent| {
        matches!(event, PhaseEvent::AlarmFired { .. })
    })
    .await;
    assert_eq!(
        fired,
        PhaseEvent::AlarmFired {
            key: "adhan-dhuhr-2026-10-19".to_string(),
            outcome: FireOutcome::Played,
            simulated: false,
        }
    );

    wait_for(&mut phase_rx, |event: &PhaseEvent| {
        matches!(
            event,
            PhaseEvent::PhaseEntered {
                kind: DisplayKind::Adhan,
                simulated: true,
                ..
            }
        )
    })
    .await;
    assert_eq!(player.active(), 2);

    engine.stop_simulation().unwrap();
    wait_for(&mut phase_rx, |event: &PhaseEvent| {
        matches!(event, PhaseEvent::SimulationStopped { .. })
    })
    .await;
    assert_eq!(player.active(), 1);
    let frame = engine.snapshot().await;
    assert!(!frame.state.is_simulated);
    assert_eq!(frame.state.kind, DisplayKind::Adhan);
    assert_eq!(frame.state.prayer, Some(PrayerName::Dhuhr));

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn second_start_replaces_the_running_simulation() {
    let player = MemoryPlayer::new();
    let engine = engine_at(jakarta(3, 0, 0), &player);
    let mut phase_rx = engine.subscribe_phase_events();
    let running = start(&engine).await;

    engine.start_simulation(&request(PrayerName::Fajr)).unwrap();
    let PhaseEvent::SimulationStarted { run: first, .. } =
        wait_for(&mut phase_rx, |event: &PhaseEvent| {
            matches!(event, PhaseEvent::SimulationStarted { .. })
        })
        .await
    else {
        unreachable!()
    };
    wait_for(&mut phase_rx, |event: &PhaseEvent| {
        matches!(
            event,
            PhaseEvent::PhaseEntered {
                kind: DisplayKind::Adhan,
                simulated: true,
                ..
            }
        )
    })
    .await;

    let mut frames = engine.subscribe_render();
    let frame = ControlMessage::start(&request(PrayerName::Isha))
        .encode()
        .unwrap();
    assert!(engine.control().publish_raw(frame));

    let mut stopped = Vec::new();
    let mut completed = Vec::new();
    let mut countdowns = 0;
    loop {
        match phase_rx.recv().await.unwrap() {
            PhaseEvent::SimulationStopped { run } => stopped.push(run),
            PhaseEvent::PhaseEntered {
                kind: DisplayKind::IqamahCountdown,
                prayer,
                simulated: true,
                ..
            } => {
                assert_eq!(prayer, PrayerName::Isha);
                countdowns += 1;
            }
            PhaseEvent::SimulationCompleted { run } => {
                completed.push(run);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(stopped, vec![first]);
    assert_eq!(countdowns, 1);
    assert_ne!(completed[0], first);

    // The replaced run's timer is gone: nothing else completes.
    tokio::time::sleep(Duration::from_secs(120)).await;
    while let Ok(event) = phase_rx.try_recv() {
        assert!(!matches!(event, PhaseEvent::SimulationCompleted { .. }));
    }
    while let Ok(frame) = frames.try_recv() {
        if frame.state.is_simulated {
            assert_eq!(frame.state.prayer, Some(PrayerName::Isha));
        }
    }
    assert!(engine.snapshot().await.state.is_idle());

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refreshed_settings_apply_at_the_next_transition() {
    let player = MemoryPlayer::new();
    let source = SharedSettings::default();
    let engine = engine_with(jakarta(9, 59, 55), &player, |config| {
        config.engine.settings_refresh_secs = 5;
    })
    .with_settings_source(Arc::new(source.clone()));
    let mut phase_rx = engine.subscribe_phase_events();
    let mut system_rx = engine.subscribe_system_events();
    let running = start(&engine).await;

    wait_for(&mut phase_rx, |event: &PhaseEvent| {
        matches!(
            event,
            PhaseEvent::PhaseEntered {
                kind: DisplayKind::Adhan,
                simulated: false,
                ..
            }
        )
    })
    .await;
    let updated = PrayerSettings {
        iqamah_countdown_minutes: 15,
        salat_duration_minutes: 10,
        ..Default::default()
    };
    source.set(updated.clone());

    wait_for(&mut system_rx, |event: &SystemEvent| {
        matches!(event, SystemEvent::SettingsApplied)
    })
    .await;
    assert_eq!(engine.settings().await, updated);

    let entered = wait_for(&mut phase_rx, |event: &PhaseEvent| {
        matches!(
            event,
            PhaseEvent::PhaseEntered {
                kind: DisplayKind::IqamahCountdown,
                ..
            }
        )
    })
    .await;
    assert_eq!(
        entered,
        PhaseEvent::PhaseEntered {
            prayer: PrayerName::Dhuhr,
            kind: DisplayKind::IqamahCountdown,
            remaining_secs: 15 * 60 - 10,
            simulated: false,
        }
    );

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn oversized_durations_do_not_stop_the_display() {
    let engine = engine_with(jakarta(10, 1, 0), &MemoryPlayer::new(), |config| {
        config.settings.salat_duration_minutes = 100_000_000;
    });
    let mut frames = engine.subscribe_render();
    let running = start(&engine).await;

    for _ in 0..3 {
        let frame = tokio::time::timeout(Duration::from_secs(10), frames.recv()).await;
        assert!(matches!(frame, Ok(Ok(_))));
    }

    running.shutdown().await;
}
