//! The runtime that wires clocks, engines, control and output together.

use crate::alarm::AlarmDispatcher;
use crate::components::watcher::IntervalWatcher;
use crate::config::KhidmatConfig;
use crate::control::{mirror_frames, ControlBus, ControlMessage, UdpControlListener};
use crate::display::{select, RenderFrame};
use crate::error::Result;
use crate::events::{EngineEvent, PhaseEvent, SystemEvent};
use crate::phase::PhaseEngine;
use crate::prayer::{DaySchedule, PrayerSlot, PrayerTimeProvider};
use crate::settings::{PrayerSettings, SettingsSource};
use crate::simulation::{SimulationEngine, SimulationRequest};
use crate::sound::SoundPlayer;
use crate::time::{StageTick, SystemClock, TickEvent, WallClock};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, trace, warn};

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// The display engine.
///
/// A cheap, cloneable handle. The dispatcher loop started by `run` owns all
/// mutation; other clones read state and publish control frames.
#[derive(Clone)]
pub struct DisplayEngine {
    config: Arc<KhidmatConfig>,
    clock: Arc<dyn WallClock>,
    settings_source: Option<Arc<dyn SettingsSource>>,
    settings: Arc<RwLock<PrayerSettings>>,
    real: Arc<RwLock<PhaseEngine>>,
    simulation: Arc<RwLock<SimulationEngine>>,
    control: ControlBus,
    tick_sender: broadcast::Sender<Arc<TickEvent>>,
    stage_sender: broadcast::Sender<StageTick>,
    render_sender: broadcast::Sender<RenderFrame>,
    system_event_sender: broadcast::Sender<SystemEvent>,
    phase_event_sender: broadcast::Sender<PhaseEvent>,
}

impl DisplayEngine {
    pub fn new(
        config: KhidmatConfig,
        clock: Arc<dyn WallClock>,
        provider: Arc<dyn PrayerTimeProvider>,
        player: Arc<dyn SoundPlayer>,
    ) -> Self {
        const CHANNEL_CAPACITY: usize = 256;
        let (tick_sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (stage_sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (render_sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (system_event_sender, _) = broadcast::channel(64);
        let (phase_event_sender, _) = broadcast::channel(64);

        let real = PhaseEngine::new(
            config.mosque.location(),
            provider,
            &config.engine,
            AlarmDispatcher::new("real", player.clone()),
        );
        let simulation = SimulationEngine::new(
            AlarmDispatcher::new("simulation", player),
            Some(stage_sender.clone()),
        );

        Self {
            control: ControlBus::new(&config.control.channel),
            settings: Arc::new(RwLock::new(config.settings.clone())),
            config: Arc::new(config),
            clock,
            settings_source: None,
            real: Arc::new(RwLock::new(real)),
            simulation: Arc::new(RwLock::new(simulation)),
            tick_sender,
            stage_sender,
            render_sender,
            system_event_sender,
            phase_event_sender,
        }
    }

    /// Polls `source` for settings every `settings_refresh_secs`.
    pub fn with_settings_source(mut self, source: Arc<dyn SettingsSource>) -> Self {
        self.settings_source = Some(source);
        self
    }

    /// Runs until Ctrl+C.
    pub async fn run(&self) -> anyhow::Result<()> {
        self.run_until(async {
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received.");
            Ok::<(), anyhow::Error>(())
        })
        .await
    }

    /// Runs until `shutdown` resolves, then stops every task it started.
    pub async fn run_until<F>(&self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        info!(mosque = %self.config.mosque.name, "DisplayEngine starting up...");
        let (shutdown_tx, _) = broadcast::channel(1);

        self.refresh_settings().await;

        let clock = SystemClock::new(TICK_PERIOD, self.tick_sender.clone());
        let clock_shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { clock.run(clock_shutdown_rx).await });

        if let Some(bind) = self.config.control.udp_bind {
            let listener = UdpControlListener::bind(bind).await?;
            tokio::spawn(listener.run(self.control.clone(), shutdown_tx.subscribe()));
        }
        if let Some(peer) = self.config.control.state_peer {
            let frames = self.render_sender.subscribe();
            let mirror_shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                if let Err(e) = mirror_frames(peer, frames, mirror_shutdown_rx).await {
                    warn!(error = %e, "State mirror stopped");
                }
            });
        }

        let dispatcher = self.clone();
        let dispatcher_shutdown_rx = shutdown_tx.subscribe();
        let dispatcher_handle =
            tokio::spawn(async move { dispatcher.dispatcher_loop(dispatcher_shutdown_rx).await });

        info!("Engine running. Press Ctrl+C to shut down.");
        let outcome = shutdown.await;

        info!("Broadcasting shutdown to all tasks...");
        if shutdown_tx.send(()).is_err() {
            error!("Failed to send shutdown signal. Some tasks may not terminate gracefully.");
        }
        if let Err(e) = dispatcher_handle.await {
            error!(error = %e, "Dispatcher task ended abnormally");
        }
        self.simulation.write().await.stop();
        self.system_event_sender
            .send(SystemEvent::EngineShutdown)
            .ok();
        info!("DisplayEngine has shut down.");
        outcome
    }

    #[doc(hidden)]
    async fn dispatcher_loop(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut tick_rx = self.tick_sender.subscribe();
        let mut stage_rx = self.stage_sender.subscribe();
        let mut control_rx = self.control.subscribe();
        let mut gc = IntervalWatcher::new(Duration::from_secs(self.config.engine.gc_interval_secs));
        let mut refresh =
            IntervalWatcher::new(Duration::from_secs(self.config.engine.settings_refresh_secs));
        self.system_event_sender
            .send(SystemEvent::EngineStarted {
                timestamp: tokio::time::Instant::now(),
            })
            .ok();
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                frame = control_rx.recv() => match frame {
                    Ok(frame) => self.process_control(&frame).await,
                    Err(RecvError::Lagged(n)) => warn!(skipped = n, "Control frames dropped"),
                    Err(RecvError::Closed) => break,
                },
                tick = stage_rx.recv() => match tick {
                    Ok(tick) => self.process_stage_tick(tick).await,
                    Err(RecvError::Lagged(n)) => warn!(skipped = n, "Stage ticks dropped"),
                    Err(RecvError::Closed) => break,
                },
                tick = tick_rx.recv() => match tick {
                    Ok(tick) => {
                        trace!("Tick #{} received.", tick.tick_count);
                        self.process_tick().await;
                        if gc.process_tick(tick.timestamp) {
                            let now = self.clock.now();
                            self.real.write().await.purge_stale_alarms(now);
                        }
                        if refresh.process_tick(tick.timestamp) {
                            self.refresh_settings().await;
                        }
                    }
                    // The phase engine notices the gap and resyncs itself.
                    Err(RecvError::Lagged(n)) => warn!(skipped = n, "Clock ticks dropped"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    #[doc(hidden)]
    async fn process_tick(&self) {
        let now = self.clock.now();
        let settings = self.settings.read().await.clone();
        let events = self.real.write().await.tick(now, &settings);
        self.publish(events);
        self.publish_frame().await;
    }

    #[doc(hidden)]
    async fn process_stage_tick(&self, tick: StageTick) {
        let events = self.simulation.write().await.advance(tick.run);
        if !events.is_empty() {
            self.publish(events.into_iter().map(EngineEvent::from).collect());
        }
        self.publish_frame().await;
    }

    #[doc(hidden)]
    async fn process_control(&self, frame: &str) {
        let message = match ControlMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping control frame");
                self.system_event_sender
                    .send(SystemEvent::ControlRejected {
                        reason: e.to_string(),
                    })
                    .ok();
                return;
            }
        };
        let events: Vec<PhaseEvent> = {
            let mut simulation = self.simulation.write().await;
            match message.into_request() {
                Some(request) => simulation.start(request).1,
                None => simulation.stop().into_iter().collect(),
            }
        };
        self.publish(events.into_iter().map(EngineEvent::from).collect());
        self.publish_frame().await;
    }

    #[doc(hidden)]
    async fn refresh_settings(&self) {
        let Some(source) = &self.settings_source else {
            return;
        };
        match source.load() {
            Ok(settings) => {
                if *self.settings.read().await == settings {
                    trace!("Settings unchanged");
                    return;
                }
                if let Err(e) = self.apply_settings(settings).await {
                    debug!(error = %e, "Refreshed settings not applied");
                }
            }
            Err(e) => warn!(error = %e, "Settings refresh failed; keeping previous settings"),
        }
    }

    fn publish(&self, events: Vec<EngineEvent>) {
        for event in events {
            match event {
                EngineEvent::System(event) => {
                    self.system_event_sender.send(event).ok();
                }
                EngineEvent::Phase(event) => {
                    self.phase_event_sender.send(event).ok();
                }
            }
        }
    }

    async fn publish_frame(&self) {
        let frame = self.snapshot().await;
        self.render_sender.send(frame).ok();
    }
}

// Public API implementation block.
impl DisplayEngine {
    /// The frame the screen should show right now.
    pub async fn snapshot(&self) -> RenderFrame {
        let simulated = self.simulation.read().await.state();
        let real = self.real.read().await.state().clone();
        RenderFrame::new(select(simulated.as_ref(), &real).clone())
    }

    /// Today's schedule, once computed.
    pub async fn schedule(&self) -> Option<DaySchedule> {
        self.real.read().await.schedule().cloned()
    }

    pub async fn next_prayer(&self) -> Option<PrayerSlot> {
        let now = self.clock.now();
        self.real
            .read()
            .await
            .schedule()
            .map(|schedule| schedule.next_prayer(now))
    }

    pub async fn settings(&self) -> PrayerSettings {
        self.settings.read().await.clone()
    }

    /// Validates and installs new settings. The running phase keeps its
    /// durations; the change shows from the next transition.
    pub async fn apply_settings(&self, settings: PrayerSettings) -> Result<()> {
        let checked = match settings.validate() {
            Ok(()) => match self.real.read().await.schedule() {
                Some(schedule) => {
                    schedule.check_windows(&settings, self.config.engine.alarm_overlay_secs)
                }
                None => Ok(()),
            },
            Err(e) => Err(e),
        };
        if let Err(e) = checked {
            error!(error = %e, "Rejected new settings");
            self.system_event_sender
                .send(SystemEvent::SettingsRejected {
                    reason: e.to_string(),
                })
                .ok();
            return Err(e);
        }
        *self.settings.write().await = settings;
        info!("Applied new prayer settings");
        self.system_event_sender
            .send(SystemEvent::SettingsApplied)
            .ok();
        Ok(())
    }

    pub fn config(&self) -> &KhidmatConfig {
        &self.config
    }

    /// The control bus this engine listens on.
    pub fn control(&self) -> &ControlBus {
        &self.control
    }

    pub fn start_simulation(&self, request: &SimulationRequest) -> Result<()> {
        self.control.publish(&ControlMessage::start(request))
    }

    pub fn stop_simulation(&self) -> Result<()> {
        self.control.publish(&ControlMessage::StopSim)
    }

    /// Subscribes to rendered frames: one per clock tick, plus one per
    /// simulation stage tick or control frame.
    pub fn subscribe_render(&self) -> broadcast::Receiver<RenderFrame> {
        self.render_sender.subscribe()
    }

    /// Subscribes to the `SystemEvent` stream.
    pub fn subscribe_system_events(&self) -> broadcast::Receiver<SystemEvent> {
        self.system_event_sender.subscribe()
    }

    /// Subscribes to the `PhaseEvent` stream.
    pub fn subscribe_phase_events(&self) -> broadcast::Receiver<PhaseEvent> {
        self.phase_event_sender.subscribe()
    }
}
