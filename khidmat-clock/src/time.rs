//! Time sources: the wall clock, the 1 Hz system ticker and the per-run
//! simulation stage timer.

use crate::common::RunId;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Supplies the current wall-clock instant.
pub trait WallClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// One beat of the system ticker.
#[derive(Debug, Clone)]
pub struct TickEvent {
    pub tick_count: u64,
    pub timestamp: Instant,
}

/// Broadcasts a `TickEvent` once per period until shut down.
///
/// Missed ticks are skipped rather than replayed in a burst; the phase engine
/// notices the gap and resynchronises from the wall clock instead.
pub struct SystemClock {
    period: Duration,
    sender: broadcast::Sender<Arc<TickEvent>>,
}

impl SystemClock {
    pub fn new(period: Duration, sender: broadcast::Sender<Arc<TickEvent>>) -> Self {
        Self { period, sender }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("SystemClock started with a {:?} period.", self.period);
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick_count: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                instant = ticker.tick() => {
                    tick_count += 1;
                    trace!("Emitting tick #{}", tick_count);
                    let event = TickEvent { tick_count, timestamp: instant };
                    self.sender.send(Arc::new(event)).ok();
                }
            }
        }
        info!("SystemClock stopped after {} ticks.", tick_count);
    }
}

/// A simulation stage tick: one simulated second has passed for `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTick {
    pub run: RunId,
}

/// Owned one-second timer driving a single simulation run.
///
/// Cancelling (or dropping) the handle stops the timer task before its next
/// tick. Ticks already queued are tagged with their run and are discarded by
/// the simulation engine once the run is over.
#[derive(Debug)]
pub struct StageTimer {
    cancel: CancellationToken,
}

impl StageTimer {
    /// Spawns the timer task. Must be called from within a tokio runtime.
    pub fn spawn(run: RunId, period: Duration, sender: broadcast::Sender<StageTick>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if sender.send(StageTick { run }).is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(run = run.0, "Stage timer finished");
        });
        Self { cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
