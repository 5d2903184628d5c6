//! Sound playback backends.
//!
//! Playback is fire-and-forget from the engines' point of view: a backend
//! either starts playing and hands back a `Playback` handle, or fails. The
//! handle is only used to stop the sound early.

use crate::error::{KhidmatError, Result};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// A sound that may still be playing.
pub trait Playback: Send + Sync {
    /// Halts playback. Calling this on a finished sound is harmless.
    fn stop(&mut self);
    fn is_finished(&mut self) -> bool;
}

/// Starts playing sound files.
pub trait SoundPlayer: Send + Sync {
    fn play(&self, path: &str) -> Result<Box<dyn Playback>>;
}

/// Logs every request instead of producing audio.
#[derive(Debug, Clone, Default)]
pub struct LogPlayer;

struct SilentPlayback;

impl Playback for SilentPlayback {
    fn stop(&mut self) {}

    fn is_finished(&mut self) -> bool {
        true
    }
}

impl SoundPlayer for LogPlayer {
    fn play(&self, path: &str) -> Result<Box<dyn Playback>> {
        info!(sound = path, "Playing sound");
        Ok(Box::new(SilentPlayback))
    }
}

/// Plays sounds by spawning an external player, e.g. `mpv --no-video`.
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
}

impl CommandPlayer {
    /// Splits `command` on whitespace; the sound path is appended last.
    pub fn parse(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

struct ChildPlayback(Child);

impl Playback for ChildPlayback {
    fn stop(&mut self) {
        if self.0.kill().is_ok() {
            self.0.wait().ok();
        }
    }

    fn is_finished(&mut self) -> bool {
        !matches!(self.0.try_wait(), Ok(None))
    }
}

impl SoundPlayer for CommandPlayer {
    fn play(&self, path: &str) -> Result<Box<dyn Playback>> {
        debug!(program = %self.program, sound = path, "Spawning sound player");
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| KhidmatError::SoundPlaybackFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(ChildPlayback(child)))
    }
}

/// Records playback in memory. Sounds "play" until stopped.
///
/// Clones share the same record, so a test can keep one clone and hand the
/// other to an engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryPlayer {
    played: Arc<Mutex<Vec<String>>>,
    active: Arc<AtomicUsize>,
    failing: bool,
}

impl MemoryPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A player whose every request fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Every path requested so far, including failed attempts.
    pub fn played(&self) -> Vec<String> {
        self.played.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Number of sounds started and not yet stopped.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

struct MemoryPlayback {
    active: Arc<AtomicUsize>,
    stopped: bool,
}

impl Playback for MemoryPlayback {
    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_finished(&mut self) -> bool {
        self.stopped
    }
}

impl SoundPlayer for MemoryPlayer {
    fn play(&self, path: &str) -> Result<Box<dyn Playback>> {
        if let Ok(mut played) = self.played.lock() {
            played.push(path.to_string());
        }
        if self.failing {
            return Err(KhidmatError::SoundPlaybackFailed {
                path: path.to_string(),
                reason: "no audio device".to_string(),
            });
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryPlayback {
            active: self.active.clone(),
            stopped: false,
        }))
    }
}
