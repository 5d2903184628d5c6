//! De-duplicated alarm dispatch.
//!
//! Each engine owns its own `AlarmDispatcher`. The real-time engine fires
//! through the keyed `fire` path so an alarm sounds at most once per prayer,
//! phase and day; the simulation uses the unguarded `play` path and never
//! touches the fired-key set.

use crate::common::{PhaseKind, PlaybackId, PrayerName};
use crate::sound::{Playback, SoundPlayer};
use chrono::NaiveDate;
use slotmap::SlotMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Identifies one alarm occurrence: `phase-prayer-date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmFireKey {
    pub kind: PhaseKind,
    pub prayer: PrayerName,
    pub date: NaiveDate,
}

impl fmt::Display for AlarmFireKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.kind.key(),
            self.prayer.key(),
            self.date.format("%Y-%m-%d")
        )
    }
}

/// What happened to a `fire` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Played,
    /// Playback was attempted and failed; the key is still recorded.
    Failed,
    /// The key had already fired.
    Suppressed,
}

struct ActivePlayback {
    path: String,
    handle: Box<dyn Playback>,
}

/// Plays alarm sounds, remembering which keys have fired.
pub struct AlarmDispatcher {
    channel: &'static str,
    player: Arc<dyn SoundPlayer>,
    fired: HashSet<String>,
    playbacks: SlotMap<PlaybackId, ActivePlayback>,
}

impl AlarmDispatcher {
    /// `channel` only labels log lines so the two engines can be told apart.
    pub fn new(channel: &'static str, player: Arc<dyn SoundPlayer>) -> Self {
        Self {
            channel,
            player,
            fired: HashSet::new(),
            playbacks: SlotMap::with_key(),
        }
    }

    pub fn has_fired(&self, key: &AlarmFireKey) -> bool {
        self.fired.contains(&key.to_string())
    }

    /// Plays `path` unless `key` already fired, then records `key`.
    pub fn fire(&mut self, path: &str, key: &AlarmFireKey) -> FireOutcome {
        let key = key.to_string();
        if self.fired.contains(&key) {
            debug!(channel = self.channel, %key, "Alarm already fired, suppressing");
            return FireOutcome::Suppressed;
        }
        let outcome = match self.play(path) {
            Some(_) => FireOutcome::Played,
            None => FireOutcome::Failed,
        };
        self.fired.insert(key);
        outcome
    }

    /// Plays `path` without any de-duplication.
    ///
    /// Failures are logged and swallowed; `None` means nothing is playing.
    pub fn play(&mut self, path: &str) -> Option<PlaybackId> {
        self.reap_finished();
        match self.player.play(path) {
            Ok(handle) => {
                debug!(channel = self.channel, sound = path, "Alarm sound started");
                Some(self.playbacks.insert(ActivePlayback {
                    path: path.to_string(),
                    handle,
                }))
            }
            Err(e) => {
                warn!(channel = self.channel, error = %e, "Alarm sound failed; continuing");
                None
            }
        }
    }

    /// Halts every sound this dispatcher started. Returns how many were stopped.
    pub fn stop_all(&mut self) -> usize {
        let mut stopped = 0;
        for (_id, mut playback) in self.playbacks.drain() {
            if !playback.handle.is_finished() {
                playback.handle.stop();
                debug!(channel = self.channel, sound = %playback.path, "Alarm sound stopped");
                stopped += 1;
            }
        }
        stopped
    }

    /// Drops fired keys that do not belong to `today`.
    pub fn purge_stale(&mut self, today: NaiveDate) -> usize {
        let suffix = today.format("%Y-%m-%d").to_string();
        let before = self.fired.len();
        self.fired.retain(|key| key.ends_with(&suffix));
        let purged = before - self.fired.len();
        if purged > 0 {
            debug!(channel = self.channel, purged, "Purged stale alarm keys");
        }
        purged
    }

    pub fn fired_count(&self) -> usize {
        self.fired.len()
    }

    pub fn playing_count(&mut self) -> usize {
        self.reap_finished();
        self.playbacks.len()
    }

    fn reap_finished(&mut self) {
        self.playbacks
            .retain(|_, playback| !playback.handle.is_finished());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::MemoryPlayer;

    fn key(kind: PhaseKind, prayer: PrayerName, day: u32) -> AlarmFireKey {
        AlarmFireKey {
            kind,
            prayer,
            date: NaiveDate::from_ymd_opt(2026, 10, day).unwrap(),
        }
    }

    #[test]
    fn key_renders_phase_prayer_and_date() {
        let k = key(PhaseKind::Adhan, PrayerName::Dhuhr, 19);
        assert_eq!(k.to_string(), "adhan-dhuhr-2026-10-19");
    }

    #[test]
    fn fires_once_per_key() {
        let player = MemoryPlayer::new();
        let mut dispatcher = AlarmDispatcher::new("test", Arc::new(player.clone()));
        let k = key(PhaseKind::Adhan, PrayerName::Asr, 19);

        assert_eq!(dispatcher.fire("adhan.mp3", &k), FireOutcome::Played);
        for _ in 0..50 {
            assert_eq!(dispatcher.fire("adhan.mp3", &k), FireOutcome::Suppressed);
        }
        assert_eq!(player.played().len(), 1);
        assert!(dispatcher.has_fired(&k));
    }

    #[test]
    fn failed_playback_still_records_the_key() {
        let player = MemoryPlayer::failing();
        let mut dispatcher = AlarmDispatcher::new("test", Arc::new(player.clone()));
        let k = key(PhaseKind::PreSalatAlarm, PrayerName::Isha, 19);

        assert_eq!(dispatcher.fire("iqamah.mp3", &k), FireOutcome::Failed);
        assert_eq!(dispatcher.fire("iqamah.mp3", &k), FireOutcome::Suppressed);
        assert_eq!(player.played().len(), 1);
    }

    #[test]
    fn purge_keeps_only_today() {
        let mut dispatcher = AlarmDispatcher::new("test", Arc::new(MemoryPlayer::new()));
        dispatcher.fire("a", &key(PhaseKind::Adhan, PrayerName::Isha, 18));
        dispatcher.fire("a", &key(PhaseKind::Adhan, PrayerName::Fajr, 19));
        dispatcher.fire("a", &key(PhaseKind::PreSalatAlarm, PrayerName::Fajr, 19));

        let purged = dispatcher.purge_stale(NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());
        assert_eq!(purged, 1);
        assert_eq!(dispatcher.fired_count(), 2);
    }

    #[test]
    fn stop_all_silences_in_flight_sounds() {
        let player = MemoryPlayer::new();
        let mut dispatcher = AlarmDispatcher::new("test", Arc::new(player.clone()));
        dispatcher.play("a.mp3");
        dispatcher.play("b.mp3");
        assert_eq!(player.active(), 2);

        assert_eq!(dispatcher.stop_all(), 2);
        assert_eq!(player.active(), 0);
        assert_eq!(dispatcher.playing_count(), 0);
    }
}
