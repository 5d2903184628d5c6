//! What the screen shows, and the pure projection that formats it.

use crate::common::{PhaseKind, PrayerName};
use serde::Serialize;

/// The kind of overlay currently on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayKind {
    Idle,
    /// Lead-in stage of a simulation run; never produced by the real schedule.
    Preview,
    Adhan,
    IqamahCountdown,
    PreSalatAlarm,
    Salat,
}

impl From<PhaseKind> for DisplayKind {
    fn from(kind: PhaseKind) -> Self {
        match kind {
            PhaseKind::Adhan => DisplayKind::Adhan,
            PhaseKind::IqamahCountdown => DisplayKind::IqamahCountdown,
            PhaseKind::PreSalatAlarm => DisplayKind::PreSalatAlarm,
            PhaseKind::Salat => DisplayKind::Salat,
        }
    }
}

impl DisplayKind {
    pub fn label(self) -> &'static str {
        match self {
            DisplayKind::Idle => "Idle",
            DisplayKind::Preview => "Preview",
            DisplayKind::Adhan => "Adhan",
            DisplayKind::IqamahCountdown => "Iqamah countdown",
            DisplayKind::PreSalatAlarm => "Iqamah",
            DisplayKind::Salat => "Salat",
        }
    }
}

/// The single source of truth for what the screen renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayPhaseState {
    pub kind: DisplayKind,
    pub prayer: Option<PrayerName>,
    pub remaining_secs: Option<u32>,
    pub total_secs: Option<u32>,
    pub is_simulated: bool,
}

impl DisplayPhaseState {
    pub fn idle() -> Self {
        Self {
            kind: DisplayKind::Idle,
            prayer: None,
            remaining_secs: None,
            total_secs: None,
            is_simulated: false,
        }
    }

    pub fn active(
        kind: DisplayKind,
        prayer: PrayerName,
        remaining_secs: u32,
        total_secs: u32,
        is_simulated: bool,
    ) -> Self {
        Self {
            kind,
            prayer: Some(prayer),
            remaining_secs: Some(remaining_secs),
            total_secs: Some(total_secs),
            is_simulated,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.kind == DisplayKind::Idle
    }
}

impl Default for DisplayPhaseState {
    fn default() -> Self {
        Self::idle()
    }
}

/// Renderable countdown values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub label: String,
    /// `mm:ss`; minutes are not capped at 59.
    pub clock: String,
    /// Fraction of the phase still remaining, in `[0, 1]`.
    pub progress: f64,
}

/// Formats a state for rendering. Pure and deterministic.
pub fn project(state: &DisplayPhaseState) -> Projection {
    let remaining = state.remaining_secs.unwrap_or(0);
    let total = state.total_secs.unwrap_or(0);
    let progress = if total > 0 {
        (f64::from(remaining) / f64::from(total)).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let label = match state.prayer {
        Some(prayer) => format!("{} {}", state.kind.label(), prayer.display_name()),
        None => state.kind.label().to_string(),
    };
    Projection {
        label,
        clock: format!("{:02}:{:02}", remaining / 60, remaining % 60),
        progress,
    }
}

/// Picks what to render: a running simulation wins over the real schedule.
pub fn select<'a>(
    simulated: Option<&'a DisplayPhaseState>,
    real: &'a DisplayPhaseState,
) -> &'a DisplayPhaseState {
    simulated.unwrap_or(real)
}

/// One render: the selected state and its projection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderFrame {
    pub state: DisplayPhaseState,
    pub projection: Projection,
}

impl RenderFrame {
    pub fn new(state: DisplayPhaseState) -> Self {
        let projection = project(&state);
        Self { state, projection }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn idle_projects_to_zero() {
        let projection = project(&DisplayPhaseState::idle());
        assert_eq!(projection.clock, "00:00");
        assert_eq!(projection.progress, 0.0);
        assert_eq!(projection.label, "Idle");
    }

    #[test]
    fn formats_minutes_beyond_an_hour() {
        let state = DisplayPhaseState::active(
            DisplayKind::Salat,
            PrayerName::Dhuhr,
            3725,
            3725,
            false,
        );
        let projection = project(&state);
        assert_eq!(projection.clock, "62:05");
        assert_eq!(projection.label, "Salat Dzuhur");
    }

    #[test]
    fn simulation_takes_precedence() {
        let real = DisplayPhaseState::idle();
        let sim = DisplayPhaseState::active(DisplayKind::Preview, PrayerName::Asr, 3, 10, true);
        assert_eq!(select(Some(&sim), &real), &sim);
        assert_eq!(select(None, &real), &real);
    }

    proptest! {
        #[test]
        fn progress_bounds(total in 1u32..100_000) {
            let empty =
                DisplayPhaseState::active(DisplayKind::Adhan, PrayerName::Fajr, 0, total, false);
            prop_assert_eq!(project(&empty).progress, 0.0);

            let full =
                DisplayPhaseState::active(DisplayKind::Adhan, PrayerName::Fajr, total, total, false);
            prop_assert_eq!(project(&full).progress, 1.0);
        }

        #[test]
        fn progress_stays_in_unit_interval(remaining in 0u32..10_000, total in 0u32..10_000) {
            let state = DisplayPhaseState::active(
                DisplayKind::Salat,
                PrayerName::Isha,
                remaining,
                total,
                false,
            );
            let progress = project(&state).progress;
            prop_assert!((0.0..=1.0).contains(&progress));
        }
    }
}
