//! Defines a fixed, ordered sequence of timed stages.

/// What `StageSequence::advance` moved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStep<S> {
    /// The sequence moved on to `stage`, which lasts `duration_secs`.
    Next { stage: S, duration_secs: u32 },
    /// The last stage finished.
    Completed,
}

/// A stateful walk through `(stage, duration)` pairs, run once.
///
/// Zero-length stages are skipped when advancing, so a caller never sees a
/// stage that would end the moment it starts.
#[derive(Debug, Clone)]
pub struct StageSequence<S> {
    steps: Vec<(S, u32)>,
    current: usize,
}

impl<S: Copy> StageSequence<S> {
    pub fn new(steps: Vec<(S, u32)>) -> Self {
        let mut sequence = Self { steps, current: 0 };
        sequence.skip_empty();
        sequence
    }

    /// The stage in progress, or `None` once completed.
    pub fn current(&self) -> Option<(S, u32)> {
        self.steps.get(self.current).copied()
    }

    /// Moves to the next non-empty stage.
    pub fn advance(&mut self) -> StageStep<S> {
        if self.current < self.steps.len() {
            self.current += 1;
        }
        self.skip_empty();
        match self.current() {
            Some((stage, duration_secs)) => StageStep::Next {
                stage,
                duration_secs,
            },
            None => StageStep::Completed,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.current >= self.steps.len()
    }

    /// Sum of every stage duration.
    pub fn total_secs(&self) -> u32 {
        self.steps.iter().map(|(_, secs)| secs).sum()
    }

    fn skip_empty(&mut self) {
        while matches!(self.steps.get(self.current), Some((_, 0))) {
            self.current += 1;
        }
    }
}
