//! Debounce state machine for write-through middlewares.
//!
//! ```text
//! Idle       --mutation-->      Scheduled { now + window }
//! Scheduled  --mutation-->      Scheduled { now + window }
//! Scheduled  --deadline-->      Writing { rescheduled: None }
//! Writing    --mutation-->      Writing { rescheduled: Some(now + window) }
//! Writing    --write done-->    Scheduled { rescheduled } or Idle
//! ```
//!
//! The debouncer only tracks time; it never performs I/O. At most one
//! write is in flight: a mutation during `Writing` is remembered and
//! turned into a new deadline when the write completes.

use std::time::Duration;

use tokio::time::Instant;

/// Current phase of a [`Debouncer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Scheduled { deadline: Instant },
    Writing { rescheduled: Option<Instant> },
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    phase: Phase,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            phase: Phase::Idle,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Change the quiet period. Takes effect from the next mutation.
    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// A qualifying mutation happened at `now`.
    pub fn on_mutation(&mut self, now: Instant) {
        let deadline = now + self.window;
        self.phase = match self.phase {
            Phase::Idle | Phase::Scheduled { .. } => Phase::Scheduled { deadline },
            Phase::Writing { .. } => Phase::Writing {
                rescheduled: Some(deadline),
            },
        };
    }

    /// When the next write should start, if one is scheduled and none is
    /// in flight.
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Scheduled { deadline } => Some(deadline),
            _ => None,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| deadline <= now)
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// The scheduled write has started.
    pub fn begin_write(&mut self) {
        self.phase = Phase::Writing { rescheduled: None };
    }

    /// The in-flight write finished. Returns `true` if a follow-up write
    /// is now scheduled.
    pub fn complete_write(&mut self) -> bool {
        self.phase = match self.phase {
            Phase::Writing {
                rescheduled: Some(deadline),
            } => Phase::Scheduled { deadline },
            Phase::Writing { rescheduled: None } => Phase::Idle,
            other => other,
        };
        matches!(self.phase, Phase::Scheduled { .. })
    }

    /// Pull any scheduled write forward to `now`; schedule one if idle.
    pub fn expedite(&mut self, now: Instant) {
        self.phase = match self.phase {
            Phase::Idle | Phase::Scheduled { .. } => Phase::Scheduled { deadline: now },
            Phase::Writing { .. } => Phase::Writing {
                rescheduled: Some(now),
            },
        };
    }

    /// Drop any scheduled write. An in-flight write is left to finish but
    /// will not be followed up.
    pub fn cancel_pending(&mut self) {
        self.phase = match self.phase {
            Phase::Writing { .. } => Phase::Writing { rescheduled: None },
            _ => Phase::Idle,
        };
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
