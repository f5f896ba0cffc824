//! Hold-to-repeat timing for finetune adjustments.
//!
//! Holding a button fires once immediately, again after the initial delay,
//! then at the repeat interval until something stops it.

use std::time::Duration;

use tokio::time::Instant;

use super::{Direction, Target};
use crate::input::{Button, Stick};

/// What a held button keeps doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RepeatAction {
    pub stick: Stick,
    pub target: Target,
    pub direction: Direction,
    /// Button whose release stops the repeat.
    pub trigger: Button,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepeatPhase {
    Idle,
    ArmedInitial { next: Instant },
    Repeating { next: Instant },
}

pub struct ContinuousRepeat {
    phase: RepeatPhase,
    action: Option<RepeatAction>,
    initial_delay: Duration,
    interval: Duration,
}

impl ContinuousRepeat {
    pub fn new(initial_delay: Duration, interval: Duration) -> Self {
        Self {
            phase: RepeatPhase::Idle,
            action: None,
            initial_delay,
            interval,
        }
    }

    /// Arm after the caller has applied the first adjustment at `now`.
    pub fn start(&mut self, action: RepeatAction, now: Instant) {
        self.action = Some(action);
        self.phase = RepeatPhase::ArmedInitial {
            next: now + self.initial_delay,
        };
    }

    pub fn stop(&mut self) {
        self.phase = RepeatPhase::Idle;
        self.action = None;
    }

    pub fn phase(&self) -> RepeatPhase {
        self.phase
    }

    pub fn action(&self) -> Option<RepeatAction> {
        self.action
    }

    pub fn is_active(&self) -> bool {
        self.phase() != RepeatPhase::Idle
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            RepeatPhase::Idle => None,
            RepeatPhase::ArmedInitial { next } | RepeatPhase::Repeating { next } => Some(next),
        }
    }

    /// The action to fire if the deadline has passed; advances the phase.
    pub fn due(&mut self, now: Instant) -> Option<RepeatAction> {
        let next = self.deadline()?;
        if now < next {
            return None;
        }
        self.phase = RepeatPhase::Repeating {
            next: now + self.interval,
        };
        self.action
    }
}
