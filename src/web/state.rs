//! Shared UI state and web command types.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::calibration::{CalibrationStep, RangeView};
use crate::finetune::params::ParamId;
use crate::finetune::{Direction, FinetuneMode, FinetuneView, Target};
use crate::input::{InputFrame, Stick};
use crate::timing::TimingStats;

/// Commands the web UI can send to the controller loop.
#[derive(Debug, Clone, PartialEq)]
pub enum WebCommand {
    Input(InputFrame),
    RangeOpen,
    RangeClose,
    CenterOpen,
    CenterNext,
    CenterCancel,
    CenterAuto,
    FinetuneOpen,
    FinetuneMode(FinetuneMode),
    FinetuneStick(Option<Stick>),
    FinetuneStepSize(u32),
    FinetuneStep {
        stick: Stick,
        target: Target,
        direction: Direction,
    },
    FinetuneSet {
        param: ParamId,
        value: i64,
    },
    SlackStart(Stick),
    Slack {
        stick: Stick,
        position: f64,
    },
    SlackRelease(Stick),
    SlackReset(Stick),
    FinetuneQuickCenter,
    FinetuneQuickRange,
    FinetuneSave,
    FinetuneCancel,
    AnalysisStart,
    AnalysisStop,
    ClearHistograms,
}

impl WebCommand {
    /// Session the command belongs to, for logs and outcomes.
    pub fn session(&self) -> &'static str {
        match self {
            WebCommand::Input(_) | WebCommand::ClearHistograms => "input",
            WebCommand::RangeOpen | WebCommand::RangeClose | WebCommand::FinetuneQuickRange => "range",
            WebCommand::CenterOpen
            | WebCommand::CenterNext
            | WebCommand::CenterCancel
            | WebCommand::CenterAuto
            | WebCommand::FinetuneQuickCenter => "center",
            WebCommand::AnalysisStart | WebCommand::AnalysisStop => "analysis",
            _ => "finetune",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisView {
    pub stats: Option<TimingStats>,
    /// Recent inter-report intervals (ms), oldest first.
    pub intervals: Vec<f64>,
}

/// Everything the UI renders, published as one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateSnapshot {
    /// Name of the open calibration session, if any.
    pub session: Option<&'static str>,
    /// Main display histograms (left, right).
    pub histograms: [Vec<f64>; 2],
    pub range: Option<RangeView>,
    pub center_step: Option<CalibrationStep>,
    pub finetune: Option<FinetuneView>,
    pub analysis: Option<AnalysisView>,
}

pub struct UiState {
    inner: Mutex<StateSnapshot>,
    changed: Mutex<bool>,
}

impl Default for UiState {
    fn default() -> Self {
        Self::new()
    }
}

impl UiState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StateSnapshot::default()),
            changed: Mutex::new(false),
        }
    }

    pub fn update(&self, snapshot: StateSnapshot) {
        let mut inner = lock(&self.inner);
        // Only mark changed if values actually differ
        if *inner != snapshot {
            *inner = snapshot;
            *lock(&self.changed) = true;
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        lock(&self.inner).clone()
    }

    pub fn snapshot_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or_default()
    }

    /// Return snapshot if changed since last pop, else None.
    pub fn pop_if_changed(&self) -> Option<StateSnapshot> {
        let mut changed = lock(&self.changed);
        if *changed {
            *changed = false;
            Some(lock(&self.inner).clone())
        } else {
            None
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
