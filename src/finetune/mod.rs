//! Finetune engine: nudge the stored calibration values by hand.
//!
//! Two modes share one parameter set:
//!   center       D-pad / face buttons move the raw center (X/Y)
//!   circularity  with the stick held at an extreme, they move that
//!                quadrant's axis limit (L/T/R/B)
//!
//! `FinetuneEngine` performs no device I/O after `open`; operations return a
//! `FinetuneEffect` and the controller writes the set back.

pub mod params;
pub mod repeat;
pub mod slack;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use self::params::{Axis, ParamId, ParameterSet, Quadrant};
use self::repeat::{ContinuousRepeat, RepeatAction};
use self::slack::{slack_total, SlackBaseline, SlackState};
use crate::config::FinetuneConfig;
use crate::device::{CalibrationDevice, LockStatus};
use crate::error::{CalibError, Result};
use crate::histogram::PolarHistogram;
use crate::input::{Button, ButtonState, InputFrame, Stick, StickSample};

/// Movement past this on either axis selects a stick.
const ACTIVE_DEADZONE: f64 = 0.2;
/// Center adjustments are refused while the stick is pushed past this.
const CENTER_TOLERANCE: f64 = 0.5;
/// Either axis falling from here means the stick left the edge.
const EDGE: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FinetuneMode {
    Center,
    Circularity,
}

impl FinetuneMode {
    fn index(self) -> usize {
        match self {
            FinetuneMode::Center => 0,
            FinetuneMode::Circularity => 1,
        }
    }
}

impl fmt::Display for FinetuneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FinetuneMode::Center => "center",
            FinetuneMode::Circularity => "circularity",
        })
    }
}

impl FromStr for FinetuneMode {
    type Err = CalibError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "center" => Ok(FinetuneMode::Center),
            "circularity" => Ok(FinetuneMode::Circularity),
            other => Err(CalibError::InvalidMode(format!("unknown mode '{other}'"))),
        }
    }
}

/// What an adjustment moves: a raw center axis or a quadrant's limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Center(Axis),
    Limit(Quadrant),
}

impl Target {
    pub fn mode(self) -> FinetuneMode {
        match self {
            Target::Center(_) => FinetuneMode::Center,
            Target::Limit(_) => FinetuneMode::Circularity,
        }
    }

    pub fn param(self, stick: Stick) -> ParamId {
        match self {
            Target::Center(axis) => ParamId::center(stick, axis),
            Target::Limit(q) => ParamId::limit(stick, q),
        }
    }
}

impl FromStr for Target {
    type Err = CalibError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "x" | "X" => Target::Center(Axis::X),
            "y" | "Y" => Target::Center(Axis::Y),
            "left" => Target::Limit(Quadrant::Left),
            "up" => Target::Limit(Quadrant::Up),
            "right" => Target::Limit(Quadrant::Right),
            "down" => Target::Limit(Quadrant::Down),
            other => return Err(CalibError::InvalidMode(format!("unknown target '{other}'"))),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Increase,
    Decrease,
}

impl Direction {
    pub fn from_sign(sign: i64) -> Option<Direction> {
        match sign.signum() {
            1 => Some(Direction::Increase),
            -1 => Some(Direction::Decrease),
            _ => None,
        }
    }

    fn sign(self) -> i64 {
        match self {
            Direction::Increase => 1,
            Direction::Decrease => -1,
        }
    }
}

/// Why a button press was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinetuneWarning {
    /// Center mode needs the stick at rest.
    StickNotCentered,
    /// Circularity mode needs the stick held against one edge.
    StickNotAtExtreme,
}

/// Side effects of an engine operation, applied by the controller.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FinetuneEffect {
    /// Whole set to write back, if anything changed.
    pub write: Option<ParameterSet>,
    pub warning: Option<FinetuneWarning>,
}

impl FinetuneEffect {
    fn none() -> Self {
        Self::default()
    }
}

/// Snapshot for the UI.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FinetuneView {
    pub params: ParameterSet,
    pub malformed: bool,
    pub max_value: u32,
    pub mode: FinetuneMode,
    pub active_stick: Option<Stick>,
    pub step_size: u32,
    pub repeating: bool,
    pub histograms: [Vec<f64>; 2],
    /// Slack slider enabled (the stick has been moved in every direction).
    pub slack_available: [bool; 2],
    /// A released slack gesture can be reset.
    pub slack_used: [bool; 2],
}

pub struct FinetuneEngine {
    params: ParameterSet,
    /// Values read at open; `None` when the read was malformed.
    original: Option<ParameterSet>,
    read_len: usize,
    max_value: u32,
    histograms: [PolarHistogram; 2],
    mode: FinetuneMode,
    active_stick: Option<Stick>,
    step_sizes: [u32; 2],
    repeat: ContinuousRepeat,
    slack: [SlackState; 2],
    last: [StickSample; 2],
    buttons: ButtonState,
    cfg: FinetuneConfig,
}

impl FinetuneEngine {
    /// Take the lock, then read the clamp bound and the current set.
    ///
    /// A read with the wrong number of values still opens, but degraded:
    /// nothing is written back and `commit` is refused.
    pub async fn open<D: CalibrationDevice>(device: &mut D, cfg: &FinetuneConfig) -> Result<Self> {
        ensure_locked(device).await?;

        let max_value = device.max_parameter_value().await?;
        let raw = device.read_parameter_set().await?;
        let original = match ParameterSet::from_slice(&raw) {
            Ok(set) => Some(set),
            Err(e) => {
                warn!("[FINETUNE] {e}; opening read-only");
                None
            }
        };
        let params = original.clone().unwrap_or_else(|| ParameterSet::padded(&raw));
        info!("[FINETUNE] Opened, params {:?} (max {max_value})", params.values());

        Ok(Self::with_params(params, original, raw.len(), max_value, cfg))
    }

    fn with_params(
        params: ParameterSet,
        original: Option<ParameterSet>,
        read_len: usize,
        max_value: u32,
        cfg: &FinetuneConfig,
    ) -> Self {
        Self {
            params,
            original,
            read_len,
            max_value,
            histograms: [PolarHistogram::new(), PolarHistogram::new()],
            mode: FinetuneMode::Center,
            active_stick: Some(Stick::Left),
            step_sizes: [cfg.default_step_size; 2],
            repeat: ContinuousRepeat::new(cfg.repeat_initial_delay(), cfg.repeat_interval()),
            slack: [SlackState::default(), SlackState::default()],
            last: [StickSample::default(); 2],
            buttons: ButtonState::default(),
            cfg: cfg.clone(),
        }
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    pub fn mode(&self) -> FinetuneMode {
        self.mode
    }

    pub fn active_stick(&self) -> Option<Stick> {
        self.active_stick
    }

    pub fn step_size(&self) -> u32 {
        self.step_sizes[self.mode.index()]
    }

    pub fn is_malformed(&self) -> bool {
        self.original.is_none()
    }

    pub fn histogram(&self, stick: Stick) -> &PolarHistogram {
        &self.histograms[stick.index()]
    }

    /// Move one parameter by ±`step`, saturating at `[0, max_value]`.
    pub fn apply_step(
        &mut self,
        stick: Stick,
        target: Target,
        direction: Direction,
        step: u32,
    ) -> Result<FinetuneEffect> {
        if target.mode() != self.mode {
            return Err(CalibError::InvalidMode(format!(
                "{target:?} is not adjustable in {} mode",
                self.mode
            )));
        }
        let id = target.param(stick);
        let value = self.params.adjust(id, direction.sign() * i64::from(step), self.max_value);
        debug!("[FINETUNE] {id} -> {value}");
        self.clear_histograms();
        Ok(self.queue_write())
    }

    /// Direct numeric entry.
    pub fn set_parameter(&mut self, id: ParamId, value: i64) -> FinetuneEffect {
        let stored = self.params.set_clamped(id, value, self.max_value);
        debug!("[FINETUNE] {id} set to {stored}");
        self.queue_write()
    }

    pub fn set_mode(&mut self, mode: FinetuneMode) {
        if mode == self.mode {
            return;
        }
        info!("[FINETUNE] Mode: {mode}");
        self.mode = mode;
        self.repeat.stop();
        self.clear_histograms();
        if mode == FinetuneMode::Center {
            // Slack undo is only offered within one circularity visit.
            self.slack = [SlackState::default(), SlackState::default()];
        }
    }

    pub fn select_stick(&mut self, stick: Option<Stick>) {
        if stick != self.active_stick {
            self.active_stick = stick;
            self.repeat.stop();
        }
    }

    /// Step size for the current mode.
    pub fn set_step_size(&mut self, size: u32) {
        self.step_sizes[self.mode.index()] = size.max(1);
    }

    /// Hand the device to another calibration; nothing may keep firing.
    pub fn suspend(&mut self) {
        self.repeat.stop();
        self.clear_histograms();
    }

    pub fn clear_histograms(&mut self) {
        for h in &mut self.histograms {
            h.reset();
        }
    }

    pub fn on_sample(&mut self, stick: Stick, sample: StickSample) {
        self.histograms[stick.index()].sample(sample.x, sample.y);
    }

    /// Feed one input frame: track the active stick, route buttons, and
    /// start or stop the hold-to-repeat.
    pub fn handle_input(&mut self, frame: &InputFrame, now: Instant) -> FinetuneEffect {
        let edges = frame.buttons.edges_from(&self.buttons);
        self.buttons = frame.buttons;

        if edges.pressed.get(Button::L1) {
            self.set_mode(FinetuneMode::Center);
        } else if edges.pressed.get(Button::R1) {
            self.set_mode(FinetuneMode::Circularity);
        }

        let left_away = frame.left.is_away_from_center(ACTIVE_DEADZONE);
        let right_away = frame.right.is_away_from_center(ACTIVE_DEADZONE);
        match (left_away, right_away) {
            (true, true) => self.select_stick(None),
            (true, false) => self.select_stick(Some(Stick::Left)),
            (false, true) => self.select_stick(Some(Stick::Right)),
            (false, false) => {}
        }

        for stick in Stick::BOTH {
            self.on_sample(stick, frame.stick(stick));
        }

        let mut effect = FinetuneEffect::none();

        if let Some(action) = self.repeat.action() {
            if edges.released.get(action.trigger) {
                self.repeat.stop();
            } else if let Some(warning) = self.should_stop(action, Some(frame.stick(action.stick))) {
                self.repeat.stop();
                if frame.buttons.any(&Button::NAVIGATION) {
                    effect.warning = warning;
                }
            }
        }

        for stick in Stick::BOTH {
            self.last[stick.index()] = frame.stick(stick);
        }

        if self.repeat.is_active() || !edges.pressed.any(&Button::NAVIGATION) {
            return effect;
        }
        let Some(stick) = self.active_stick else {
            return effect;
        };

        let sample = frame.stick(stick);
        let pressed = Button::NAVIGATION.into_iter().find(|b| edges.pressed.get(*b));
        let Some(trigger) = pressed else {
            return effect;
        };

        let resolved = match self.mode {
            FinetuneMode::Center => {
                if sample.x.abs() > CENTER_TOLERANCE || sample.y.abs() > CENTER_TOLERANCE {
                    effect.warning = Some(FinetuneWarning::StickNotCentered);
                    return effect;
                }
                center_binding(trigger)
            }
            FinetuneMode::Circularity => {
                if !sample.is_extreme() {
                    effect.warning = Some(FinetuneWarning::StickNotAtExtreme);
                    return effect;
                }
                limit_binding(quadrant_of(sample.x, sample.y), trigger)
            }
        };
        let Some((target, direction)) = resolved else {
            return effect;
        };

        let action = RepeatAction {
            stick,
            target,
            direction,
            trigger,
        };
        match self.apply_step(stick, target, direction, self.step_size()) {
            Ok(fired) => {
                self.repeat.start(action, now);
                effect.write = fired.write;
            }
            Err(e) => warn!("[FINETUNE] {e}"),
        }
        effect
    }

    pub fn next_repeat_deadline(&self) -> Option<Instant> {
        self.repeat.deadline()
    }

    /// Fire the held adjustment if its deadline has passed.
    pub fn fire_repeat(&mut self, now: Instant) -> Option<FinetuneEffect> {
        let action = self.repeat.due(now)?;
        if self.should_stop(action, None).is_some() {
            self.repeat.stop();
            return None;
        }
        match self.apply_step(action.stick, action.target, action.direction, self.step_size()) {
            Ok(effect) => Some(effect),
            Err(e) => {
                warn!("[FINETUNE] {e}");
                self.repeat.stop();
                None
            }
        }
    }

    /// The single stop predicate for a held adjustment. `sample` is the new
    /// reading of the action's stick, or `None` on a timer tick. Returns the
    /// warning to show (possibly none) when the repeat must stop.
    fn should_stop(
        &self,
        action: RepeatAction,
        sample: Option<StickSample>,
    ) -> Option<Option<FinetuneWarning>> {
        if action.target.mode() != self.mode || self.active_stick != Some(action.stick) {
            return Some(None);
        }
        let prev = self.last[action.stick.index()];
        let current = sample.unwrap_or(prev);
        let left_edge = |p: f64, c: f64| p.abs() >= EDGE && c.abs() < EDGE;
        if left_edge(prev.x, current.x) || left_edge(prev.y, current.y) {
            return Some(None);
        }
        if self.mode == FinetuneMode::Circularity && !current.is_extreme() {
            return Some(Some(FinetuneWarning::StickNotAtExtreme));
        }
        None
    }

    fn require_circularity(&self) -> Result<()> {
        if self.mode != FinetuneMode::Circularity {
            return Err(CalibError::InvalidMode(
                "error slack is only available in circularity mode".into(),
            ));
        }
        Ok(())
    }

    pub fn slack_available(&self, stick: Stick) -> bool {
        self.histograms[stick.index()].is_fully_populated()
    }

    /// Grab the slider: capture the baseline for this gesture.
    pub fn begin_slack(&mut self, stick: Stick) -> Result<()> {
        self.require_circularity()?;
        if !self.slack_available(stick) {
            return Err(CalibError::HistogramIncomplete(stick));
        }
        self.repeat.stop();
        self.slack[stick.index()].baseline = Some(SlackBaseline::capture(
            stick,
            &self.params,
            &self.histograms[stick.index()],
        ));
        Ok(())
    }

    /// Move the slider to `position` (0-100). Returns the raw-unit total.
    pub fn apply_slack(&mut self, stick: Stick, position: f64) -> Result<f64> {
        self.require_circularity()?;
        if self.slack[stick.index()].baseline.is_none() {
            self.begin_slack(stick)?;
        }
        let total = slack_total(position, self.cfg.slack_max_adjustment);
        let i = stick.index();
        if let Some(base) = &self.slack[i].baseline {
            base.apply(
                total,
                self.cfg.slack_histogram_scale,
                self.max_value,
                &mut self.params,
                &mut self.histograms[i],
            );
        }
        Ok(total)
    }

    /// Let go of the slider: keep the values and offer undo.
    pub fn release_slack(&mut self, stick: Stick) -> Result<FinetuneEffect> {
        self.require_circularity()?;
        let i = stick.index();
        self.histograms[i].reset();
        self.slack[i].used = true;
        info!("[FINETUNE] Slack applied to {stick} stick");
        Ok(self.queue_write())
    }

    /// Undo the last slack gesture.
    pub fn reset_slack(&mut self, stick: Stick) -> Result<FinetuneEffect> {
        self.require_circularity()?;
        let i = stick.index();
        if let Some(base) = self.slack[i].baseline.take() {
            base.restore(&mut self.params, self.max_value);
        }
        self.histograms[i].reset();
        self.slack[i].used = false;
        Ok(self.queue_write())
    }

    /// The set to persist when the user accepts.
    pub fn commit(&self) -> Result<ParameterSet> {
        if self.is_malformed() {
            return Err(CalibError::MalformedParameterSet(self.read_len));
        }
        Ok(self.params.clone())
    }

    /// Roll back to the values read at open. Returns the set to write, or
    /// `None` when nothing trustworthy was captured.
    pub fn cancel(&mut self) -> Option<ParameterSet> {
        self.repeat.stop();
        let original = self.original.clone()?;
        self.params = original.clone();
        Some(original)
    }

    /// Re-read the set after the device recalibrated itself. The snapshot
    /// used by `cancel` is left alone.
    pub async fn reload<D: CalibrationDevice>(&mut self, device: &mut D) -> Result<()> {
        let raw = device.read_parameter_set().await?;
        self.params = match ParameterSet::from_slice(&raw) {
            Ok(set) => set,
            Err(e) => {
                warn!("[FINETUNE] Reload: {e}");
                ParameterSet::padded(&raw)
            }
        };
        self.repeat.stop();
        self.clear_histograms();
        Ok(())
    }

    pub fn view(&self) -> FinetuneView {
        FinetuneView {
            params: self.params().clone(),
            malformed: self.is_malformed(),
            max_value: self.max_value,
            mode: self.mode(),
            active_stick: self.active_stick(),
            step_size: self.step_size(),
            repeating: self.repeat.is_active(),
            histograms: Stick::BOTH.map(|s| self.histogram(s).to_vec()),
            slack_available: Stick::BOTH.map(|s| self.slack_available(s)),
            slack_used: [self.slack[0].used, self.slack[1].used],
        }
    }

    fn queue_write(&self) -> FinetuneEffect {
        FinetuneEffect {
            write: (!self.is_malformed()).then(|| self.params.clone()),
            warning: None,
        }
    }
}

/// Quadrant a deflected stick points into (+y is down).
pub fn quadrant_of(x: f64, y: f64) -> Quadrant {
    if x.abs() > y.abs() {
        if x > 0.0 {
            Quadrant::Right
        } else {
            Quadrant::Left
        }
    } else if y > 0.0 {
        Quadrant::Down
    } else {
        Quadrant::Up
    }
}

fn center_binding(button: Button) -> Option<(Target, Direction)> {
    Some(match button {
        Button::Left | Button::Square => (Target::Center(Axis::X), Direction::Increase),
        Button::Right | Button::Circle => (Target::Center(Axis::X), Direction::Decrease),
        Button::Up | Button::Triangle => (Target::Center(Axis::Y), Direction::Increase),
        Button::Down | Button::Cross => (Target::Center(Axis::Y), Direction::Decrease),
        _ => return None,
    })
}

fn limit_binding(quadrant: Quadrant, button: Button) -> Option<(Target, Direction)> {
    let direction = if quadrant.is_horizontal() {
        match button {
            Button::Left | Button::Square => Direction::Increase,
            Button::Right | Button::Circle => Direction::Decrease,
            _ => return None,
        }
    } else {
        match button {
            Button::Up | Button::Triangle => Direction::Increase,
            Button::Down | Button::Cross => Direction::Decrease,
            _ => return None,
        }
    };
    Some((Target::Limit(quadrant), direction))
}

async fn ensure_locked<D: CalibrationDevice>(device: &mut D) -> Result<()> {
    let mut lock = device.query_lock_state().await?;
    if !lock.locked {
        device.set_lock(true).await?;
        lock = device.query_lock_state().await?;
        if !lock.locked {
            return Err(CalibError::PreconditionFailed(format!(
                "cannot lock NVS (0x{:08x})",
                lock.raw
            )));
        }
    }
    if lock.status != LockStatus::Locked {
        return Err(CalibError::PreconditionFailed(format!(
            "unexpected NVS status {:?} (0x{:08x})",
            lock.status, lock.raw
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::device::fake::FakeDevice;
    use crate::finetune::params::PARAM_COUNT;

    fn cfg() -> FinetuneConfig {
        FinetuneConfig::default()
    }

    fn engine_with(values: [u32; PARAM_COUNT], max: u32) -> FinetuneEngine {
        let set = ParameterSet::new(values);
        FinetuneEngine::with_params(set.clone(), Some(set), PARAM_COUNT, max, &cfg())
    }

    fn frame(left: (f64, f64), right: (f64, f64), buttons: &[&str]) -> InputFrame {
        InputFrame {
            timestamp: 0.0,
            left: StickSample::new(left.0, left.1),
            right: StickSample::new(right.0, right.1),
            buttons: ButtonState::from_names(buttons.iter().copied()),
        }
    }

    fn spin(engine: &mut FinetuneEngine, stick: Stick) {
        for i in 0..64 {
            let a = PolarHistogram::<64>::bucket_angle(i);
            engine.on_sample(stick, StickSample::new(a.cos(), a.sin()));
        }
    }

    #[tokio::test]
    async fn test_open_reads_set() {
        let mut dev = FakeDevice::new();
        let engine = FinetuneEngine::open(&mut dev, &cfg()).await.unwrap();
        assert_eq!(engine.params().values(), &[1000; PARAM_COUNT]);
        assert!(!engine.is_malformed());
        assert_eq!(engine.step_size(), 5);
        assert_eq!(dev.calls, vec!["lock_query", "max_value", "read"]);
    }

    #[tokio::test]
    async fn test_open_takes_lock() {
        let mut dev = FakeDevice::unlocked();
        FinetuneEngine::open(&mut dev, &cfg()).await.unwrap();
        assert_eq!(dev.calls[..3], ["lock_query", "lock_set", "lock_query"]);
    }

    #[tokio::test]
    async fn test_open_fails_when_lock_does_not_stick() {
        let mut dev = FakeDevice::unlocked();
        dev.lock_sticks = false;
        let err = FinetuneEngine::open(&mut dev, &cfg()).await.err().unwrap();
        assert_eq!(
            err,
            CalibError::PreconditionFailed("cannot lock NVS (0x00000001)".into())
        );
        assert_eq!(dev.count("read"), 0);
    }

    #[tokio::test]
    async fn test_open_fails_when_lock_request_fails() {
        let mut dev = FakeDevice::unlocked();
        dev.fail_on = Some("lock_set");
        let err = FinetuneEngine::open(&mut dev, &cfg()).await.err().unwrap();
        assert!(matches!(err, CalibError::DeviceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_open_rejects_odd_status() {
        let mut dev = FakeDevice::new();
        dev.lock.status = LockStatus::Unknown;
        let err = FinetuneEngine::open(&mut dev, &cfg()).await.err().unwrap();
        assert!(matches!(err, CalibError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn test_malformed_read_opens_degraded() {
        let mut dev = FakeDevice::new();
        dev.params = vec![500; 11];
        let mut engine = FinetuneEngine::open(&mut dev, &cfg()).await.unwrap();
        assert!(engine.is_malformed());
        assert_eq!(engine.params().get(ParamId::RY), 0);

        let effect = engine
            .apply_step(Stick::Left, Target::Center(Axis::X), Direction::Increase, 5)
            .unwrap();
        assert_eq!(effect.write, None);
        assert_eq!(engine.commit(), Err(CalibError::MalformedParameterSet(11)));
        assert_eq!(engine.cancel(), None);
    }

    #[test]
    fn test_apply_step_saturates() {
        let mut engine = engine_with([60000; PARAM_COUNT], 65535);
        let effect = engine
            .apply_step(Stick::Left, Target::Center(Axis::X), Direction::Increase, 5)
            .unwrap();
        assert_eq!(engine.params().get(ParamId::LX), 60005);
        assert_eq!(effect.write.unwrap().get(ParamId::LX), 60005);

        engine
            .apply_step(Stick::Left, Target::Center(Axis::X), Direction::Increase, 10000)
            .unwrap();
        assert_eq!(engine.params().get(ParamId::LX), 65535);
        // Only the one parameter moved.
        assert_eq!(engine.params().get(ParamId::LY), 60000);
    }

    #[test]
    fn test_apply_step_wrong_mode_does_not_mutate() {
        let mut engine = engine_with([1000; PARAM_COUNT], 65535);
        let before = engine.params().clone();
        let err = engine
            .apply_step(Stick::Right, Target::Limit(Quadrant::Up), Direction::Increase, 5)
            .unwrap_err();
        assert!(matches!(err, CalibError::InvalidMode(_)));
        assert_eq!(engine.params(), &before);

        engine.set_mode(FinetuneMode::Circularity);
        engine
            .apply_step(Stick::Right, Target::Limit(Quadrant::Up), Direction::Decrease, 5)
            .unwrap();
        assert_eq!(engine.params().get(ParamId::RT), 995);
        assert!(engine
            .apply_step(Stick::Right, Target::Center(Axis::Y), Direction::Decrease, 5)
            .is_err());
    }

    #[test]
    fn test_quadrant_of() {
        assert_eq!(quadrant_of(0.9, 0.1), Quadrant::Right);
        assert_eq!(quadrant_of(-0.9, 0.1), Quadrant::Left);
        assert_eq!(quadrant_of(0.1, 0.9), Quadrant::Down);
        assert_eq!(quadrant_of(0.1, -0.9), Quadrant::Up);
        assert_eq!(quadrant_of(0.5, 0.5), Quadrant::Down);
    }

    #[test]
    fn test_step_size_per_mode() {
        let mut engine = engine_with([1000; PARAM_COUNT], 65535);
        engine.set_step_size(20);
        engine.set_mode(FinetuneMode::Circularity);
        assert_eq!(engine.step_size(), 5);
        engine.set_mode(FinetuneMode::Center);
        assert_eq!(engine.step_size(), 20);
    }

    #[test]
    fn test_active_stick_follows_movement() {
        let mut engine = engine_with([1000; PARAM_COUNT], 65535);
        let now = Instant::now();
        engine.handle_input(&frame((0.0, 0.0), (0.5, 0.0), &[]), now);
        assert_eq!(engine.active_stick(), Some(Stick::Right));
        engine.handle_input(&frame((0.0, 0.0), (0.0, 0.0), &[]), now);
        assert_eq!(engine.active_stick(), Some(Stick::Right));
        engine.handle_input(&frame((0.3, 0.0), (0.0, 0.0), &[]), now);
        assert_eq!(engine.active_stick(), Some(Stick::Left));
        engine.handle_input(&frame((0.3, 0.0), (0.0, 0.4), &[]), now);
        assert_eq!(engine.active_stick(), None);
    }

    #[test]
    fn test_shoulder_buttons_switch_mode() {
        let mut engine = engine_with([1000; PARAM_COUNT], 65535);
        let now = Instant::now();
        engine.handle_input(&frame((0.0, 0.0), (0.0, 0.0), &["r1"]), now);
        assert_eq!(engine.mode(), FinetuneMode::Circularity);
        engine.handle_input(&frame((0.0, 0.0), (0.0, 0.0), &["l1"]), now);
        assert_eq!(engine.mode(), FinetuneMode::Center);
    }

    #[test]
    fn test_center_press_fires_and_repeats() {
        let mut engine = engine_with([1000; PARAM_COUNT], 65535);
        let t0 = Instant::now();
        let ms = |n| t0 + Duration::from_millis(n);

        // Nudge the left stick to select it, then let it rest.
        engine.handle_input(&frame((0.3, 0.0), (0.0, 0.0), &[]), t0);
        let effect = engine.handle_input(&frame((0.1, 0.0), (0.0, 0.0), &["square"]), t0);
        assert_eq!(effect.write.unwrap().get(ParamId::LX), 1005);
        assert_eq!(engine.next_repeat_deadline(), Some(ms(400)));

        assert!(engine.fire_repeat(ms(399)).is_none());
        assert!(engine.fire_repeat(ms(400)).is_some());
        assert!(engine.fire_repeat(ms(550)).is_some());
        assert_eq!(engine.params().get(ParamId::LX), 1015);

        engine.handle_input(&frame((0.1, 0.0), (0.0, 0.0), &[]), ms(600));
        assert_eq!(engine.next_repeat_deadline(), None);
        assert!(engine.fire_repeat(ms(700)).is_none());
        assert_eq!(engine.params().get(ParamId::LX), 1015);
    }

    #[test]
    fn test_center_press_off_center_warns() {
        let mut engine = engine_with([1000; PARAM_COUNT], 65535);
        let now = Instant::now();
        let effect = engine.handle_input(&frame((0.0, 0.8), (0.0, 0.0), &["down"]), now);
        assert_eq!(effect.warning, Some(FinetuneWarning::StickNotCentered));
        assert_eq!(effect.write, None);
        assert_eq!(engine.params().get(ParamId::LY), 1000);
    }

    #[test]
    fn test_circularity_press_moves_quadrant_limit() {
        let mut engine = engine_with([1000; PARAM_COUNT], 65535);
        engine.set_mode(FinetuneMode::Circularity);
        let now = Instant::now();

        // Right stick pushed up (-y), triangle widens the top limit.
        let effect = engine.handle_input(&frame((0.0, 0.0), (0.0, -1.0), &["triangle"]), now);
        assert_eq!(effect.write.unwrap().get(ParamId::RT), 1005);

        // Horizontal buttons do nothing in a vertical quadrant.
        let mut engine = engine_with([1000; PARAM_COUNT], 65535);
        engine.set_mode(FinetuneMode::Circularity);
        let effect = engine.handle_input(&frame((0.0, 0.0), (0.0, -1.0), &["square"]), now);
        assert_eq!(effect.write, None);
    }

    #[test]
    fn test_circularity_requires_extreme() {
        let mut engine = engine_with([1000; PARAM_COUNT], 65535);
        engine.set_mode(FinetuneMode::Circularity);
        let effect = engine.handle_input(&frame((0.7, 0.7), (0.0, 0.0), &["left"]), Instant::now());
        assert_eq!(effect.warning, Some(FinetuneWarning::StickNotAtExtreme));
        assert_eq!(engine.params(), &ParameterSet::new([1000; PARAM_COUNT]));
    }

    #[test]
    fn test_repeat_stops_when_stick_leaves_edge() {
        let mut engine = engine_with([1000; PARAM_COUNT], 65535);
        engine.set_mode(FinetuneMode::Circularity);
        let t0 = Instant::now();

        engine.handle_input(&frame((1.0, 0.0), (0.0, 0.0), &["circle"]), t0);
        assert_eq!(engine.params().get(ParamId::LR), 995);
        assert!(engine.next_repeat_deadline().is_some());

        // Still extreme, but x fell below the edge.
        engine.handle_input(&frame((0.9, 0.0), (0.0, 0.0), &["circle"]), t0);
        assert_eq!(engine.next_repeat_deadline(), None);
    }

    #[test]
    fn test_repeat_stops_on_mode_change() {
        let mut engine = engine_with([1000; PARAM_COUNT], 65535);
        let t0 = Instant::now();
        engine.handle_input(&frame((0.3, 0.0), (0.0, 0.0), &[]), t0);
        engine.handle_input(&frame((0.0, 0.0), (0.0, 0.0), &["up"]), t0);
        assert!(engine.next_repeat_deadline().is_some());
        engine.handle_input(&frame((0.0, 0.0), (0.0, 0.0), &["up", "r1"]), t0);
        assert_eq!(engine.next_repeat_deadline(), None);
    }

    #[test]
    fn test_fired_adjustment_clears_histograms() {
        let mut engine = engine_with([1000; PARAM_COUNT], 65535);
        engine.on_sample(Stick::Left, StickSample::new(0.5, 0.0));
        engine
            .apply_step(Stick::Left, Target::Center(Axis::Y), Direction::Decrease, 5)
            .unwrap();
        assert!(engine.histogram(Stick::Left).values().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_slack_half_position() {
        let mut engine = engine_with([1000; PARAM_COUNT], 65535);
        engine.set_mode(FinetuneMode::Circularity);
        spin(&mut engine, Stick::Left);

        let total = engine.apply_slack(Stick::Left, 50.0).unwrap();
        assert_eq!(total, 87.5);
        assert_eq!(engine.params().get(ParamId::LL), 1087);
        assert_eq!(engine.params().get(ParamId::LT), 1087);
        assert_eq!(engine.params().get(ParamId::LR), 912);
        assert_eq!(engine.params().get(ParamId::LB), 912);

        let effect = engine.release_slack(Stick::Left).unwrap();
        assert_eq!(effect.write.unwrap().get(ParamId::LL), 1087);
        assert!(engine.view().slack_used[0]);
        assert!(!engine.slack_available(Stick::Left));

        let effect = engine.reset_slack(Stick::Left).unwrap();
        assert_eq!(effect.write.unwrap(), ParameterSet::new([1000; PARAM_COUNT]));
        assert!(!engine.view().slack_used[0]);
    }

    #[test]
    fn test_leaving_circularity_drops_slack_undo() {
        let mut engine = engine_with([1000; PARAM_COUNT], 65535);
        engine.set_mode(FinetuneMode::Circularity);
        spin(&mut engine, Stick::Right);
        engine.apply_slack(Stick::Right, 100.0).unwrap();
        engine.release_slack(Stick::Right).unwrap();
        assert!(engine.view().slack_used[1]);

        engine.set_mode(FinetuneMode::Center);
        engine.set_mode(FinetuneMode::Circularity);
        assert_eq!(engine.view().slack_used, [false, false]);
        // The released values stay.
        assert_eq!(engine.params().get(ParamId::RL), 1175);
    }

    #[test]
    fn test_press_right_after_open_adjusts_left_stick() {
        let mut engine = engine_with([1000; PARAM_COUNT], 65535);
        assert_eq!(engine.active_stick(), Some(Stick::Left));
        let effect = engine.handle_input(&frame((0.0, 0.0), (0.0, 0.0), &["right"]), Instant::now());
        assert_eq!(effect.write.unwrap().get(ParamId::LX), 995);
    }

    #[test]
    fn test_slack_needs_circularity_and_full_histogram() {
        let mut engine = engine_with([1000; PARAM_COUNT], 65535);
        spin(&mut engine, Stick::Right);
        assert!(matches!(
            engine.apply_slack(Stick::Right, 10.0),
            Err(CalibError::InvalidMode(_))
        ));

        engine.set_mode(FinetuneMode::Circularity);
        assert!(matches!(
            engine.begin_slack(Stick::Right),
            Err(CalibError::HistogramIncomplete(Stick::Right))
        ));
    }

    #[test]
    fn test_commit_and_cancel() {
        let mut engine = engine_with([1000; PARAM_COUNT], 65535);
        engine.set_parameter(ParamId::RX, 70000);
        assert_eq!(engine.params().get(ParamId::RX), 65535);
        assert_eq!(engine.commit().unwrap().get(ParamId::RX), 65535);

        let restored = engine.cancel().unwrap();
        assert_eq!(restored, ParameterSet::new([1000; PARAM_COUNT]));
        assert_eq!(engine.params(), &restored);
    }

    #[tokio::test]
    async fn test_reload_keeps_original() {
        let mut dev = FakeDevice::new();
        let mut engine = FinetuneEngine::open(&mut dev, &cfg()).await.unwrap();
        dev.params = vec![2000; PARAM_COUNT];
        engine.reload(&mut dev).await.unwrap();
        assert_eq!(engine.params().get(ParamId::LX), 2000);
        assert_eq!(engine.cancel(), Some(ParameterSet::new([1000; PARAM_COUNT])));
    }
}
