//! Range (rotation) calibration.
//!
//! The user rotates both sticks along their outer edge while the device
//! records the extremes. We only watch: each time a stick's histogram is
//! almost fully at the edge, that counts as one rotation and the histogram
//! starts over. The Done control unlocks once both sticks have enough
//! rotations or the countdown runs out, whichever comes first.

use serde::Serialize;
use tracing::info;

use crate::config::RangeConfig;
use crate::device::CalibrationDevice;
use crate::error::{CalibError, Result};
use crate::histogram::{PolarHistogram, HISTOGRAM_SIZE};
use crate::input::{Stick, StickSample};

/// Nudges shown while the user is not rotating enough.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeHint {
    None,
    ShowAlert,
    KeepRotating,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RangeView {
    pub left_cycles: u32,
    pub right_cycles: u32,
    pub progress: u32,
    pub seconds_remaining: u32,
    pub unlocked: bool,
    pub hint: RangeHint,
    pub histograms: [Vec<f64>; 2],
}

pub struct RangeCalibrationSession<const N: usize = HISTOGRAM_SIZE> {
    histograms: [PolarHistogram<N>; 2],
    cycles: [u32; 2],
    seconds_remaining: u32,
    seconds_elapsed: u32,
    unlocked: bool,
    hint: RangeHint,
    cfg: RangeConfig,
}

impl<const N: usize> RangeCalibrationSession<N> {
    /// Tell the device to start recording, then start watching.
    pub async fn open<D: CalibrationDevice>(device: &mut D, cfg: &RangeConfig) -> Result<Self> {
        device.begin_range_calibration().await?;
        info!("[RANGE] Started, {} rotations per stick", cfg.required_cycles);
        Ok(Self::new(cfg))
    }

    fn new(cfg: &RangeConfig) -> Self {
        Self {
            histograms: [PolarHistogram::new(), PolarHistogram::new()],
            cycles: [0; 2],
            seconds_remaining: cfg.unlock_seconds,
            seconds_elapsed: 0,
            unlocked: false,
            hint: RangeHint::None,
            cfg: cfg.clone(),
        }
    }

    pub fn on_sample(&mut self, stick: Stick, sample: StickSample) {
        self.histograms[stick.index()].sample(sample.x, sample.y);
    }

    /// Count completed rotations. Returns true if this poll unlocked.
    pub fn poll(&mut self) -> bool {
        for stick in Stick::BOTH {
            let h = &mut self.histograms[stick.index()];
            if h.fill_ratio(self.cfg.extreme_threshold) >= self.cfg.fill_threshold {
                h.reset();
                self.cycles[stick.index()] += 1;
                info!("[RANGE] {stick} stick rotation {}", self.cycles[stick.index()]);
            }
        }
        self.check_unlock()
    }

    /// One second of countdown. Returns true if this tick unlocked.
    pub fn tick_countdown(&mut self) -> bool {
        if self.unlocked {
            return false;
        }
        self.seconds_remaining = self.seconds_remaining.saturating_sub(1);
        self.seconds_elapsed += 1;
        if self.check_unlock() {
            return true;
        }

        let behind = Stick::BOTH.iter().any(|s| self.cycle_progress(*s) < 10.0);
        let hint = match self.seconds_elapsed {
            e if e >= 7 && behind => RangeHint::KeepRotating,
            e if e >= 5 && behind => RangeHint::ShowAlert,
            _ => RangeHint::None,
        };
        self.hint = self.hint.max(hint);
        false
    }

    fn check_unlock(&mut self) -> bool {
        if self.unlocked {
            return false;
        }
        let cycle_total: f64 = Stick::BOTH.iter().map(|s| self.cycle_progress(*s)).sum();
        if self.seconds_remaining == 0 || cycle_total >= 100.0 {
            self.unlocked = true;
            self.seconds_remaining = 0;
            self.hint = RangeHint::None;
            info!("[RANGE] Unlocked");
            return true;
        }
        false
    }

    fn required(&self) -> f64 {
        f64::from(self.cfg.required_cycles.max(1))
    }

    /// Completed-rotation share of a stick's half of the bar (0..=50).
    pub fn cycle_progress(&self, stick: Stick) -> f64 {
        (f64::from(self.cycles[stick.index()]) / self.required()).min(1.0) * 50.0
    }

    /// Rotation share plus the partial fill of the rotation in progress.
    pub fn stick_progress(&self, stick: Stick) -> f64 {
        let filled = self.histograms[stick.index()].fill_count(self.cfg.extreme_threshold);
        let partial = filled as f64 / N as f64 * (50.0 / self.required());
        (self.cycle_progress(stick) + partial).min(50.0)
    }

    /// Overall progress, 0..=100.
    pub fn progress(&self) -> u32 {
        (self.stick_progress(Stick::Left) + self.stick_progress(Stick::Right)).round() as u32
    }

    pub fn cycles(&self, stick: Stick) -> u32 {
        self.cycles[stick.index()]
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    pub fn seconds_remaining(&self) -> u32 {
        self.seconds_remaining
    }

    pub fn hint(&self) -> RangeHint {
        self.hint
    }

    /// Store the calibration. Refused until unlocked; the caller drops the
    /// session (and its timers) once this returns anything else.
    pub async fn finish<D: CalibrationDevice>(&self, device: &mut D) -> Result<String> {
        if !self.unlocked {
            return Err(CalibError::NotUnlocked(self.seconds_remaining));
        }
        let result = device.end_range_calibration().await?;
        info!("[RANGE] Finished: {}", result.message);
        Ok(result.message)
    }

    pub fn view(&self) -> RangeView {
        RangeView {
            left_cycles: self.cycles(Stick::Left),
            right_cycles: self.cycles(Stick::Right),
            progress: self.progress(),
            seconds_remaining: self.seconds_remaining(),
            unlocked: self.is_unlocked(),
            hint: self.hint(),
            histograms: [self.histograms[0].to_vec(), self.histograms[1].to_vec()],
        }
    }
}
