//! Device collaborator: the round-trips the engine needs from the controller.
//!
//! Byte-level encoding lives on the other side of this trait. Every call is
//! one awaited round-trip; callers hold `&mut` for its duration, so a session
//! never has two in flight.

pub mod remote;

#[cfg(test)]
pub mod fake;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::finetune::params::ParameterSet;

/// Status string reported alongside the lock flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStatus {
    Locked,
    Unlocked,
    #[serde(other)]
    Unknown,
}

/// Protected-memory lock state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    pub locked: bool,
    pub status: LockStatus,
    /// Raw status word, for diagnostics.
    #[serde(default)]
    pub raw: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeCalibrationResult {
    #[serde(default)]
    pub message: String,
}

#[allow(async_fn_in_trait)]
pub trait CalibrationDevice {
    /// Whole parameter set as stored on the device. Length is not trusted.
    async fn read_parameter_set(&mut self) -> Result<Vec<u32>>;
    async fn write_parameter_set(&mut self, set: &ParameterSet) -> Result<()>;

    async fn begin_center_calibration(&mut self) -> Result<()>;
    async fn sample_center_calibration(&mut self) -> Result<()>;
    async fn end_center_calibration(&mut self) -> Result<()>;

    async fn begin_range_calibration(&mut self) -> Result<()>;
    async fn end_range_calibration(&mut self) -> Result<RangeCalibrationResult>;

    async fn query_lock_state(&mut self) -> Result<LockState>;
    async fn set_lock(&mut self, locked: bool) -> Result<()>;

    /// Upper clamp bound for every parameter.
    async fn max_parameter_value(&mut self) -> Result<u32>;
}
