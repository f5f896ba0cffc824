//! In-memory device for tests: records every round-trip and can be told to
//! fail a named operation.

use super::{CalibrationDevice, LockState, LockStatus, RangeCalibrationResult};
use crate::error::{CalibError, Result};
use crate::finetune::params::ParameterSet;

pub struct FakeDevice {
    pub calls: Vec<&'static str>,
    pub params: Vec<u32>,
    pub writes: Vec<ParameterSet>,
    pub lock: LockState,
    /// Whether `set_lock(true)` actually locks.
    pub lock_sticks: bool,
    pub max_value: u32,
    pub fail_on: Option<&'static str>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            params: vec![1000; 12],
            writes: Vec::new(),
            lock: LockState {
                locked: true,
                status: LockStatus::Locked,
                raw: 0,
            },
            lock_sticks: true,
            max_value: 65535,
            fail_on: None,
        }
    }

    pub fn unlocked() -> Self {
        let mut dev = Self::new();
        dev.lock = LockState {
            locked: false,
            status: LockStatus::Unlocked,
            raw: 0x0000_0001,
        };
        dev
    }

    fn call(&mut self, op: &'static str) -> Result<()> {
        self.calls.push(op);
        if self.fail_on == Some(op) {
            return Err(CalibError::DeviceUnavailable(format!("{op} failed")));
        }
        Ok(())
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls.iter().filter(|c| **c == op).count()
    }
}

impl CalibrationDevice for FakeDevice {
    async fn read_parameter_set(&mut self) -> Result<Vec<u32>> {
        self.call("read")?;
        Ok(self.params.clone())
    }

    async fn write_parameter_set(&mut self, set: &ParameterSet) -> Result<()> {
        self.call("write")?;
        self.params = set.values().to_vec();
        self.writes.push(set.clone());
        Ok(())
    }

    async fn begin_center_calibration(&mut self) -> Result<()> {
        self.call("center_begin")
    }

    async fn sample_center_calibration(&mut self) -> Result<()> {
        self.call("center_sample")
    }

    async fn end_center_calibration(&mut self) -> Result<()> {
        self.call("center_end")
    }

    async fn begin_range_calibration(&mut self) -> Result<()> {
        self.call("range_begin")
    }

    async fn end_range_calibration(&mut self) -> Result<RangeCalibrationResult> {
        self.call("range_end")?;
        Ok(RangeCalibrationResult {
            message: "Range calibration completed".into(),
        })
    }

    async fn query_lock_state(&mut self) -> Result<LockState> {
        self.call("lock_query")?;
        Ok(self.lock)
    }

    async fn set_lock(&mut self, locked: bool) -> Result<()> {
        self.call("lock_set")?;
        if self.lock_sticks {
            self.lock = LockState {
                locked,
                status: if locked {
                    LockStatus::Locked
                } else {
                    LockStatus::Unlocked
                },
                raw: 0,
            };
        }
        Ok(())
    }

    async fn max_parameter_value(&mut self) -> Result<u32> {
        self.call("max_value")?;
        Ok(self.max_value)
    }
}
