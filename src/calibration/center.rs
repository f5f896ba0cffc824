//! Stick center calibration.
//!
//! Manual mode walks the user through the device's center routine one
//! round-trip per confirmation:
//!
//!   Start --begin--> Initializing --sample--> Sampling(1) --sample-->
//!   Sampling(2) --sample--> Sampling(3) --end--> Finalizing --> Done
//!
//! Automatic mode runs the same round-trips back to back.

use serde::Serialize;
use tracing::{info, warn};

use crate::device::CalibrationDevice;
use crate::error::Result;

/// Sampling round-trips between begin and end.
pub const SAMPLE_STEPS: u8 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "step", content = "sample", rename_all = "snake_case")]
pub enum CalibrationStep {
    Start,
    Initializing,
    Sampling(u8),
    Finalizing,
    Done,
}

impl CalibrationStep {
    /// 1-based position for the step indicator.
    pub fn number(self) -> u8 {
        match self {
            CalibrationStep::Start => 1,
            CalibrationStep::Initializing => 2,
            CalibrationStep::Sampling(n) => 2 + n,
            CalibrationStep::Finalizing => 3 + SAMPLE_STEPS,
            CalibrationStep::Done => 4 + SAMPLE_STEPS,
        }
    }
}

pub struct CenterCalibrationWizard {
    step: CalibrationStep,
}

impl Default for CenterCalibrationWizard {
    fn default() -> Self {
        Self::new()
    }
}

impl CenterCalibrationWizard {
    pub fn new() -> Self {
        Self {
            step: CalibrationStep::Start,
        }
    }

    pub fn step(&self) -> CalibrationStep {
        self.step
    }

    pub fn is_done(&self) -> bool {
        self.step == CalibrationStep::Done
    }

    /// Perform the current step's round-trip and move on. The step only
    /// advances if the round-trip succeeded.
    pub async fn advance<D: CalibrationDevice>(&mut self, device: &mut D) -> Result<CalibrationStep> {
        let next = match self.step {
            CalibrationStep::Start => {
                device.begin_center_calibration().await?;
                CalibrationStep::Initializing
            }
            CalibrationStep::Initializing => {
                device.sample_center_calibration().await?;
                CalibrationStep::Sampling(1)
            }
            CalibrationStep::Sampling(n) if n < SAMPLE_STEPS => {
                device.sample_center_calibration().await?;
                CalibrationStep::Sampling(n + 1)
            }
            CalibrationStep::Sampling(_) => {
                device.end_center_calibration().await?;
                CalibrationStep::Finalizing
            }
            CalibrationStep::Finalizing | CalibrationStep::Done => CalibrationStep::Done,
        };
        info!("[CENTER] Step {} -> {}", self.step.number(), next.number());
        self.step = next;
        Ok(next)
    }

    /// Abandon the wizard. The device is not told to store anything.
    pub fn cancel(self) {
        if !self.is_done() {
            warn!("[CENTER] Cancelled at step {}", self.step.number());
        }
    }
}

/// Run the whole routine unattended. `progress` sees 0 and 10 before the
/// first round-trip, then climbs evenly to 100.
pub async fn auto_calibrate<D, F>(device: &mut D, mut progress: F) -> Result<()>
where
    D: CalibrationDevice,
    F: FnMut(u32),
{
    progress(0);
    progress(10);

    let mut wizard = CenterCalibrationWizard::new();
    let total = u32::from(SAMPLE_STEPS) + 2;
    for k in 1..=total {
        wizard.advance(device).await?;
        progress(10 + 90 * k / total);
    }
    wizard.advance(device).await?;
    info!("[CENTER] Automatic calibration complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fake::FakeDevice;
    use crate::error::CalibError;

    #[tokio::test]
    async fn test_manual_walk() {
        let mut dev = FakeDevice::new();
        let mut w = CenterCalibrationWizard::new();
        let expected = [
            CalibrationStep::Initializing,
            CalibrationStep::Sampling(1),
            CalibrationStep::Sampling(2),
            CalibrationStep::Sampling(3),
            CalibrationStep::Finalizing,
            CalibrationStep::Done,
        ];
        for step in expected {
            assert_eq!(w.advance(&mut dev).await.unwrap(), step);
        }
        assert_eq!(
            dev.calls,
            vec!["center_begin", "center_sample", "center_sample", "center_sample", "center_end"]
        );
        assert!(w.is_done());
    }

    #[tokio::test]
    async fn test_failed_round_trip_does_not_advance() {
        let mut dev = FakeDevice::new();
        let mut w = CenterCalibrationWizard::new();
        w.advance(&mut dev).await.unwrap();
        dev.fail_on = Some("center_sample");
        let err = w.advance(&mut dev).await.unwrap_err();
        assert!(matches!(err, CalibError::DeviceUnavailable(_)));
        assert_eq!(w.step(), CalibrationStep::Initializing);
    }

    #[tokio::test]
    async fn test_cancel_never_stores() {
        let mut dev = FakeDevice::new();
        let mut w = CenterCalibrationWizard::new();
        w.advance(&mut dev).await.unwrap();
        w.advance(&mut dev).await.unwrap();
        w.cancel();
        assert_eq!(dev.count("center_end"), 0);
    }

    #[tokio::test]
    async fn test_auto_progress() {
        let mut dev = FakeDevice::new();
        let mut seen = Vec::new();
        auto_calibrate(&mut dev, |p| seen.push(p)).await.unwrap();
        assert_eq!(seen, vec![0, 10, 28, 46, 64, 82, 100]);
        assert_eq!(dev.count("center_sample"), 3);
        assert_eq!(dev.count("center_end"), 1);
    }

    #[tokio::test]
    async fn test_auto_aborts_on_failure() {
        let mut dev = FakeDevice::new();
        dev.fail_on = Some("center_end");
        let mut seen = Vec::new();
        let res = auto_calibrate(&mut dev, |p| seen.push(p)).await;
        assert!(res.is_err());
        assert_eq!(seen.last(), Some(&82));
    }

    #[test]
    fn test_step_numbers() {
        assert_eq!(CalibrationStep::Start.number(), 1);
        assert_eq!(CalibrationStep::Sampling(3).number(), 5);
        assert_eq!(CalibrationStep::Done.number(), 7);
    }
}
