//! Guided calibration sessions that drive the device's own routines.

pub mod center;
pub mod range;

pub use center::{auto_calibrate, CalibrationStep, CenterCalibrationWizard};
pub use range::{RangeCalibrationSession, RangeView};
