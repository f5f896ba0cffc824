//! Error kinds surfaced by the calibration engine.

use thiserror::Error;

use crate::input::Stick;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalibError {
    /// A device round-trip failed or timed out. The active session is aborted.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device could not be confirmed safe to write (lock state).
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("malformed parameter set: expected 12 values, got {0}")]
    MalformedParameterSet(usize),

    #[error("invalid mode: {0}")]
    InvalidMode(String),

    #[error("invalid stick: {0}")]
    InvalidStick(String),

    /// Only one calibration session may be open at a time.
    #[error("a {0} session is already active")]
    SessionActive(&'static str),

    #[error("no {0} session is active")]
    NoSession(&'static str),

    #[error("range calibration still locked ({0}s remaining)")]
    NotUnlocked(u32),

    #[error("{0} stick histogram is not fully populated")]
    HistogramIncomplete(Stick),
}

pub type Result<T> = std::result::Result<T, CalibError>;
