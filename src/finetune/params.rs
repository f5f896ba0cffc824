//! The 12-value finetune parameter set.
//!
//! Device order is fixed:
//!   LL LT RL RT  (left limit / top limit, left stick then right stick)
//!   LR LB RR RB  (right limit / bottom limit)
//!   LX LY RX RY  (raw centers)
//! The first letter names the stick, the second the axis limit or center.

use std::fmt;

use serde::Serialize;

use crate::error::{CalibError, Result};
use crate::input::Stick;

pub const PARAM_COUNT: usize = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamId {
    LL,
    LT,
    RL,
    RT,
    LR,
    LB,
    RR,
    RB,
    LX,
    LY,
    RX,
    RY,
}

/// Circularity-mode quadrant; each maps to one axis limit per stick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Quadrant {
    Left,
    Up,
    Right,
    Down,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
}

impl ParamId {
    pub const ALL: [ParamId; PARAM_COUNT] = [
        ParamId::LL,
        ParamId::LT,
        ParamId::RL,
        ParamId::RT,
        ParamId::LR,
        ParamId::LB,
        ParamId::RR,
        ParamId::RB,
        ParamId::LX,
        ParamId::LY,
        ParamId::RX,
        ParamId::RY,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<ParamId> {
        Self::ALL.get(i).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            ParamId::LL => "LL",
            ParamId::LT => "LT",
            ParamId::RL => "RL",
            ParamId::RT => "RT",
            ParamId::LR => "LR",
            ParamId::LB => "LB",
            ParamId::RR => "RR",
            ParamId::RB => "RB",
            ParamId::LX => "LX",
            ParamId::LY => "LY",
            ParamId::RX => "RX",
            ParamId::RY => "RY",
        }
    }

    /// Axis-limit parameter for a stick's quadrant.
    pub fn limit(stick: Stick, quadrant: Quadrant) -> ParamId {
        use ParamId::*;
        match (stick, quadrant) {
            (Stick::Left, Quadrant::Left) => LL,
            (Stick::Left, Quadrant::Up) => LT,
            (Stick::Left, Quadrant::Right) => LR,
            (Stick::Left, Quadrant::Down) => LB,
            (Stick::Right, Quadrant::Left) => RL,
            (Stick::Right, Quadrant::Up) => RT,
            (Stick::Right, Quadrant::Right) => RR,
            (Stick::Right, Quadrant::Down) => RB,
        }
    }

    pub fn center(stick: Stick, axis: Axis) -> ParamId {
        match (stick, axis) {
            (Stick::Left, Axis::X) => ParamId::LX,
            (Stick::Left, Axis::Y) => ParamId::LY,
            (Stick::Right, Axis::X) => ParamId::RX,
            (Stick::Right, Axis::Y) => ParamId::RY,
        }
    }

    /// The four limits of a stick, in quadrant order L, T, R, B.
    pub fn limits_of(stick: Stick) -> [ParamId; 4] {
        Quadrant::ALL.map(|q| ParamId::limit(stick, q))
    }

    /// +1 for L/T limits, which widen the range as they grow; -1 for R/B.
    pub fn slack_sign(self) -> f64 {
        match self {
            ParamId::LL | ParamId::LT | ParamId::RL | ParamId::RT => 1.0,
            _ => -1.0,
        }
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [Quadrant::Left, Quadrant::Up, Quadrant::Right, Quadrant::Down];

    pub fn is_horizontal(self) -> bool {
        matches!(self, Quadrant::Left | Quadrant::Right)
    }
}

/// Calibration values as stored on the device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ParameterSet {
    values: [u32; PARAM_COUNT],
}

impl ParameterSet {
    pub fn new(values: [u32; PARAM_COUNT]) -> Self {
        Self { values }
    }

    /// Exactly twelve values, or `MalformedParameterSet`.
    pub fn from_slice(values: &[u32]) -> Result<Self> {
        let values: [u32; PARAM_COUNT] = values
            .try_into()
            .map_err(|_| CalibError::MalformedParameterSet(values.len()))?;
        Ok(Self::new(values))
    }

    /// Best-effort view of a short or long read: truncated or zero-padded.
    pub fn padded(values: &[u32]) -> Self {
        let mut out = [0; PARAM_COUNT];
        for (slot, v) in out.iter_mut().zip(values) {
            *slot = *v;
        }
        Self::new(out)
    }

    pub fn values(&self) -> &[u32; PARAM_COUNT] {
        &self.values
    }

    pub fn get(&self, id: ParamId) -> u32 {
        self.values[id.index()]
    }

    /// Store `value` clamped to `[0, max]`. Returns the stored value.
    pub fn set_clamped(&mut self, id: ParamId, value: i64, max: u32) -> u32 {
        let v = value.clamp(0, i64::from(max)) as u32;
        self.values[id.index()] = v;
        v
    }

    /// Add `delta`, saturating at the bounds instead of wrapping.
    pub fn adjust(&mut self, id: ParamId, delta: i64, max: u32) -> u32 {
        let current = i64::from(self.get(id));
        self.set_clamped(id, current.saturating_add(delta), max)
    }
}

impl TryFrom<Vec<u32>> for ParameterSet {
    type Error = CalibError;

    fn try_from(values: Vec<u32>) -> Result<Self> {
        Self::from_slice(&values)
    }
}
