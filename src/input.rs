//! Controller input model: stick samples, button state and per-frame edges.
//!
//! Frames arrive from the browser already normalized:
//!   left/right  = stick deflection, each axis in [-1, 1] (+y is down)
//!   buttons     = names of the buttons currently held
//!   timestamp   = milliseconds from the browser's monotonic clock

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CalibError;

/// A single stick's deflection at an instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StickSample {
    pub x: f64,
    pub y: f64,
}

impl StickSample {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// True when either axis is at least `deadzone` away from center.
    pub fn is_away_from_center(&self, deadzone: f64) -> bool {
        self.x.abs() >= deadzone || self.y.abs() >= deadzone
    }

    /// Dominant axis past 0.5 with the other axis still near zero.
    pub fn is_extreme(&self) -> bool {
        let prime = self.x.abs().max(self.y.abs());
        let other = self.x.abs().min(self.y.abs());
        prime >= 0.5 && other < 0.2
    }

    /// A stick pinned in a corner (|x| + |y| == 2) means the stored range
    /// calibration is broken; a healthy stick traces a circle.
    pub fn is_saturated_corner(&self) -> bool {
        (self.x.abs() + self.y.abs() - 2.0).abs() < 1e-9
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stick {
    Left,
    Right,
}

impl Stick {
    pub const BOTH: [Stick; 2] = [Stick::Left, Stick::Right];

    pub fn index(self) -> usize {
        match self {
            Stick::Left => 0,
            Stick::Right => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stick::Left => "left",
            Stick::Right => "right",
        }
    }
}

impl fmt::Display for Stick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stick {
    type Err = CalibError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" | "l" | "L" => Ok(Stick::Left),
            "right" | "r" | "R" => Ok(Stick::Right),
            other => Err(CalibError::InvalidStick(other.to_string())),
        }
    }
}

/// Buttons the calibration UI reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Left,
    Right,
    Up,
    Down,
    Square,
    Circle,
    Triangle,
    Cross,
    L1,
    R1,
}

impl Button {
    pub const ALL: [Button; 10] = [
        Button::Left,
        Button::Right,
        Button::Up,
        Button::Down,
        Button::Square,
        Button::Circle,
        Button::Triangle,
        Button::Cross,
        Button::L1,
        Button::R1,
    ];

    /// D-pad and face buttons; these drive finetune adjustments.
    pub const NAVIGATION: [Button; 8] = [
        Button::Left,
        Button::Right,
        Button::Up,
        Button::Down,
        Button::Square,
        Button::Circle,
        Button::Triangle,
        Button::Cross,
    ];

    fn mask(self) -> u16 {
        1 << (self as u16)
    }

    pub fn from_name(name: &str) -> Option<Button> {
        Some(match name {
            "left" => Button::Left,
            "right" => Button::Right,
            "up" => Button::Up,
            "down" => Button::Down,
            "square" => Button::Square,
            "circle" => Button::Circle,
            "triangle" => Button::Triangle,
            "cross" => Button::Cross,
            "l1" => Button::L1,
            "r1" => Button::R1,
            _ => return None,
        })
    }
}

/// Held buttons packed as a bitfield.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ButtonState {
    bits: u16,
}

impl ButtonState {
    /// Build from button names, ignoring names the engine has no use for.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut state = Self::default();
        for btn in names.into_iter().filter_map(Button::from_name) {
            state.set(btn, true);
        }
        state
    }

    pub fn get(&self, btn: Button) -> bool {
        self.bits & btn.mask() != 0
    }

    pub fn set(&mut self, btn: Button, val: bool) {
        if val {
            self.bits |= btn.mask();
        } else {
            self.bits &= !btn.mask();
        }
    }

    pub fn any(&self, buttons: &[Button]) -> bool {
        buttons.iter().any(|b| self.get(*b))
    }

    /// Rising and falling edges relative to the previous frame.
    pub fn edges_from(&self, prev: &ButtonState) -> ButtonEdges {
        ButtonEdges {
            pressed: ButtonState {
                bits: self.bits & !prev.bits,
            },
            released: ButtonState {
                bits: prev.bits & !self.bits,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ButtonEdges {
    pub pressed: ButtonState,
    pub released: ButtonState,
}

/// One input report as delivered by the UI.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct InputFrame {
    pub timestamp: f64,
    pub left: StickSample,
    pub right: StickSample,
    pub buttons: ButtonState,
}

impl InputFrame {
    pub fn stick(&self, stick: Stick) -> StickSample {
        match stick {
            Stick::Left => self.left,
            Stick::Right => self.right,
        }
    }
}
