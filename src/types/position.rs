//! Coordinates, servo angles and report types.

use crate::protocol::command::{Button, Servo};

/// Cartesian position of the end effector in millimeters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
    /// Wrist rotation, present in position reports.
    pub r: Option<f64>,
}

impl Position {
    /// Creates a position without the extra axis.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z, r: None }
    }

    /// Sets the extra axis.
    #[must_use]
    pub const fn with_r(mut self, r: f64) -> Self {
        self.r = Some(r);
        self
    }
}

/// Polar position: rotation in degrees, stretch and height in millimeters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Polar {
    /// Base rotation.
    pub rotation: f64,
    /// Horizontal distance from the base.
    pub stretch: f64,
    /// Height.
    pub height: f64,
}

/// Angles of all four servos in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoAngles {
    /// Base servo.
    pub bottom: f64,
    /// Left servo.
    pub left: f64,
    /// Right servo.
    pub right: f64,
    /// Wrist servo.
    pub hand: f64,
}

impl ServoAngles {
    /// Returns the angle of a single servo.
    #[must_use]
    pub const fn get(&self, servo: Servo) -> f64 {
        match servo {
            Servo::Bottom => self.bottom,
            Servo::Left => self.left,
            Servo::Right => self.right,
            Servo::Hand => self.hand,
        }
    }
}

/// A button event pushed by the device while button reporting is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonReport {
    /// Which button.
    pub button: Button,
    /// Raw state value reported by the firmware.
    pub state: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_servo_angles_get() {
        let angles = ServoAngles {
            bottom: 1.0,
            left: 2.0,
            right: 3.0,
            hand: 4.0,
        };
        assert!((angles.get(Servo::Right) - 3.0).abs() < f64::EPSILON);
        assert!((angles.get(Servo::Hand) - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_position_with_r() {
        let pos = Position::new(1.0, 2.0, 3.0).with_r(90.0);
        assert_eq!(pos.r, Some(90.0));
    }
}
