//! Data types for uArm entities.
//!
//! This module contains the core data structures used throughout the library:
//! - Coordinates and servo angles
//! - Unsolicited reports
//! - Device identification and EEPROM values

pub mod device;
pub mod position;

pub use device::{DeviceInfo, EepromValue, Version};
pub use position::{ButtonReport, Polar, Position, ServoAngles};
