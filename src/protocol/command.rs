//! Command payloads for the uArm protocol.
//!
//! Commands are G-code style tokens followed by tagged arguments, e.g.
//! `G0 X10.00Y20.00Z5.00S300.00`. The sequence id framing is added by
//! [`crate::protocol::encode_frame`].

/// Query the firmware version. Response: `OK V<version>`.
pub const GET_FIRMWARE_VERSION: &str = "P2203";
/// Query the hardware version. Response: `OK V<version>`.
pub const GET_HARDWARE_VERSION: &str = "P2202";
/// Query cartesian coordinates. Response: `OK X.. Y.. Z..`.
pub const GET_COORDINATE: &str = "P2220";
/// Query polar coordinates. Response: `OK S.. R.. H..`.
pub const GET_POLAR: &str = "P2221";
/// Query all servo angles. Response: `OK B.. L.. R.. H..`.
pub const GET_SERVO_ANGLE: &str = "P2200";
/// Query the moving status. Response: `OK V0|V1`.
pub const GET_IS_MOVING: &str = "M2200";
/// Query the tip sensor. Response: `OK V0|V1`.
pub const GET_TIP_SENSOR: &str = "P2233";

/// Servo motors, by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Servo {
    /// Base rotation servo.
    Bottom = 0,
    /// Left arm servo.
    Left = 1,
    /// Right arm servo.
    Right = 2,
    /// Wrist servo.
    Hand = 3,
}

impl Servo {
    /// All servos in index order.
    pub const ALL: [Self; 4] = [Self::Bottom, Self::Left, Self::Right, Self::Hand];

    /// Attempts to parse a servo from its index.
    #[must_use]
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Bottom),
            1 => Some(Self::Left),
            2 => Some(Self::Right),
            3 => Some(Self::Hand),
            _ => None,
        }
    }
}

impl From<Servo> for u8 {
    fn from(servo: Servo) -> Self {
        servo as Self
    }
}

/// EEPROM cell encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EepromDataType {
    /// Single byte.
    Byte = 1,
    /// 16-bit signed integer.
    Integer = 2,
    /// 32-bit float.
    Float = 4,
}

impl From<EepromDataType> for u8 {
    fn from(data_type: EepromDataType) -> Self {
        data_type as Self
    }
}

/// Physical buttons on the arm base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Button {
    /// Menu button.
    Menu = 0,
    /// Play button.
    Play = 1,
}

impl Button {
    /// Attempts to parse a button from its index.
    #[must_use]
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Menu),
            1 => Some(Self::Play),
            _ => None,
        }
    }
}

/// Highest valid EEPROM address.
pub const EEPROM_MAX_ADDRESS: u16 = 2048;

/// Moves to a cartesian position, absolute or relative to the current one.
#[must_use]
pub fn set_position(x: f64, y: f64, z: f64, speed: f64, relative: bool) -> String {
    let code = if relative { "G2204" } else { "G0" };
    format!("{code} X{x:.2}Y{y:.2}Z{z:.2}S{speed:.2}")
}

/// Moves to a polar position.
#[must_use]
pub fn set_polar(stretch: f64, rotation: f64, height: f64, speed: f64) -> String {
    format!("G2201 S{stretch:.2}R{rotation:.2}H{height:.2}F{speed:.2}")
}

/// Sets a servo angle in degrees.
#[must_use]
pub fn set_servo_angle(servo: Servo, angle: f64) -> String {
    format!("G2202 N{}V{angle:.2}", u8::from(servo))
}

/// Turns the pump on or off.
#[must_use]
pub fn set_pump(on: bool) -> String {
    format!("M2231 V{}", u8::from(on))
}

/// Closes or opens the gripper.
#[must_use]
pub fn set_gripper(catch: bool) -> String {
    format!("M2232 V{}", u8::from(catch))
}

/// Sounds the buzzer at `frequency` Hz for `duration` seconds.
#[must_use]
pub fn set_buzzer(frequency: u32, duration: f64) -> String {
    format!("M2210 F{frequency}T{duration:.2}")
}

/// Attaches (locks) a servo.
#[must_use]
pub fn attach_servo(servo: Servo) -> String {
    format!("M2201 N{}", u8::from(servo))
}

/// Detaches (releases) a servo.
#[must_use]
pub fn detach_servo(servo: Servo) -> String {
    format!("M2202 N{}", u8::from(servo))
}

/// Enables periodic position reports every `interval` seconds; 0 disables.
#[must_use]
pub fn set_report_position(interval: f64) -> String {
    format!("M2120 V{interval:.2}")
}

/// Enables or disables button reports.
#[must_use]
pub fn set_report_button(enabled: bool) -> String {
    format!("M2213 V{}", u8::from(enabled))
}

/// Reads an analog pin.
#[must_use]
pub fn get_analog(pin: u8) -> String {
    format!("P2241 N{pin}")
}

/// Reads a digital pin.
#[must_use]
pub fn get_digital(pin: u8) -> String {
    format!("P2240 N{pin}")
}

/// Reads an EEPROM cell.
#[must_use]
pub fn get_eeprom(address: u16, data_type: EepromDataType) -> String {
    format!("M2211 N0A{address}T{}", u8::from(data_type))
}

/// Writes an EEPROM cell. `value` is already rendered for the data type.
#[must_use]
pub fn set_eeprom(address: u16, data_type: EepromDataType, value: &str) -> String {
    format!("M2212 N0A{address}T{}V{value}", u8::from(data_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_position_payload() {
        assert_eq!(
            set_position(10.0, 20.0, 5.0, 300.0, false),
            "G0 X10.00Y20.00Z5.00S300.00"
        );
        assert_eq!(
            set_position(-1.234, 0.0, 2.5, 100.0, true),
            "G2204 X-1.23Y0.00Z2.50S100.00"
        );
    }

    #[test]
    fn test_io_payloads() {
        assert_eq!(set_pump(true), "M2231 V1");
        assert_eq!(set_gripper(false), "M2232 V0");
        assert_eq!(set_servo_angle(Servo::Hand, 90.0), "G2202 N3V90.00");
        assert_eq!(set_report_position(0.05), "M2120 V0.05");
        assert_eq!(get_eeprom(100, EepromDataType::Float), "M2211 N0A100T4");
        assert_eq!(
            set_eeprom(7, EepromDataType::Byte, "42"),
            "M2212 N0A7T1V42"
        );
    }

    #[test]
    fn test_enum_values() {
        assert_eq!(Servo::Bottom as u8, 0);
        assert_eq!(Servo::Hand as u8, 3);
        assert_eq!(Servo::from_index(2), Some(Servo::Right));
        assert_eq!(Servo::from_index(4), None);
        assert_eq!(EepromDataType::Integer as u8, 2);
        assert_eq!(Button::from_index(1), Some(Button::Play));
    }
}
