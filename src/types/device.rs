//! Device identification and EEPROM value types.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A firmware or hardware version of the form `major.minor.patch[suffix]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Patch version.
    pub patch: u32,
    /// Anything trailing the patch number, e.g. `-beta`.
    pub suffix: String,
}

impl Version {
    /// Returns `major.minor`, the part compared against the supported list.
    #[must_use]
    pub fn major_minor(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    /// Checks `major.minor` against a list of supported `major.minor` strings.
    #[must_use]
    pub fn is_supported(&self, supported: &[String]) -> bool {
        let major_minor = self.major_minor();
        supported.iter().any(|v| *v == major_minor)
    }
}

/// Splits off the leading run of ASCII digits.
fn leading_number(text: &str) -> Option<(u32, &str)> {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    if end == 0 {
        return None;
    }
    let value = text[..end].parse().ok()?;
    Some((value, &text[end..]))
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || Error::UnknownFirmwareVersion {
            response: s.to_string(),
        };
        let text = s.trim();
        let text = text
            .strip_prefix('V')
            .or_else(|| text.strip_prefix('v'))
            .unwrap_or(text);

        let (major, rest) = leading_number(text).ok_or_else(unknown)?;
        let rest = rest.strip_prefix('.').ok_or_else(unknown)?;
        let (minor, rest) = leading_number(rest).ok_or_else(unknown)?;
        let rest = rest.strip_prefix('.').ok_or_else(unknown)?;
        let (patch, suffix) = leading_number(rest).ok_or_else(unknown)?;

        Ok(Self {
            major,
            minor,
            patch,
            suffix: suffix.to_string(),
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}{}", self.major, self.minor, self.patch, self.suffix)
    }
}

/// Identification fetched once per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Serial port the device is attached to.
    pub port: String,
    /// Firmware version, if the device answered with a parsable one.
    pub firmware_version: Option<Version>,
    /// Hardware version string as reported (not always `x.y.z`).
    pub hardware_version: Option<String>,
}

/// A typed EEPROM cell value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EepromValue {
    /// Single byte.
    Byte(u8),
    /// 16-bit signed integer.
    Integer(i16),
    /// 32-bit float.
    Float(f32),
}

impl EepromValue {
    /// Returns the matching data type tag.
    #[must_use]
    pub const fn data_type(&self) -> crate::protocol::command::EepromDataType {
        use crate::protocol::command::EepromDataType;
        match self {
            Self::Byte(_) => EepromDataType::Byte,
            Self::Integer(_) => EepromDataType::Integer,
            Self::Float(_) => EepromDataType::Float,
        }
    }
}

impl fmt::Display for EepromValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Byte(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        let version: Version = "V3.1.16".parse().unwrap();
        assert_eq!(version.major, 3);
        assert_eq!(version.minor, 1);
        assert_eq!(version.patch, 16);
        assert_eq!(version.suffix, "");
        assert_eq!(version.to_string(), "3.1.16");
    }

    #[test]
    fn test_parse_version_with_suffix() {
        let version: Version = "2.2.1-beta".parse().unwrap();
        assert_eq!(version.major_minor(), "2.2");
        assert_eq!(version.suffix, "-beta");
    }

    #[test]
    fn test_parse_version_rejects_malformed() {
        assert!(matches!(
            "1.0".parse::<Version>(),
            Err(Error::UnknownFirmwareVersion { .. })
        ));
        assert!("".parse::<Version>().is_err());
        assert!("abc".parse::<Version>().is_err());
        assert!("3..1".parse::<Version>().is_err());
    }

    #[test]
    fn test_is_supported() {
        let version: Version = "3.1.0".parse().unwrap();
        assert!(version.is_supported(&["3.0".to_string(), "3.1".to_string()]));
        assert!(!version.is_supported(&["3.0".to_string()]));
        assert!(!version.is_supported(&[]));
    }

    #[test]
    fn test_eeprom_value_display() {
        assert_eq!(EepromValue::Byte(42).to_string(), "42");
        assert_eq!(EepromValue::Integer(-5).to_string(), "-5");
        assert_eq!(EepromValue::Float(1.5).to_string(), "1.5");
    }
}
