//! Session configuration and the on-disk settings file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::correlation::{DEFAULT_CAPACITY, DEFAULT_RETENTION};
use crate::error::{Error, Result};
use crate::event::DEFAULT_REPORT_CAPACITY;
use crate::transport::serial::{DEFAULT_BAUD_RATE, DEFAULT_HARDWARE_ID, HardwareId, SerialConfig};

/// Default time a caller waits for a correlated response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default time to wait for the device readiness line.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Firmware `major.minor` versions accepted by default.
pub const DEFAULT_SUPPORTED_FIRMWARE: [&str; 4] = ["3.0", "3.1", "3.2", "4.0"];

fn default_supported_firmware() -> Vec<String> {
    DEFAULT_SUPPORTED_FIRMWARE
        .iter()
        .map(|v| (*v).to_string())
        .collect()
}

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Serial port path; `None` discovers the port by hardware id.
    pub port: Option<String>,
    /// Baud rate.
    pub baud_rate: u32,
    /// USB ids used for port discovery.
    pub hardware_id: HardwareId,
    /// Time a caller waits for a correlated response.
    pub timeout: Duration,
    /// Time to wait for the readiness line after opening the port.
    pub handshake_timeout: Duration,
    /// Accepted firmware `major.minor` versions.
    pub supported_firmware: Vec<String>,
    /// Reject commands until the handshake has completed.
    pub require_ready: bool,
    /// Capacity of each report queue.
    pub report_capacity: usize,
    /// How long an unclaimed response is kept.
    pub correlation_retention: Duration,
    /// Maximum number of responses kept.
    pub correlation_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            hardware_id: HardwareId::default(),
            timeout: DEFAULT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            supported_firmware: default_supported_firmware(),
            require_ready: false,
            report_capacity: DEFAULT_REPORT_CAPACITY,
            correlation_retention: DEFAULT_RETENTION,
            correlation_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Creates a configuration for the given port with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: Some(port.into()),
            ..Self::default()
        }
    }

    /// Sets the serial port.
    #[must_use]
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the USB ids used for discovery.
    #[must_use]
    pub const fn hardware_id(mut self, hardware_id: HardwareId) -> Self {
        self.hardware_id = hardware_id;
        self
    }

    /// Sets the response timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the handshake timeout.
    #[must_use]
    pub const fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Replaces the supported firmware list.
    #[must_use]
    pub fn supported_firmware<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_firmware = versions.into_iter().map(Into::into).collect();
        self
    }

    /// Rejects commands while the handshake is still running.
    #[must_use]
    pub const fn require_ready(mut self, strict: bool) -> Self {
        self.require_ready = strict;
        self
    }

    /// Sets the capacity of each report queue.
    #[must_use]
    pub const fn report_capacity(mut self, capacity: usize) -> Self {
        self.report_capacity = capacity;
        self
    }

    /// Sets the retention window of unclaimed responses.
    #[must_use]
    pub const fn correlation_retention(mut self, retention: Duration) -> Self {
        self.correlation_retention = retention;
        self
    }

    /// Returns the serial settings for this session.
    #[must_use]
    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            hardware_id: self.hardware_id,
        }
    }
}

/// Settings file contents.
///
/// Every field is optional in the file; missing ones take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub hardware_id: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub supported_firmware: Vec<String>,
    pub report_capacity: usize,
    pub require_ready: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hardware_id: DEFAULT_HARDWARE_ID.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64,
            supported_firmware: default_supported_firmware(),
            report_capacity: DEFAULT_REPORT_CAPACITY,
            require_ready: false,
        }
    }
}

impl Settings {
    /// Reads settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        let settings: Self = serde_json::from_str(&text).map_err(|e| Error::Config {
            message: format!("invalid settings in {}: {e}", path.display()),
        })?;
        tracing::debug!("loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file exists but is invalid.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("no settings at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Writes settings as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Builds a session configuration from these settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the hardware id is malformed.
    pub fn session_config(&self, port: Option<String>) -> Result<SessionConfig> {
        Ok(SessionConfig {
            port,
            baud_rate: self.baud_rate,
            hardware_id: self.hardware_id.parse()?,
            timeout: Duration::from_millis(self.timeout_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            supported_firmware: self.supported_firmware.clone(),
            require_ready: self.require_ready,
            report_capacity: self.report_capacity,
            ..SessionConfig::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_builder() {
        let config = SessionConfig::new("/dev/ttyUSB0")
            .baud_rate(9600)
            .timeout(Duration::from_millis(500))
            .supported_firmware(["2.2"])
            .require_ready(true);

        assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.supported_firmware, vec!["2.2".to_string()]);
        assert!(config.require_ready);
        assert_eq!(config.handshake_timeout, DEFAULT_HANDSHAKE_TIMEOUT);

        let serial = config.serial_config();
        assert_eq!(serial.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(serial.baud_rate, 9600);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_or_default(dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(Settings::load(dir.path().join("absent.json")).is_err());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uarm.json");
        std::fs::write(&path, r#"{ "timeout_ms": 750, "supported_firmware": ["4.0"] }"#).unwrap();

        let settings = Settings::load_or_default(&path).unwrap();
        assert_eq!(settings.timeout_ms, 750);
        assert_eq!(settings.supported_firmware, vec!["4.0".to_string()]);
        assert_eq!(settings.baud_rate, DEFAULT_BAUD_RATE);

        let config = settings.session_config(Some("COM3".into())).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(750));
        assert_eq!(config.port.as_deref(), Some("COM3"));
        assert_eq!(config.hardware_id, HardwareId::default());
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            Settings::load_or_default(&path),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.json");
        let settings = Settings {
            hardware_id: "2341:0042".into(),
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);

        let config = settings.session_config(None).unwrap();
        assert_eq!(config.hardware_id.vid, 0x2341);
    }

    #[test]
    fn test_bad_hardware_id_rejected() {
        let settings = Settings {
            hardware_id: "bogus".into(),
            ..Settings::default()
        };
        assert!(matches!(
            settings.session_config(None),
            Err(Error::Config { .. })
        ));
    }
}
