//! Serial/USB transport implementation.
//!
//! This module provides serial port communication for uArm devices
//! connected via USB, and the port locator that finds them.

use std::fmt;
use std::str::FromStr;

use futures::future::BoxFuture;
use tokio_serial::{SerialPortBuilderExt, SerialPortType, SerialStream};

use crate::error::{Error, Result};
use crate::transport::{BoxedReader, BoxedWriter, Transport};

/// Default baud rate for uArm devices.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Hardware id of the FTDI bridge fitted to uArm boards.
pub const DEFAULT_HARDWARE_ID: &str = "USB VID:PID=0403:6001";

/// USB vendor/product pair identifying a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareId {
    /// USB vendor id.
    pub vid: u16,
    /// USB product id.
    pub pid: u16,
}

impl Default for HardwareId {
    fn default() -> Self {
        Self {
            vid: 0x0403,
            pid: 0x6001,
        }
    }
}

impl FromStr for HardwareId {
    type Err = Error;

    /// Parses `USB VID:PID=0403:6001` or the bare `0403:6001`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Config {
            message: format!("invalid hardware id: {s:?}"),
        };
        let ids = s
            .trim()
            .rsplit_once('=')
            .map_or(s.trim(), |(_, ids)| ids);
        let (vid, pid) = ids.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            vid: u16::from_str_radix(vid, 16).map_err(|_| invalid())?,
            pid: u16::from_str_radix(pid, 16).map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "USB VID:PID={:04X}:{:04X}", self.vid, self.pid)
    }
}

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3"). `None` picks the
    /// first port matching `hardware_id` when the transport opens.
    pub port: Option<String>,
    /// Baud rate.
    pub baud_rate: u32,
    /// USB ids used for port discovery.
    pub hardware_id: HardwareId,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: Some(port.into()),
            ..Self::auto()
        }
    }

    /// Creates a configuration that discovers the port on open.
    #[must_use]
    pub fn auto() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            hardware_id: HardwareId::default(),
        }
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
}

/// Name reported before an auto-discovered port is resolved.
const UNRESOLVED_PORT: &str = "auto";

/// Serial transport for uArm communication.
pub struct SerialTransport {
    config: SerialConfig,
    resolved: Option<String>,
    stream: Option<SerialStream>,
    open: bool,
}

impl SerialTransport {
    /// Creates a new serial transport with the given configuration.
    #[must_use]
    pub fn new(config: SerialConfig) -> Self {
        Self {
            resolved: config.port.clone(),
            config,
            stream: None,
            open: false,
        }
    }

    /// Creates a transport that discovers the port on open.
    #[must_use]
    pub fn auto() -> Self {
        Self::new(SerialConfig::auto())
    }

    fn resolve_port(&self) -> Result<String> {
        if let Some(port) = &self.config.port {
            return Ok(port.clone());
        }
        let port = list_candidate_ports(self.config.hardware_id)
            .into_iter()
            .next()
            .ok_or(Error::NoPortAvailable)?;
        tracing::debug!("discovered uArm on {}", port);
        Ok(port)
    }

    /// Creates a new serial transport for the given port with default settings.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.open {
                return Ok(());
            }

            let port = self.resolve_port()?;
            tracing::info!("connecting to serial port: {}", port);

            let stream = tokio_serial::new(&port, self.config.baud_rate)
                .open_native_async()
                .map_err(|source| Error::Connection {
                    port: port.clone(),
                    source,
                })?;

            self.resolved = Some(port);
            self.stream = Some(stream);
            self.open = true;

            tracing::info!("connected to serial port");
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.open {
                tracing::info!("disconnecting from serial port {}", self.name());
                self.stream = None;
                self.open = false;
            }
            Ok(())
        })
    }

    fn take_halves(&mut self) -> Option<(BoxedReader, BoxedWriter)> {
        let stream = self.stream.take()?;
        let (reader, writer) = tokio::io::split(stream);
        Some((Box::new(reader), Box::new(writer)))
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn name(&self) -> &str {
        self.resolved.as_deref().unwrap_or(UNRESOLVED_PORT)
    }
}

/// Lists all available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Lists serial ports whose USB ids match `hardware_id`.
///
/// Enumeration failures are logged and yield an empty list.
#[must_use]
pub fn list_candidate_ports(hardware_id: HardwareId) -> Vec<String> {
    let ports = match tokio_serial::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            tracing::warn!("failed to enumerate serial ports: {}", e);
            return Vec::new();
        }
    };

    ports
        .into_iter()
        .filter(|port| match &port.port_type {
            SerialPortType::UsbPort(usb) => {
                usb.vid == hardware_id.vid && usb.pid == hardware_id.pid
            }
            _ => false,
        })
        .map(|port| port.port_name)
        .collect()
}

/// Lists serial ports that look like a uArm.
#[must_use]
pub fn uarm_ports() -> Vec<String> {
    list_candidate_ports(HardwareId::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::new("/dev/ttyUSB0");
        assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.hardware_id, HardwareId::default());

        let auto = SerialConfig::auto();
        assert!(auto.port.is_none());
        assert_eq!(SerialTransport::new(auto).name(), "auto");
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0").baud_rate(9600);
        assert_eq!(config.baud_rate, 9600);
    }

    #[test]
    fn test_hardware_id_parse() {
        let id: HardwareId = DEFAULT_HARDWARE_ID.parse().unwrap();
        assert_eq!(id, HardwareId::default());
        assert_eq!(id.to_string(), DEFAULT_HARDWARE_ID);

        let bare: HardwareId = "2341:0042".parse().unwrap();
        assert_eq!(bare.vid, 0x2341);
        assert_eq!(bare.pid, 0x0042);

        assert!("USB VID:PID=zzzz:6001".parse::<HardwareId>().is_err());
        assert!("nothing".parse::<HardwareId>().is_err());
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let mut transport = SerialTransport::with_port("/dev/uarm-does-not-exist");
        let result = transport.open().await;
        assert!(matches!(result, Err(Error::Connection { .. })));
        assert!(!transport.is_open());
        // Closing a transport that never opened is fine
        transport.close().await.unwrap();
    }

    #[test]
    #[ignore = "Requires /sys/class/tty - not available in sandboxed builds"]
    fn test_list_ports() {
        // Just verify it doesn't panic
        let _ = list_ports();
        let _ = uarm_ports();
    }
}
