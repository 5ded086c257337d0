//! Main [`UArm`] client implementation.
//!
//! This module provides the high-level [`UArm`] client that owns the
//! transport and the background receiver/sender tasks, runs the handshake,
//! and hands out the [`CommandHandler`] for device operations.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::commands::CommandHandler;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::event::{Event, Subscription};
use crate::protocol::{Response, command};
use crate::session::{ConnectionState, SessionHandle, run_receiver, run_sender};
use crate::transport::{LineReader, LineWriter, SerialTransport, Transport};
use crate::types::{DeviceInfo, Version};

/// Bound on joining a background task during disconnect.
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Client for communicating with a uArm device.
pub struct UArm<T> {
    transport: T,
    session: SessionHandle,
    commands: CommandHandler,

    device_info: Option<DeviceInfo>,
    span: Option<tracing::Span>,

    // Background tasks
    receiver_task: Option<JoinHandle<()>>,
    sender_task: Option<JoinHandle<()>>,
}

impl UArm<SerialTransport> {
    /// Creates a new client for a serial port.
    ///
    /// # Arguments
    ///
    /// * `port` - Serial port path (e.g., "/dev/ttyUSB0")
    ///
    /// # Returns
    ///
    /// A new client (not yet connected).
    #[must_use]
    pub fn serial(port: impl Into<String>) -> Self {
        Self::with_config(SessionConfig::new(port))
    }

    /// Creates a client that finds the arm by its USB ids on connect.
    #[must_use]
    pub fn auto() -> Self {
        Self::with_config(SessionConfig::default())
    }

    /// Creates a new client with custom configuration.
    #[must_use]
    pub fn with_config(config: SessionConfig) -> Self {
        let transport = SerialTransport::new(config.serial_config());
        Self::with_transport(transport, config)
    }
}

impl<T: Transport + 'static> UArm<T> {
    /// Creates a new client over the given transport.
    #[must_use]
    pub fn with_transport(transport: T, config: SessionConfig) -> Self {
        let session = SessionHandle::new(config);
        let commands = CommandHandler::new(session.clone());

        Self {
            transport,
            session,
            commands,
            device_info: None,
            span: None,
            receiver_task: None,
            sender_task: None,
        }
    }

    /// Connects to the device and runs the handshake.
    ///
    /// This will:
    /// 1. Open the transport, discovering the port if none is configured
    /// 2. Start the background receiver and sender
    /// 3. Wait for the device readiness line
    /// 4. Query and cache the firmware and hardware versions
    /// 5. Check the firmware against the supported list
    ///
    /// A firmware version that is unknown or unsupported is reported as an
    /// error but leaves the session connected, so the caller may carry on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoPortAvailable`], [`Error::Connection`] or
    /// [`Error::HandshakeTimeout`] when the link cannot be set up, and
    /// [`Error::UnknownFirmwareVersion`] or
    /// [`Error::UnsupportedFirmwareVersion`] when the firmware check fails.
    pub async fn connect(&mut self) -> Result<DeviceInfo> {
        if self.session.state() != ConnectionState::Disconnected || self.transport.is_open() {
            self.disconnect().await?;
        }

        self.transport.open().await?;
        let port = self.transport.name().to_string();
        let span = tracing::info_span!("uarm", port = %port);

        let Some((reader, writer)) = self.transport.take_halves() else {
            self.transport.close().await?;
            return Err(Error::NotConnected);
        };

        let queue = self.session.begin();
        self.session
            .shared()
            .dispatcher
            .dispatch(Event::Connected { port: port.clone() });

        let shared = self.session.shared();
        self.receiver_task = Some(tokio::spawn(
            run_receiver(self.session.shared(), LineReader::new(reader)).instrument(span.clone()),
        ));
        self.sender_task = Some(tokio::spawn(
            run_sender(shared, LineWriter::new(writer), queue).instrument(span.clone()),
        ));
        self.span = Some(span.clone());

        match self.handshake(port).instrument(span).await {
            Ok(info) => Ok(info),
            Err(
                e @ (Error::UnknownFirmwareVersion { .. }
                | Error::UnsupportedFirmwareVersion { .. }),
            ) => Err(e),
            Err(e) => {
                self.disconnect().await?;
                Err(e)
            }
        }
    }

    async fn handshake(&mut self, port: String) -> Result<DeviceInfo> {
        let config = self.session.config();
        let handshake_timeout = config.handshake_timeout;
        if !self.session.wait_device_ready(handshake_timeout).await {
            tracing::error!("no readiness line within {:?}", handshake_timeout);
            return Err(Error::HandshakeTimeout {
                timeout_ms: u64::try_from(handshake_timeout.as_millis()).unwrap_or(u64::MAX),
            });
        }

        let firmware = self
            .session
            .request(command::GET_FIRMWARE_VERSION, true)
            .await?;
        let hardware = self
            .session
            .request(command::GET_HARDWARE_VERSION, true)
            .await?;

        let firmware_version = firmware.as_ref().and_then(parse_version);
        let hardware_version = hardware
            .as_ref()
            .filter(|response| response.is_ok())
            .and_then(|response| response.value(0))
            .map(|value| value.trim_start_matches(['V', 'v']).to_string());

        self.session.update_identity(|identity| {
            identity.firmware.clone_from(&firmware_version);
            identity.hardware.clone_from(&hardware_version);
        });
        self.session.mark_ready();

        let info = DeviceInfo {
            port,
            firmware_version: firmware_version.clone(),
            hardware_version,
        };
        self.device_info = Some(info.clone());

        let Some(version) = firmware_version else {
            let response = firmware.map_or_else(
                || "no response".to_string(),
                |response| response.fields.join(" "),
            );
            tracing::warn!("unknown firmware version: {}", response);
            return Err(Error::UnknownFirmwareVersion { response });
        };

        let supported = &self.session.config().supported_firmware;
        if !version.is_supported(supported) {
            tracing::warn!("firmware {} is not supported", version);
            return Err(Error::UnsupportedFirmwareVersion {
                version: version.to_string(),
                supported: supported.clone(),
            });
        }

        tracing::info!(
            "connected, firmware {} hardware {}",
            version,
            info.hardware_version.as_deref().unwrap_or("unknown")
        );
        Ok(info)
    }

    /// Disconnects from the device. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to close.
    pub async fn disconnect(&mut self) -> Result<()> {
        let was_connected = self.session.shutdown();

        // Stop background tasks
        for task in [self.sender_task.take(), self.receiver_task.take()]
            .into_iter()
            .flatten()
        {
            let abort = task.abort_handle();
            if tokio::time::timeout(JOIN_TIMEOUT, task).await.is_err() {
                tracing::warn!("background task did not stop in time, aborting");
                abort.abort();
            }
        }

        self.transport.close().await?;

        if was_connected {
            if let Some(span) = &self.span {
                span.in_scope(|| tracing::info!("disconnected"));
            }
            self.session.shared().dispatcher.dispatch(Event::Disconnected);
        }
        self.span = None;
        self.device_info = None;
        Ok(())
    }

    /// Returns true if the transport is open and the handshake completed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_open() && self.session.is_ready()
    }

    /// Returns the connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Returns what the handshake learned about the device.
    #[must_use]
    pub const fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    /// Returns the transport name (the serial port once resolved).
    #[must_use]
    pub fn port(&self) -> &str {
        self.transport.name()
    }

    /// Returns the command handler for device operations.
    #[must_use]
    pub const fn commands(&self) -> &CommandHandler {
        &self.commands
    }

    /// Returns a handle to the session, usable from other tasks.
    #[must_use]
    pub fn session(&self) -> SessionHandle {
        self.session.clone()
    }

    /// Subscribes to events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.session.subscribe()
    }

    /// Sends a raw command and waits for its correlated response.
    ///
    /// Returns `Ok(None)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the session is not connected.
    pub async fn send_and_receive(&self, payload: &str) -> Result<Option<Response>> {
        self.session.send_and_receive(payload).await
    }

    /// Sends a raw command without waiting and returns its sequence id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the session is not connected.
    pub fn send_only(&self, payload: &str) -> Result<u16> {
        self.session.send_only(payload)
    }
}

impl<T> Drop for UArm<T> {
    fn drop(&mut self) {
        for task in [self.sender_task.take(), self.receiver_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

/// Extracts the firmware version from a `P2203` response.
fn parse_version(response: &Response) -> Option<Version> {
    if !response.is_ok() {
        return None;
    }
    response.value(0)?.parse().ok()
}
