//! In-memory transport.
//!
//! [`MemoryTransport::pair`] returns a transport for the session and a
//! [`DeviceEnd`] that plays the device: it reads the frames the host writes
//! and can push any line back. Used by tests and dry runs.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

use crate::error::{Error, Result};
use crate::transport::{BoxedReader, BoxedWriter, Transport};

/// Buffer size of the in-memory pipe, in each direction.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Host side of an in-memory link.
pub struct MemoryTransport {
    name: String,
    stream: Option<DuplexStream>,
    open: bool,
    refuse_open: bool,
}

impl MemoryTransport {
    /// Creates a connected transport/device pair.
    #[must_use]
    pub fn pair() -> (Self, DeviceEnd) {
        let (host, device) = tokio::io::duplex(PIPE_CAPACITY);
        let (reader, writer) = tokio::io::split(device);
        let transport = Self {
            name: "memory".to_string(),
            stream: Some(host),
            open: false,
            refuse_open: false,
        };
        let device = DeviceEnd {
            reader: BufReader::new(reader),
            writer,
        };
        (transport, device)
    }

    /// Creates a transport whose `open` fails as if the port were busy.
    #[must_use]
    pub fn unavailable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stream: None,
            open: false,
            refuse_open: true,
        }
    }

    /// Sets the name reported in logs and errors.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.open {
                return Ok(());
            }
            if self.refuse_open || self.stream.is_none() {
                return Err(Error::Connection {
                    port: self.name.clone(),
                    source: tokio_serial::Error::new(
                        tokio_serial::ErrorKind::NoDevice,
                        "in-memory link unavailable",
                    ),
                });
            }
            self.open = true;
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.stream = None;
            self.open = false;
            Ok(())
        })
    }

    fn take_halves(&mut self) -> Option<(BoxedReader, BoxedWriter)> {
        if !self.open {
            return None;
        }
        let stream = self.stream.take()?;
        let (reader, writer) = tokio::io::split(stream);
        Some((Box::new(reader), Box::new(writer)))
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Device side of an in-memory link.
pub struct DeviceEnd {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl DeviceEnd {
    /// Reads the next line written by the host, without its terminator.
    ///
    /// Returns `None` once the host side is gone.
    pub async fn recv_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.reader.read_line(&mut line).await {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }

    /// Like [`recv_line`](Self::recv_line) but gives up after `timeout`.
    pub async fn recv_line_timeout(&mut self, timeout: Duration) -> Option<String> {
        tokio::time::timeout(timeout, self.recv_line())
            .await
            .ok()
            .flatten()
    }

    /// Reads the next command frame and splits it into id and payload.
    pub async fn recv_command(&mut self) -> Option<(u16, String)> {
        let line = self.recv_line().await?;
        match crate::protocol::decode_frame(&line) {
            Ok((id, payload)) => Some((id, payload.to_string())),
            Err(e) => {
                tracing::warn!("device received malformed frame {:?}: {}", line, e);
                None
            }
        }
    }

    /// Sends a line to the host, appending the terminator.
    ///
    /// # Errors
    ///
    /// Returns an error if the host side is gone.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Sends a correlated response `$<id> <body>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host side is gone.
    pub async fn respond(&mut self, sequence_id: u16, body: &str) -> Result<()> {
        self.send_line(&format!("${sequence_id} {body}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LineReader, LineWriter};

    #[tokio::test]
    async fn test_pair_round_trip() {
        let (mut transport, mut device) = MemoryTransport::pair();
        assert!(!transport.is_open());
        assert!(transport.take_halves().is_none());

        transport.open().await.unwrap();
        let (reader, writer) = transport.take_halves().unwrap();
        let mut reader = LineReader::new(reader);
        let mut writer = LineWriter::new(writer);

        writer
            .write_frame(&crate::protocol::encode_frame(3, "P2220"))
            .await
            .unwrap();
        assert_eq!(device.recv_command().await, Some((3, "P2220".to_string())));

        device.respond(3, "OK X1 Y2 Z3").await.unwrap();
        let line = reader.read_line(Duration::from_millis(100)).await.unwrap();
        assert_eq!(line, Some("$3 OK X1 Y2 Z3".to_string()));
    }

    #[tokio::test]
    async fn test_unavailable_fails_to_open() {
        let mut transport = MemoryTransport::unavailable("/dev/ttyBUSY");
        let result = transport.open().await;
        assert!(matches!(
            result,
            Err(Error::Connection { ref port, .. }) if port == "/dev/ttyBUSY"
        ));
    }

    #[tokio::test]
    async fn test_reopen_after_close_fails() {
        let (mut transport, _device) = MemoryTransport::pair();
        transport.open().await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_open());
        assert!(transport.open().await.is_err());
    }
}
