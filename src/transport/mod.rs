//! Transport layer for uArm communication.
//!
//! A [`Transport`] owns the physical link. Once opened it hands out a read
//! half and a write half, which the session wraps in [`LineReader`] and
//! [`LineWriter`] so the background receiver and sender can run
//! concurrently.

pub mod memory;
pub mod serial;

use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::LineDecoder;
use crate::protocol::frame::LINE_TERMINATOR;

/// Boxed read half of an opened transport.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed write half of an opened transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Trait for transport implementations.
pub trait Transport: Send {
    /// Opens the link to the device.
    fn open(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Closes the link. Closing an already closed transport is a no-op.
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Takes the read and write halves. Only succeeds once per `open`.
    fn take_halves(&mut self) -> Option<(BoxedReader, BoxedWriter)>;

    /// Returns true if opened and not yet closed.
    fn is_open(&self) -> bool;

    /// Device name used in logs and errors.
    fn name(&self) -> &str;
}

pub use memory::{DeviceEnd, MemoryTransport};
pub use serial::SerialTransport;

/// Line oriented reader over a transport read half.
pub struct LineReader {
    reader: BoxedReader,
    decoder: LineDecoder,
    buf: Box<[u8]>,
}

impl LineReader {
    /// Wraps a read half.
    #[must_use]
    pub fn new(reader: BoxedReader) -> Self {
        Self {
            reader,
            decoder: LineDecoder::new(),
            buf: vec![0u8; 1024].into_boxed_slice(),
        }
    }

    /// Reads the next line, waiting at most `slice`.
    ///
    /// Returns `Ok(None)` when no complete line arrived in time. Malformed
    /// lines are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is closed or reading fails. Either is
    /// fatal for the session.
    pub async fn read_line(&mut self, slice: Duration) -> Result<Option<String>> {
        if let Some(line) = self.next_buffered() {
            return Ok(Some(line));
        }

        let n = match tokio::time::timeout(slice, self.reader.read(&mut self.buf)).await {
            Err(_) => return Ok(None),
            Ok(Ok(0)) => {
                tracing::debug!("link closed by device");
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "serial port closed",
                )));
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::error!("serial read error: {}", e);
                return Err(Error::Io(e));
            }
        };

        tracing::trace!("received {} bytes", n);
        self.decoder.feed(&self.buf[..n]);
        Ok(self.next_buffered())
    }

    /// Pops the next complete line already in the decoder.
    fn next_buffered(&mut self) -> Option<String> {
        loop {
            match self.decoder.decode() {
                Ok(line) => return line,
                Err(e) => {
                    // The decoder has discarded the bad bytes
                    tracing::warn!("line decode error: {}", e);
                }
            }
        }
    }
}

/// Line oriented writer over a transport write half.
pub struct LineWriter {
    writer: BoxedWriter,
}

impl LineWriter {
    /// Wraps a write half.
    #[must_use]
    pub fn new(writer: BoxedWriter) -> Self {
        Self { writer }
    }

    /// Writes an already terminated frame.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails. This is fatal for the session.
    pub async fn write_frame(&mut self, frame: &Bytes) -> Result<()> {
        tracing::trace!("sending frame: {} bytes", frame.len());
        self.writer.write_all(frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Writes `text` followed by the record terminator.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails. This is fatal for the session.
    pub async fn write_line(&mut self, text: &str) -> Result<()> {
        let mut frame = Vec::with_capacity(text.len() + 1);
        frame.extend_from_slice(text.as_bytes());
        frame.push(LINE_TERMINATOR);
        self.write_frame(&Bytes::from(frame)).await
    }

    /// Shuts down the write half.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!("shutdown of write half failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_line_reader_reads_lines() {
        let (host, mut device) = tokio::io::duplex(256);
        let (read_half, _write_half) = tokio::io::split(host);
        let mut reader = LineReader::new(Box::new(read_half));

        device.write_all(b"@1\n$1 OK\n").await.unwrap();

        let slice = Duration::from_millis(100);
        assert_eq!(reader.read_line(slice).await.unwrap(), Some("@1".into()));
        assert_eq!(reader.read_line(slice).await.unwrap(), Some("$1 OK".into()));
    }

    #[tokio::test]
    async fn test_line_reader_times_out_with_none() {
        let (host, _device) = tokio::io::duplex(256);
        let (read_half, _write_half) = tokio::io::split(host);
        let mut reader = LineReader::new(Box::new(read_half));

        let line = reader.read_line(Duration::from_millis(10)).await.unwrap();
        assert_eq!(line, None);
    }

    #[tokio::test]
    async fn test_line_reader_reports_closed_link() {
        let (host, device) = tokio::io::duplex(256);
        let (read_half, _write_half) = tokio::io::split(host);
        let mut reader = LineReader::new(Box::new(read_half));
        drop(device);

        let result = reader.read_line(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_line_writer_appends_terminator() {
        let (host, mut device) = tokio::io::duplex(256);
        let (_read_half, write_half) = tokio::io::split(host);
        let mut writer = LineWriter::new(Box::new(write_half));

        writer.write_line("#1 P2203").await.unwrap();

        let mut buf = [0u8; 9];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"#1 P2203\n");
    }
}
