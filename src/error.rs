//! Error types for the uarm library.

use thiserror::Error;

/// The main error type for uarm operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Line encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The OS could not open or claim the serial port.
    #[error("unable to connect to {port}: {source}")]
    Connection {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },

    /// No serial device with the expected hardware id was found.
    #[error("no uArm port available")]
    NoPortAvailable,

    /// The device never sent its readiness line.
    #[error("device not ready after {timeout_ms}ms")]
    HandshakeTimeout { timeout_ms: u64 },

    /// The firmware version response was absent or malformed.
    #[error("unknown firmware version: {response}")]
    UnknownFirmwareVersion { response: String },

    /// The firmware reported a version outside the supported list.
    #[error("unsupported firmware version {version} (supported: {})", supported.join(", "))]
    UnsupportedFirmwareVersion {
        version: String,
        supported: Vec<String>,
    },

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,

    /// Invalid command argument.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Settings could not be loaded.
    #[error("config error: {message}")]
    Config { message: String },
}

/// Line codec errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Line contains nothing after trimming.
    #[error("empty frame")]
    Empty,

    /// Line does not start with the expected marker.
    #[error("missing marker '{expected}'")]
    MissingMarker { expected: char },

    /// Sequence id is absent, zero or out of range.
    #[error("invalid sequence id: {0:?}")]
    InvalidSequenceId(String),

    /// A tagged field could not be parsed.
    #[error("invalid field: {0:?}")]
    InvalidField(String),

    /// Line exceeds the maximum length without a terminator.
    #[error("line too long: {size} bytes exceeds maximum {max}")]
    TooLong { size: usize, max: usize },

    /// Line is not valid UTF-8.
    #[error("invalid UTF-8 in line: {hex}")]
    InvalidUtf8 { hex: String },
}

/// Result type alias for uarm operations.
pub type Result<T> = std::result::Result<T, Error>;
