//! Line framing for the uArm serial protocol.
//!
//! Every message on the wire is a single UTF-8 line terminated by `\n`:
//! ```text
//! host   -> device   #<seq> <command><args...>\n
//! device -> host     $<seq> <status> <tag><value> ...\n
//! device -> host     @1\n                 (readiness)
//! device -> host     ^ X.. Y.. Z.. R..\n  (position report)
//! ```
//! A trailing `\r` is tolerated on inbound lines.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// Marker that opens an outbound command frame.
pub const COMMAND_MARKER: char = '#';

/// Marker that opens an inbound correlated response.
pub const RESPONSE_MARKER: char = '$';

/// Record terminator.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Maximum inbound line length before the decoder gives up on it.
pub const MAX_LINE_LEN: usize = 1024;

/// Encodes a command payload into a framed line.
///
/// The result is `#<seq> <payload>\n`.
#[must_use]
pub fn encode(sequence_id: u16, payload: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + payload.len());
    buf.put_slice(format!("{COMMAND_MARKER}{sequence_id} {payload}").as_bytes());
    buf.put_u8(LINE_TERMINATOR);
    buf.freeze()
}

/// Decodes a framed command line back into its sequence id and payload.
///
/// Accepts the line with or without its terminator.
///
/// # Errors
///
/// Returns a `FrameError` if the marker is missing or the id is not in
/// `1..=65535`.
pub fn decode(line: &str) -> Result<(u16, &str), FrameError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return Err(FrameError::Empty);
    }
    let rest = line
        .strip_prefix(COMMAND_MARKER)
        .ok_or(FrameError::MissingMarker {
            expected: COMMAND_MARKER,
        })?;
    let (id, payload) = rest.split_once(' ').unwrap_or((rest, ""));
    let sequence_id = parse_sequence_id(id)?;
    Ok((sequence_id, payload))
}

/// Parses a sequence id, rejecting the reserved value 0.
pub(crate) fn parse_sequence_id(text: &str) -> Result<u16, FrameError> {
    match text.parse::<u16>() {
        Ok(0) | Err(_) => Err(FrameError::InvalidSequenceId(text.to_string())),
        Ok(id) => Ok(id),
    }
}

/// Splits an inbound byte stream into lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: BytesMut,
    /// Set after an overlong line until its terminator is seen.
    discarding: bool,
}

impl LineDecoder {
    /// Creates a new line decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            discarding: false,
        }
    }

    /// Feeds data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete line.
    ///
    /// Returns `Ok(Some(line))` with the terminator stripped, `Ok(None)` if
    /// more data is needed. Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns a `FrameError` if a line is not valid UTF-8 or grows past
    /// `MAX_LINE_LEN` without a terminator. The offending bytes are discarded
    /// so decoding can continue. After an overlong line everything up to and
    /// including its eventual terminator is dropped.
    pub fn decode(&mut self) -> Result<Option<String>, FrameError> {
        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == LINE_TERMINATOR) else {
                if self.discarding {
                    self.buffer.clear();
                    return Ok(None);
                }
                if self.buffer.len() > MAX_LINE_LEN {
                    let size = self.buffer.len();
                    self.buffer.clear();
                    self.discarding = true;
                    return Err(FrameError::TooLong {
                        size,
                        max: MAX_LINE_LEN,
                    });
                }
                return Ok(None);
            };

            let raw = self.buffer.split_to(pos + 1);
            if self.discarding {
                self.discarding = false;
                continue;
            }
            let raw = &raw[..pos];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            return match std::str::from_utf8(raw) {
                Ok(line) => Ok(Some(line.to_string())),
                Err(_) => Err(FrameError::InvalidUtf8 {
                    hex: hex::encode(raw),
                }),
            };
        }
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
