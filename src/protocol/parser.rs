//! Inbound line parsing for the uArm protocol.
//!
//! The device sends four kinds of lines: correlated responses (`$`), the
//! readiness line (`@1`), position reports (`^`) and button reports (`@4`).
//! Everything else is noise the caller can ignore.

use crate::error::{FrameError, Result};
use crate::protocol::command::Button;
use crate::protocol::frame::{RESPONSE_MARKER, parse_sequence_id};
use crate::types::{ButtonReport, Position};

/// Readiness line sent once after reset/connect.
pub const READY: &str = "@1";

/// Prefix of periodic position reports.
pub const POSITION_REPORT_PREFIX: &str = "^";

/// Prefix of button reports.
pub const BUTTON_REPORT_PREFIX: &str = "@4";

/// Status carried by the first token of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command succeeded.
    Ok,
    /// Command failed.
    Fail,
    /// Anything else (or no token at all).
    Unknown,
}

/// A correlated response: `$<seq> <status> <tag><value> ...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Sequence id of the request this answers.
    pub sequence_id: u16,
    /// Whitespace separated tokens following the id.
    pub fields: Vec<String>,
}

impl Response {
    /// Creates a response from an id and its tokens.
    #[must_use]
    pub const fn new(sequence_id: u16, fields: Vec<String>) -> Self {
        Self {
            sequence_id,
            fields,
        }
    }

    /// Returns the status token, compared case-insensitively.
    #[must_use]
    pub fn status(&self) -> Status {
        match self.fields.first() {
            Some(token) if token.eq_ignore_ascii_case("ok") => Status::Ok,
            Some(token) if token.eq_ignore_ascii_case("fail") => Status::Fail,
            _ => Status::Unknown,
        }
    }

    /// Returns true if the status token is `OK`.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status() == Status::Ok
    }

    /// Returns the value part of the `index`-th argument (status excluded),
    /// with its one character tag stripped.
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&str> {
        self.fields.get(index + 1).map(|token| strip_tag(token))
    }

    /// Parses the `index`-th argument as a float.
    #[must_use]
    pub fn f64(&self, index: usize) -> Option<f64> {
        self.value(index)?.parse().ok()
    }

    /// Parses the `index`-th argument as an integer, accepting `12.0`.
    #[must_use]
    pub fn i64(&self, index: usize) -> Option<i64> {
        let value = self.value(index)?;
        value
            .parse::<i64>()
            .ok()
            .or_else(|| value.parse::<f64>().ok().map(|v| v as i64))
    }

    /// Returns the argument carrying the given tag, e.g. `V` in `V1`.
    #[must_use]
    pub fn tagged(&self, tag: char) -> Option<&str> {
        self.fields
            .iter()
            .skip(1)
            .find_map(|token| token.strip_prefix(tag))
    }
}

/// A classified inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Correlated response.
    Response(Response),
    /// Device readiness line.
    Ready,
    /// Periodic position report.
    Position(Position),
    /// Button report.
    Button(ButtonReport),
    /// Unrecognized line.
    Unknown(String),
}

/// Removes the one character tag in front of a value.
fn strip_tag(token: &str) -> &str {
    let mut chars = token.chars();
    chars.next();
    chars.as_str()
}

/// Parses a tagged float token such as `X123.45`.
fn tagged_f64(token: &str) -> Result<f64> {
    strip_tag(token)
        .parse()
        .map_err(|_| FrameError::InvalidField(token.to_string()).into())
}

/// Parses a tagged small integer token such as `B1`.
fn tagged_u8(token: &str) -> Result<u8> {
    strip_tag(token)
        .parse()
        .map_err(|_| FrameError::InvalidField(token.to_string()).into())
}

/// Parses a response line body (`$` already stripped).
///
/// Format: `<seq> <token> <token> ...`
pub fn parse_response(body: &str) -> Result<Response> {
    let mut tokens = body.split_whitespace();
    let id = tokens.next().ok_or(FrameError::Empty)?;
    let sequence_id = parse_sequence_id(id)?;
    let fields = tokens.map(str::to_string).collect();
    Ok(Response::new(sequence_id, fields))
}

/// Parses a position report body (prefix already stripped).
///
/// Format: `X<x> Y<y> Z<z> [R<r>]`
pub fn parse_position_report(body: &str) -> Result<Position> {
    let tokens: Vec<&str> = body.split_whitespace().collect();
    if tokens.len() < 3 {
        return Err(FrameError::InvalidField(body.to_string()).into());
    }

    let position = Position::new(
        tagged_f64(tokens[0])?,
        tagged_f64(tokens[1])?,
        tagged_f64(tokens[2])?,
    );
    match tokens.get(3) {
        Some(token) => Ok(position.with_r(tagged_f64(token)?)),
        None => Ok(position),
    }
}

/// Parses a button report body (prefix already stripped).
///
/// Format: `B<button> V<state>`
pub fn parse_button_report(body: &str) -> Result<ButtonReport> {
    let tokens: Vec<&str> = body.split_whitespace().collect();
    if tokens.len() < 2 {
        return Err(FrameError::InvalidField(body.to_string()).into());
    }

    let index = tagged_u8(tokens[0])?;
    let button =
        Button::from_index(index).ok_or_else(|| FrameError::InvalidField(tokens[0].to_string()))?;
    let state = tagged_u8(tokens[1])?;
    Ok(ButtonReport { button, state })
}

/// Classifies an inbound line.
///
/// # Errors
///
/// Returns an error if the line has a known prefix but a malformed body.
pub fn parse_line(line: &str) -> Result<Inbound> {
    let line = line.trim();

    if let Some(body) = line.strip_prefix(RESPONSE_MARKER) {
        return parse_response(body).map(Inbound::Response);
    }
    if line.starts_with(READY) {
        return Ok(Inbound::Ready);
    }
    if let Some(body) = line.strip_prefix(POSITION_REPORT_PREFIX) {
        return parse_position_report(body).map(Inbound::Position);
    }
    if let Some(body) = line.strip_prefix(BUTTON_REPORT_PREFIX) {
        return parse_button_report(body).map(Inbound::Button);
    }

    Ok(Inbound::Unknown(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_parse_response() {
        let inbound = parse_line("$12 OK X123.45 Y-2.5 Z80").unwrap();
        let Inbound::Response(response) = inbound else {
            panic!("expected response, got {inbound:?}");
        };
        assert_eq!(response.sequence_id, 12);
        assert_eq!(response.fields, vec!["OK", "X123.45", "Y-2.5", "Z80"]);
        assert!(response.is_ok());
        assert_eq!(response.f64(0), Some(123.45));
        assert_eq!(response.f64(1), Some(-2.5));
        assert_eq!(response.i64(2), Some(80));
        assert_eq!(response.value(3), None);
    }

    #[test]
    fn test_response_status_case_insensitive() {
        let ok = Response::new(1, vec!["ok".into()]);
        let fail = Response::new(2, vec!["Fail".into()]);
        let empty = Response::new(3, Vec::new());
        assert_eq!(ok.status(), Status::Ok);
        assert_eq!(fail.status(), Status::Fail);
        assert_eq!(empty.status(), Status::Unknown);
    }

    #[test]
    fn test_response_tagged() {
        let response = Response::new(4, vec!["OK".into(), "N3".into(), "V1".into()]);
        assert_eq!(response.tagged('V'), Some("1"));
        assert_eq!(response.tagged('Q'), None);
    }

    #[test]
    fn test_response_bad_id() {
        assert!(matches!(
            parse_line("$0 OK"),
            Err(Error::Frame(FrameError::InvalidSequenceId(_)))
        ));
        assert!(matches!(
            parse_line("$ OK"),
            Err(Error::Frame(FrameError::InvalidSequenceId(_)))
        ));
        assert!(matches!(
            parse_line("$"),
            Err(Error::Frame(FrameError::Empty))
        ));
    }

    #[test]
    fn test_parse_ready() {
        assert_eq!(parse_line("@1").unwrap(), Inbound::Ready);
        assert_eq!(parse_line("@1 ready\r").unwrap(), Inbound::Ready);
    }

    #[test]
    fn test_parse_position_report() {
        let inbound = parse_line("^ X100.5 Y-20 Z30.25 R90").unwrap();
        assert_eq!(
            inbound,
            Inbound::Position(Position::new(100.5, -20.0, 30.25).with_r(90.0))
        );

        let inbound = parse_line("^X1 Y2 Z3").unwrap();
        assert_eq!(inbound, Inbound::Position(Position::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn test_parse_position_report_malformed() {
        assert!(parse_line("^ X1 Y2").is_err());
        assert!(parse_line("^ X1 Yabc Z3").is_err());
    }

    #[test]
    fn test_parse_button_report() {
        let inbound = parse_line("@4 B1 V2").unwrap();
        assert_eq!(
            inbound,
            Inbound::Button(ButtonReport {
                button: Button::Play,
                state: 2
            })
        );
        assert!(parse_line("@4 B9 V2").is_err());
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(
            parse_line("echo: hello").unwrap(),
            Inbound::Unknown("echo: hello".into())
        );
    }
}
