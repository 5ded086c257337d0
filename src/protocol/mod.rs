//! Protocol definitions for uArm communication.
//!
//! This module contains the low-level protocol types including:
//! - Line framing with sequence ids
//! - Command payloads
//! - Inbound line classification and response parsing

pub mod command;
pub mod frame;
pub mod parser;

pub use command::{Button, EEPROM_MAX_ADDRESS, EepromDataType, Servo};
pub use frame::{
    COMMAND_MARKER, LineDecoder, MAX_LINE_LEN, RESPONSE_MARKER, decode as decode_frame,
    encode as encode_frame,
};
pub use parser::{
    BUTTON_REPORT_PREFIX, Inbound, POSITION_REPORT_PREFIX, READY, Response, Status, parse_line,
};
