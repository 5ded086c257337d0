//! # uarm
//!
//! A Rust host library for uArm robotic arms connected over USB serial.
//!
//! This library drives the arm's line based G-code protocol asynchronously:
//! a background receiver and sender share the serial link, commands are
//! correlated with their responses by sequence id, and unsolicited position
//! and button reports are queued for polling or broadcast as events.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Concurrent commands over one link with out-of-order responses
//! - Event-driven handling of position and button reports
//! - Typed errors, with timeouts reported as `None`
//! - Teach and playback recorder
//!
//! ## Quick Start
//!
//! ```no_run
//! use uarm::UArm;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), uarm::Error> {
//!     // Find the arm by its USB ids and run the handshake
//!     let mut arm = UArm::auto();
//!     let info = arm.connect().await?;
//!     println!("Connected on {}", info.port);
//!
//!     // Move and wait until the arm stops
//!     let commands = arm.commands();
//!     commands.set_position(150.0, 0.0, 100.0, 300.0, true).await?;
//!
//!     if let Some(position) = commands.get_position().await? {
//!         println!("At {:.1}, {:.1}, {:.1}", position.x, position.y, position.z);
//!     }
//!
//!     arm.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Line framing, command payloads and response parsing
//! - [`types`] - Positions, versions and report data
//! - [`transport`] - Serial and in-memory transports, port discovery
//! - [`correlation`] - Sequence ids and the response table
//! - [`event`] - Report queues and the event broadcast
//! - [`session`] - State shared with the background tasks
//! - [`commands`] - High-level device operations
//! - [`client`] - The [`UArm`] client
//! - [`teach`] - Recording and playback of movements
//! - [`config`] - Session configuration and the settings file

pub mod client;
pub mod commands;
pub mod config;
pub mod correlation;
pub mod error;
pub mod event;
pub mod protocol;
pub mod session;
pub mod teach;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::UArm;
pub use commands::CommandHandler;
pub use config::{SessionConfig, Settings};
pub use error::{Error, FrameError, Result};
pub use event::{Event, EventDispatcher, EventFilter, EventKind, ReportQueue, Subscription};
pub use protocol::{Button, EepromDataType, Response, Servo, Status};
pub use session::{ConnectionState, SessionHandle};
pub use teach::Teach;
pub use transport::{
    DeviceEnd, MemoryTransport, SerialTransport,
    serial::{list_ports, uarm_ports},
};
pub use types::{ButtonReport, DeviceInfo, EepromValue, Polar, Position, ServoAngles, Version};
