//! # Resin MC Library
//!
//! Serial protocol engine and axis sequencer for the motion controller (MC)
//! of a resin SLA printer.
//!
//! # Module Structure
//!
//! - [`port`] - Serial port and reset line abstractions
//! - [`trace`] - Bounded history of link traffic
//! - [`link`] - Serial link owner with background reader
//! - [`frame`] - Command framing and response parsing
//! - [`gate`] - Exclusive / command / flash gate of the link
//! - [`controller`] - Protocol engine: execute, connect, reset, flash
//! - [`debug`] - Interactive TCP debug session
//! - [`flash`] - External flashing utility
//! - [`status`] - Status word edge tracking
//! - [`axis`] - Tilt and tower sequencer
//! - [`peripherals`] - Fans, UV LED, sensors and other MC I/O
//! - [`hardware`] - Wiring of controller, axes and peripherals
//! - [`sim`] - Software MC speaking the wire protocol
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            resin_mc                              │
//! │  ┌─────────────┐    ┌──────────────┐    ┌─────────────────────┐  │
//! │  │ Tilt/Tower  │───►│ McController │───►│        Link         │  │
//! │  │ (sequencer) │    │ (LinkGate)   │    │ reader thread+trace │  │
//! │  └─────────────┘    └──────┬───────┘    └──────────┬──────────┘  │
//! │                            │                       │             │
//! │                            ▼                       ▼             │
//! │                   ┌────────────────┐      ┌────────────────┐     │
//! │                   │ StatusTracker  │      │  Port (trait)  │     │
//! │                   │ edge events    │      │ serial | sim   │     │
//! │                   └────────────────┘      └────────────────┘     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod axis;
pub mod controller;
pub mod debug;
pub mod flash;
pub mod frame;
pub mod gate;
pub mod hardware;
pub mod link;
pub mod peripherals;
pub mod port;
pub mod sim;
pub mod status;
pub mod trace;

pub use crate::axis::{CancelToken, ResinProbeResult, Tilt, Tower};
pub use crate::controller::{ConnectionInfo, ConnectionState, McController};
pub use crate::frame::{Command, Response};
pub use crate::hardware::Hardware;
pub use crate::link::Link;
pub use crate::peripherals::Peripherals;
pub use crate::sim::SimulatedMc;
