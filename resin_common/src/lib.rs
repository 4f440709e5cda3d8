//! Resin Common Library
//!
//! Shared constants, wire tables and configuration types for the resin
//! printer motion-controller (MC) link. Nothing in this crate performs I/O
//! apart from reading configuration files.
//!
//! # Module Structure
//!
//! - [`consts`] - Device paths, baud rates, timeouts and axis geometry
//! - [`config`] - Configuration loading traits and the top-level `McConfig`
//! - [`mc`] - Status words, error tables, profiles and tear-off tuning
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use resin_common::mc::status::StatusBits;
//!
//! let bits = StatusBits::from_bits_truncate(0x0081);
//! assert!(bits.contains(StatusBits::TOWER | StatusBits::COVER));
//! ```

pub mod config;
pub mod consts;
pub mod mc;
pub mod prelude;
