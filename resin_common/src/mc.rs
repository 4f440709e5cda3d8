//! Motion controller wire tables and axis configuration.
//!
//! This module contains the types exchanged with, or used to drive,
//! the MC firmware: status and reset words, error code tables, motion
//! profiles and the layer tear-off tuning vectors.

pub mod codes;
pub mod error;
pub mod hw;
pub mod profile;
pub mod status;
pub mod tuning;
