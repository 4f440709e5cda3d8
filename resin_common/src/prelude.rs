//! Prelude module for common re-exports.
//!
//! ```rust
//! use resin_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, McConfig, SharedConfig};

// ─── MC Types ───────────────────────────────────────────────────────
pub use crate::mc::codes::{CommError, SelfCheckCode};
pub use crate::mc::error::{AxisId, McError};
pub use crate::mc::hw::{HwConfig, MotionTiming};
pub use crate::mc::profile::{AxisProfile, ProfileSet, ProfileSlot, TiltProfile, TowerProfile};
pub use crate::mc::status::{ResetFlags, StatusBit, StatusBits};
pub use crate::mc::tuning::{TearOffStage, TearOffTuning};
