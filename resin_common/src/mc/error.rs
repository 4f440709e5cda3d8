//! Error taxonomy of the MC link and the axis sequencer.

use super::codes::{CommError, SelfCheckCode};
use std::fmt;
use thiserror::Error;

/// Axis an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisId {
    Tilt,
    Tower,
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tilt => "tilt",
            Self::Tower => "tower",
        })
    }
}

/// Errors raised while talking to the MC or sequencing an axis.
///
/// Transport errors reach the immediate caller unretried. Axis errors are
/// only returned after the caller-supplied retry budget is spent.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum McError {
    /// No response, timeout, or the serial device failed.
    #[error("MC communication failed: {0}")]
    CommunicationFailed(String),

    /// A line that fits neither the ok nor the error grammar.
    #[error("MC protocol error: {0}")]
    ProtocolError(String),

    #[error("wrong MC firmware: found '{found}', required '{required}'")]
    WrongFirmware { found: String, required: String },

    #[error("MC self check failed: {0}")]
    SelfCheckFatal(SelfCheckCode),

    #[error("MC rejected command: {0}")]
    CommandError(CommError),

    #[error("{axis} homing failed")]
    HomingFailed { axis: AxisId },

    #[error("{axis} did not reach target {target}, stopped at {actual}")]
    PositionMismatch {
        axis: AxisId,
        target: i32,
        actual: i32,
    },

    #[error("implausible resin volume {volume_ml} ml at position {position}")]
    ProbeImplausible { volume_ml: u32, position: i32 },

    #[error("MC firmware update failed with exit code {0}")]
    UpdateFailed(i32),

    #[error("MC firmware update in progress")]
    FlashInProgress,

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out")]
    Timeout,

    #[error("invalid profile")]
    InvalidProfile,

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for McError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl McError {
    /// Whether the error is a transport failure rather than a refusal by the
    /// MC or an axis fault.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::CommunicationFailed(_) | Self::ProtocolError(_) | Self::Io(_)
        )
    }
}
