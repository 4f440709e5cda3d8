//! Numeric code tables reported by the MC.
//!
//! - [`CommError`]: per-command failure, sent as `e<digit>`.
//! - [`SelfCheckCode`]: boot-time self test failure, read with `?err`.

use std::fmt;

/// Failure reported for a single command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommError {
    /// `e1`, also used for any unknown digit.
    Unspecified,
    /// `e2`
    Busy,
    /// `e3`
    SyntaxError,
    /// `e4`
    ParamOutOfRange,
    /// `e5`
    NotPermitted,
    /// `e6`
    NullPointer,
    /// `e7`
    NotFound,
}

impl CommError {
    /// Decode the digit following `e`. Unknown digits map to
    /// [`CommError::Unspecified`].
    pub const fn from_code(code: u8) -> Self {
        match code {
            2 => Self::Busy,
            3 => Self::SyntaxError,
            4 => Self::ParamOutOfRange,
            5 => Self::NotPermitted,
            6 => Self::NullPointer,
            7 => Self::NotFound,
            _ => Self::Unspecified,
        }
    }

    /// Parse an error character as sent on the wire.
    pub fn from_char(c: char) -> Self {
        c.to_digit(10)
            .map(|d| Self::from_code(d as u8))
            .unwrap_or(Self::Unspecified)
    }

    pub const fn code(self) -> u8 {
        match self {
            Self::Unspecified => 1,
            Self::Busy => 2,
            Self::SyntaxError => 3,
            Self::ParamOutOfRange => 4,
            Self::NotPermitted => 5,
            Self::NullPointer => 6,
            Self::NotFound => 7,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified failure",
            Self::Busy => "busy",
            Self::SyntaxError => "syntax error",
            Self::ParamOutOfRange => "parameter out of range",
            Self::NotPermitted => "operation not permitted",
            Self::NullPointer => "null pointer",
            Self::NotFound => "command not found",
        }
    }
}

impl fmt::Display for CommError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (e{})", self.description(), self.code())
    }
}

/// Self test failure detected by the MC at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelfCheckCode {
    AppFlashChecksum,
    BootloaderChecksum,
    SerialNumber,
    FuseBits,
    BootSectionLock,
    GpioSpi,
    TmcSpi,
    TmcWiring,
    UvLed,
    /// Code outside the known table, kept for the log.
    Unknown(i32),
}

impl SelfCheckCode {
    pub const fn from_code(code: i32) -> Self {
        match code {
            1 => Self::AppFlashChecksum,
            2 => Self::BootloaderChecksum,
            3 => Self::SerialNumber,
            4 => Self::FuseBits,
            5 => Self::BootSectionLock,
            6 => Self::GpioSpi,
            7 => Self::TmcSpi,
            8 => Self::TmcWiring,
            9 => Self::UvLed,
            other => Self::Unknown(other),
        }
    }

    pub const fn code(self) -> i32 {
        match self {
            Self::AppFlashChecksum => 1,
            Self::BootloaderChecksum => 2,
            Self::SerialNumber => 3,
            Self::FuseBits => 4,
            Self::BootSectionLock => 5,
            Self::GpioSpi => 6,
            Self::TmcSpi => 7,
            Self::TmcWiring => 8,
            Self::UvLed => 9,
            Self::Unknown(code) => code,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::AppFlashChecksum => "application flash checksum mismatch",
            Self::BootloaderChecksum => "bootloader checksum mismatch",
            Self::SerialNumber => "serial number check failed",
            Self::FuseBits => "fuse bits check failed",
            Self::BootSectionLock => "boot section lock check failed",
            Self::GpioSpi => "GPIO SPI bus failure",
            Self::TmcSpi => "stepper driver SPI failure",
            Self::TmcWiring => "stepper driver wiring fault",
            Self::UvLed => "UV LED failure",
            Self::Unknown(_) => "unknown self check failure",
        }
    }
}

impl fmt::Display for SelfCheckCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.description(), self.code())
    }
}
