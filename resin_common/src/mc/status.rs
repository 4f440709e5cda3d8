//! MC status and reset words.
//!
//! The MC answers the bare `?` query with a 16-bit status word and `?rst`
//! with an 8-bit reset-cause word. Both are represented with `bitflags`;
//! [`StatusBit`] names the individual flags consumers ask for.

use bitflags::bitflags;
use std::fmt;
use std::str::FromStr;

bitflags! {
    /// 16-bit MC status word returned by `?`.
    ///
    /// Bits not listed here are reserved and ignored.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusBits: u16 {
        /// Tower axis is moving or homing.
        const TOWER   = 1 << 0;
        /// Tilt axis is moving or homing.
        const TILT    = 1 << 1;
        /// Power button pressed.
        const BUTTON  = 1 << 6;
        /// Cover closed.
        const COVER   = 1 << 7;
        /// Tilt endstop reached.
        const ENDSTOP = 1 << 8;
        /// MC went through a reset since the last `?rst`.
        const RESET   = 1 << 13;
        /// At least one fan reports an error.
        const FANS    = 1 << 14;
        /// MC self-test failed; details via `?err`.
        const FATAL   = 1 << 15;
    }
}

/// A single named flag of the status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusBit {
    Tower,
    Tilt,
    Button,
    Cover,
    Endstop,
    Reset,
    Fans,
    Fatal,
}

impl StatusBit {
    /// All named flags in bit order.
    pub const ALL: [StatusBit; 8] = [
        Self::Tower,
        Self::Tilt,
        Self::Button,
        Self::Cover,
        Self::Endstop,
        Self::Reset,
        Self::Fans,
        Self::Fatal,
    ];

    /// Bit index inside the status word.
    #[inline]
    pub const fn index(self) -> u8 {
        match self {
            Self::Tower => 0,
            Self::Tilt => 1,
            Self::Button => 6,
            Self::Cover => 7,
            Self::Endstop => 8,
            Self::Reset => 13,
            Self::Fans => 14,
            Self::Fatal => 15,
        }
    }

    /// Flag mask for this bit.
    #[inline]
    pub const fn flag(self) -> StatusBits {
        StatusBits::from_bits_truncate(1 << self.index())
    }

    /// Lowercase name used in logs and by the debug console.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Tower => "tower",
            Self::Tilt => "tilt",
            Self::Button => "button",
            Self::Cover => "cover",
            Self::Endstop => "endstop",
            Self::Reset => "reset",
            Self::Fans => "fans",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for StatusBit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StatusBit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|bit| bit.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown status bit '{s}'"))
    }
}

impl StatusBits {
    /// Build from the raw word, dropping reserved bits.
    #[inline]
    pub const fn from_word(word: u16) -> Self {
        Self::from_bits_truncate(word)
    }

    /// Whether a named flag is set.
    #[inline]
    pub const fn get(&self, bit: StatusBit) -> bool {
        self.contains(bit.flag())
    }

    /// Named view of every flag, in bit order.
    pub fn decode(&self) -> [(StatusBit, bool); 8] {
        StatusBit::ALL.map(|bit| (bit, self.get(bit)))
    }

    /// Flags that differ between `self` and `previous`.
    #[inline]
    pub fn changed_since(&self, previous: StatusBits) -> StatusBits {
        self.symmetric_difference(previous)
    }
}

bitflags! {
    /// Reset causes reported by `?rst` (AVR MCUSR layout).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResetFlags: u8 {
        const POWER_ON       = 1 << 0;
        const EXTERNAL       = 1 << 1;
        const BROWN_OUT      = 1 << 2;
        const WATCHDOG       = 1 << 3;
        const JTAG           = 1 << 4;
        const STACK_OVERFLOW = 1 << 7;
    }
}

impl ResetFlags {
    /// Human readable names of every set cause. Unknown bits are reported
    /// as `unknown(N)`.
    pub fn describe(raw: u8) -> Vec<String> {
        (0..8u8)
            .filter(|bit| raw & (1 << bit) != 0)
            .map(|bit| match Self::from_bits(1 << bit) {
                Some(flag) => match flag {
                    Self::POWER_ON => "power_on".to_string(),
                    Self::EXTERNAL => "external".to_string(),
                    Self::BROWN_OUT => "brown_out".to_string(),
                    Self::WATCHDOG => "watchdog".to_string(),
                    Self::JTAG => "jtag".to_string(),
                    _ => "stack_overflow".to_string(),
                },
                None => format!("unknown({bit})"),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_tower_and_cover() {
        let bits = StatusBits::from_word(0x0081);
        let decoded = bits.decode();
        let expected = [
            (StatusBit::Tower, true),
            (StatusBit::Tilt, false),
            (StatusBit::Button, false),
            (StatusBit::Cover, true),
            (StatusBit::Endstop, false),
            (StatusBit::Reset, false),
            (StatusBit::Fans, false),
            (StatusBit::Fatal, false),
        ];
        assert_eq!(decoded, expected);
    }

    #[test]
    fn reserved_bits_are_dropped() {
        let bits = StatusBits::from_word(0x0004 | 0x1000);
        assert!(bits.is_empty());
    }

    #[test]
    fn bit_indices_match_flags() {
        for bit in StatusBit::ALL {
            assert_eq!(bit.flag().bits(), 1u16 << bit.index());
        }
        assert!(StatusBits::from_word(0x8000).get(StatusBit::Fatal));
        assert!(StatusBits::from_word(0x2000).get(StatusBit::Reset));
    }

    #[test]
    fn parse_bit_names() {
        assert_eq!("endstop".parse::<StatusBit>().unwrap(), StatusBit::Endstop);
        assert_eq!("FATAL".parse::<StatusBit>().unwrap(), StatusBit::Fatal);
        assert!("lid".parse::<StatusBit>().is_err());
    }

    #[test]
    fn changed_since_reports_edges() {
        let old = StatusBits::COVER | StatusBits::TILT;
        let new = StatusBits::COVER | StatusBits::BUTTON;
        assert_eq!(new.changed_since(old), StatusBits::TILT | StatusBits::BUTTON);
    }

    #[test]
    fn reset_flags_describe() {
        assert_eq!(ResetFlags::describe(0b0000_0101), vec!["power_on", "brown_out"]);
        assert_eq!(ResetFlags::describe(0b1000_0000), vec!["stack_overflow"]);
        assert_eq!(ResetFlags::describe(0b0010_0000), vec!["unknown(5)"]);
        assert!(ResetFlags::describe(0).is_empty());
    }
}
