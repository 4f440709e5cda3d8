//! Motion profiles of the tilt and tower axes.
//!
//! The MC keeps 8 profile slots per axis. A slot holds 7 parameters sent with
//! `!ticf` / `!twcf` and selected by index with `!tics` / `!twcs`.
//!
//! # Module Structure
//!
//! - [`AxisProfile`]: one slot, 7 values
//! - [`ProfileSet`]: all 8 slots of one axis
//! - [`TiltProfile`] / [`TowerProfile`]: named slots
//! - [`ProfileSlot`]: common view of the named slot enums
//! - [`SensitivityTable`]: homing current / stallguard adjustments

use crate::consts::{PROFILE_PARAMS, PROFILE_SLOTS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─── Single Profile ─────────────────────────────────────────────────

/// Parameters of one profile slot.
///
/// Wire order: start-rate, max-rate, accel, decel, current,
/// stallguard threshold, coolstep threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AxisProfile(pub [i32; PROFILE_PARAMS]);

impl AxisProfile {
    pub const START_RATE: usize = 0;
    pub const MAX_RATE: usize = 1;
    pub const ACCEL: usize = 2;
    pub const DECEL: usize = 3;
    pub const CURRENT: usize = 4;
    pub const STALLGUARD: usize = 5;
    pub const COOLSTEP: usize = 6;

    pub const fn new(values: [i32; PROFILE_PARAMS]) -> Self {
        Self(values)
    }

    /// Build from a decoded `?ticf` / `?twcf` payload.
    pub fn from_slice(values: &[i32]) -> Option<Self> {
        <[i32; PROFILE_PARAMS]>::try_from(values).ok().map(Self)
    }

    pub fn values(&self) -> &[i32; PROFILE_PARAMS] {
        &self.0
    }
}

// ─── Named Slots ────────────────────────────────────────────────────

/// Common view of the named profile slot enums.
pub trait ProfileSlot: Copy + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Every slot in index order.
    const ALL: [Self; PROFILE_SLOTS];

    fn index(self) -> u8;

    fn name(self) -> &'static str;

    fn from_index(index: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|slot| slot.index() == index)
    }

    fn homing_fast() -> Self;

    fn homing_slow() -> Self;
}

/// Tilt profile slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TiltProfile {
    HomingFast,
    HomingSlow,
    MoveFast,
    MoveSlow,
    LayerMoveSlow,
    LayerRelease,
    LayerMoveFast,
    Reserved,
}

impl ProfileSlot for TiltProfile {
    const ALL: [Self; PROFILE_SLOTS] = [
        Self::HomingFast,
        Self::HomingSlow,
        Self::MoveFast,
        Self::MoveSlow,
        Self::LayerMoveSlow,
        Self::LayerRelease,
        Self::LayerMoveFast,
        Self::Reserved,
    ];

    fn index(self) -> u8 {
        self as u8
    }

    fn name(self) -> &'static str {
        match self {
            Self::HomingFast => "homingFast",
            Self::HomingSlow => "homingSlow",
            Self::MoveFast => "moveFast",
            Self::MoveSlow => "moveSlow",
            Self::LayerMoveSlow => "layerMoveSlow",
            Self::LayerRelease => "layerRelease",
            Self::LayerMoveFast => "layerMoveFast",
            Self::Reserved => "reserved",
        }
    }

    fn homing_fast() -> Self {
        Self::HomingFast
    }

    fn homing_slow() -> Self {
        Self::HomingSlow
    }
}

/// Tower profile slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TowerProfile {
    HomingFast,
    HomingSlow,
    MoveFast,
    MoveSlow,
    Layer,
    LayerMove,
    Reserved,
    ResinSensor,
}

impl ProfileSlot for TowerProfile {
    const ALL: [Self; PROFILE_SLOTS] = [
        Self::HomingFast,
        Self::HomingSlow,
        Self::MoveFast,
        Self::MoveSlow,
        Self::Layer,
        Self::LayerMove,
        Self::Reserved,
        Self::ResinSensor,
    ];

    fn index(self) -> u8 {
        self as u8
    }

    fn name(self) -> &'static str {
        match self {
            Self::HomingFast => "homingFast",
            Self::HomingSlow => "homingSlow",
            Self::MoveFast => "moveFast",
            Self::MoveSlow => "moveSlow",
            Self::Layer => "layer",
            Self::LayerMove => "layerMove",
            Self::Reserved => "reserved",
            Self::ResinSensor => "resinSensor",
        }
    }

    fn homing_fast() -> Self {
        Self::HomingFast
    }

    fn homing_slow() -> Self {
        Self::HomingSlow
    }
}

macro_rules! impl_slot_text {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(ProfileSlot::name(*self))
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$ty as ProfileSlot>::ALL
                    .into_iter()
                    .find(|slot| ProfileSlot::name(*slot).eq_ignore_ascii_case(s))
                    .ok_or_else(|| format!("unknown profile '{s}'"))
            }
        }
    };
}

impl_slot_text!(TiltProfile);
impl_slot_text!(TowerProfile);

// ─── Profile Set ────────────────────────────────────────────────────

/// All 8 slots of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileSet(pub [AxisProfile; PROFILE_SLOTS]);

impl ProfileSet {
    pub fn get<P: ProfileSlot>(&self, slot: P) -> &AxisProfile {
        &self.0[usize::from(slot.index())]
    }

    pub fn get_mut<P: ProfileSlot>(&mut self, slot: P) -> &mut AxisProfile {
        &mut self.0[usize::from(slot.index())]
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &AxisProfile)> {
        (0u8..).zip(self.0.iter())
    }

    /// Overwrite current and stallguard threshold of both homing slots
    /// from a sensitivity table row.
    pub fn apply_sensitivity<P: ProfileSlot>(&mut self, table: &SensitivityTable, sensitivity: i8) -> Option<()> {
        let (fast, slow) = table.row(sensitivity)?;
        let homing_fast = self.get_mut(P::homing_fast());
        homing_fast.0[AxisProfile::CURRENT] = fast[0];
        homing_fast.0[AxisProfile::STALLGUARD] = fast[1];
        let homing_slow = self.get_mut(P::homing_slow());
        homing_slow.0[AxisProfile::CURRENT] = slow[0];
        homing_slow.0[AxisProfile::STALLGUARD] = slow[1];
        Some(())
    }
}

// ─── Sensitivity ────────────────────────────────────────────────────

/// Lowest accepted sensitivity.
pub const SENSITIVITY_MIN: i8 = -2;
/// Highest accepted sensitivity.
pub const SENSITIVITY_MAX: i8 = 2;

/// Homing current and stallguard threshold per sensitivity, -2..=2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensitivityTable {
    pub homing_fast: [[i32; 2]; 5],
    pub homing_slow: [[i32; 2]; 5],
}

impl SensitivityTable {
    pub const TILT: Self = Self {
        homing_fast: [[20, 5], [20, 6], [20, 7], [21, 9], [22, 12]],
        homing_slow: [[16, 3], [16, 5], [16, 7], [16, 9], [16, 11]],
    };

    pub const TOWER: Self = Self {
        homing_fast: [[22, 0], [22, 2], [22, 4], [22, 6], [22, 8]],
        homing_slow: [[14, 0], [15, 0], [16, 1], [16, 3], [16, 5]],
    };

    /// Rows for `sensitivity`, `None` outside -2..=2.
    pub fn row(&self, sensitivity: i8) -> Option<([i32; 2], [i32; 2])> {
        if !(SENSITIVITY_MIN..=SENSITIVITY_MAX).contains(&sensitivity) {
            return None;
        }
        let idx = (sensitivity - SENSITIVITY_MIN) as usize;
        Some((self.homing_fast[idx], self.homing_slow[idx]))
    }
}
