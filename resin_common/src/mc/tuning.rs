//! Tear-off tuning of the tilt layer moves.
//!
//! Each stage is stored on disk as an 8-value vector:
//!
//! ```text
//! [stage-profile, offset-steps, offset-delay-ms, finish-profile,
//!  cycle-count, cycle-delay-ms, homing-tolerance, homing-cycles]
//! ```

use super::profile::{ProfileSlot, TiltProfile};
use crate::consts::TUNING_PARAMS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One tear-off stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[i32; 8]", into = "[i32; 8]")]
pub struct TearOffStage {
    /// Profile of the initial offset move.
    pub stage_profile: TiltProfile,
    /// Steps travelled with the stage profile. Zero skips the move.
    pub offset_steps: i32,
    pub offset_delay_ms: u32,
    /// Profile of the remaining travel.
    pub finish_profile: TiltProfile,
    /// Number of equal sub-moves the remaining travel is split into.
    pub cycles: u32,
    pub cycle_delay_ms: u32,
    pub homing_tolerance: i32,
    pub homing_cycles: u32,
}

impl TearOffStage {
    pub const fn offset_delay(&self) -> Duration {
        Duration::from_millis(self.offset_delay_ms as u64)
    }

    pub const fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.cycle_delay_ms as u64)
    }
}

fn slot(value: i32, field: &str) -> Result<TiltProfile, String> {
    u8::try_from(value)
        .ok()
        .and_then(TiltProfile::from_index)
        .ok_or_else(|| format!("{field}: {value} is not a tilt profile slot"))
}

fn non_negative(value: i32, field: &str) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("{field}: {value} must not be negative"))
}

impl TryFrom<[i32; TUNING_PARAMS]> for TearOffStage {
    type Error = String;

    fn try_from(v: [i32; TUNING_PARAMS]) -> Result<Self, Self::Error> {
        Ok(Self {
            stage_profile: slot(v[0], "stage profile")?,
            offset_steps: v[1],
            offset_delay_ms: non_negative(v[2], "offset delay")?,
            finish_profile: slot(v[3], "finish profile")?,
            cycles: non_negative(v[4], "cycle count")?,
            cycle_delay_ms: non_negative(v[5], "cycle delay")?,
            homing_tolerance: v[6],
            homing_cycles: non_negative(v[7], "homing cycles")?,
        })
    }
}

impl From<TearOffStage> for [i32; TUNING_PARAMS] {
    fn from(s: TearOffStage) -> Self {
        let clamp = |v: u32| i32::try_from(v).unwrap_or(i32::MAX);
        [
            i32::from(s.stage_profile.index()),
            s.offset_steps,
            clamp(s.offset_delay_ms),
            i32::from(s.finish_profile.index()),
            clamp(s.cycles),
            clamp(s.cycle_delay_ms),
            s.homing_tolerance,
            clamp(s.homing_cycles),
        ]
    }
}

/// The three tear-off stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TearOffTuning {
    /// Layer down with a large exposed area (slow tear-off).
    pub down_large_fill: TearOffStage,
    /// Layer down with a small exposed area.
    pub down_small_fill: TearOffStage,
    /// Layer up.
    pub up: TearOffStage,
}

impl Default for TearOffTuning {
    fn default() -> Self {
        Self {
            down_large_fill: TearOffStage {
                stage_profile: TiltProfile::LayerRelease,
                offset_steps: 650,
                offset_delay_ms: 1000,
                finish_profile: TiltProfile::LayerMoveSlow,
                cycles: 1,
                cycle_delay_ms: 0,
                homing_tolerance: 64,
                homing_cycles: 3,
            },
            down_small_fill: TearOffStage {
                stage_profile: TiltProfile::LayerRelease,
                offset_steps: 0,
                offset_delay_ms: 0,
                finish_profile: TiltProfile::LayerMoveFast,
                cycles: 1,
                cycle_delay_ms: 0,
                homing_tolerance: 0,
                homing_cycles: 0,
            },
            up: TearOffStage {
                stage_profile: TiltProfile::MoveFast,
                offset_steps: 400,
                offset_delay_ms: 0,
                finish_profile: TiltProfile::LayerRelease,
                cycles: 1,
                cycle_delay_ms: 0,
                homing_tolerance: 0,
                homing_cycles: 0,
            },
        }
    }
}

impl TearOffTuning {
    /// Stage used for the layer down move.
    pub fn down(&self, slow: bool) -> &TearOffStage {
        if slow {
            &self.down_large_fill
        } else {
            &self.down_small_fill
        }
    }
}
