//! Printer hardware configuration read by the axis sequencer.
//!
//! Everything here is owned by the configuration file. The sequencer only
//! reads it; calibration values are written back by external tooling.

use super::profile::{ProfileSet, SENSITIVITY_MAX, SENSITIVITY_MIN};
use super::tuning::TearOffTuning;
use crate::config::ConfigError;
use crate::consts::{FAN_COUNT, MICROSTEPS, STEPS_PER_REV};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default leveled tilt position [microsteps], a full-step multiple.
pub const DEFAULT_TILT_HEIGHT: i32 = 4928;
/// Default tower travel [mm].
pub const DEFAULT_TOWER_HEIGHT_MM: f64 = 120.0;
/// Default tower zero adjustment [mm].
pub const DEFAULT_TOWER_OFFSET_MM: f64 = 0.05;

/// Polling cadence of the axis sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionTiming {
    /// Delay between issuing a homing and the first status query. The MC
    /// starts homing late and reports the previous result until then.
    pub home_start_ms: u64,
    /// Sleep between homing status queries.
    pub homing_poll_ms: u64,
    /// Sleep between move status queries.
    pub move_poll_ms: u64,
    /// Settling time after enabling the resin sensor.
    pub resin_sensor_settle_ms: u64,
    /// Upper bound on a single wait loop, 0 disables it.
    pub wait_timeout_s: u64,
}

impl Default for MotionTiming {
    fn default() -> Self {
        Self {
            home_start_ms: 100,
            homing_poll_ms: 250,
            move_poll_ms: 100,
            resin_sensor_settle_ms: 1000,
            wait_timeout_s: 0,
        }
    }
}

impl MotionTiming {
    /// Timing with no sleeps, for simulated hardware.
    pub const fn immediate() -> Self {
        Self {
            home_start_ms: 0,
            homing_poll_ms: 0,
            move_poll_ms: 0,
            resin_sensor_settle_ms: 0,
            wait_timeout_s: 0,
        }
    }

    pub const fn home_start(&self) -> Duration {
        Duration::from_millis(self.home_start_ms)
    }

    pub const fn homing_poll(&self) -> Duration {
        Duration::from_millis(self.homing_poll_ms)
    }

    pub const fn move_poll(&self) -> Duration {
        Duration::from_millis(self.move_poll_ms)
    }

    pub const fn resin_sensor_settle(&self) -> Duration {
        Duration::from_millis(self.resin_sensor_settle_ms)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        (self.wait_timeout_s > 0).then(|| Duration::from_secs(self.wait_timeout_s))
    }
}

/// `[hw]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HwConfig {
    /// Tower screw pitch [mm per revolution].
    pub screw_mm: u32,
    /// Leveled tilt position [microsteps].
    pub tilt_height: i32,
    /// Tower travel [microsteps]. Derived from the screw pitch when unset.
    pub tower_height: Option<i32>,
    /// Tower zero adjustment [microsteps]. Derived when unset.
    pub calib_tower_offset: Option<i32>,
    pub stirring_moves: u32,
    pub stirring_delay_s: u32,
    /// Stall recoveries allowed before a move reports a position mismatch.
    pub position_retries: u32,
    /// Additional homing attempts of the resync done by stall recovery and
    /// stirring.
    pub homing_retries: u32,
    /// Require an exact MC firmware version match on connect.
    pub version_check: bool,
    /// Board revision passed to the flashing utility.
    pub board_version: u8,
    pub tilt_sensitivity: i8,
    pub tower_sensitivity: i8,
    /// Target RPM of the UV LED, blower and rear fans.
    pub fan_rpm: [u32; FAN_COUNT],
    pub fan_enabled: [bool; FAN_COUNT],
    /// Tilt current while resting at the layer height.
    pub tilt_hold_current: i32,
    pub tower_hold_current: i32,
    pub uv_pwm: u32,
    pub power_led_pwm: u32,
    pub mute: bool,
    /// Tilt profiles uploaded after connect, if set.
    pub tilt_profiles: Option<ProfileSet>,
    /// Tower profiles uploaded after connect, if set.
    pub tower_profiles: Option<ProfileSet>,
    pub tuning: TearOffTuning,
    pub timing: MotionTiming,
}

impl Default for HwConfig {
    fn default() -> Self {
        Self {
            screw_mm: 4,
            tilt_height: DEFAULT_TILT_HEIGHT,
            tower_height: None,
            calib_tower_offset: None,
            stirring_moves: 3,
            stirring_delay_s: 5,
            position_retries: 1,
            homing_retries: 2,
            version_check: true,
            board_version: 6,
            tilt_sensitivity: 0,
            tower_sensitivity: 0,
            fan_rpm: [2000, 3300, 1000],
            fan_enabled: [true; FAN_COUNT],
            tilt_hold_current: 35,
            tower_hold_current: 12,
            uv_pwm: 0,
            power_led_pwm: 100,
            mute: false,
            tilt_profiles: None,
            tower_profiles: None,
            tuning: TearOffTuning::default(),
            timing: MotionTiming::default(),
        }
    }
}

impl HwConfig {
    /// Tower microsteps per millimeter.
    pub fn microsteps_per_mm(&self) -> f64 {
        f64::from(STEPS_PER_REV * MICROSTEPS) / f64::from(self.screw_mm)
    }

    /// Millimeters to tower microsteps, truncated.
    pub fn to_microsteps(&self, mm: f64) -> i32 {
        (mm * self.microsteps_per_mm()) as i32
    }

    /// Tower microsteps to millimeters, rounded to 3 decimals.
    pub fn to_mm(&self, microsteps: i32) -> f64 {
        (f64::from(microsteps) / self.microsteps_per_mm() * 1000.0).round() / 1000.0
    }

    /// Tower size of one microstep [nm].
    pub fn tower_microstep_nm(&self) -> f64 {
        f64::from(self.screw_mm) * 1_000_000.0 / f64::from(STEPS_PER_REV * MICROSTEPS)
    }

    pub fn tower_height(&self) -> i32 {
        self.tower_height
            .unwrap_or_else(|| self.to_microsteps(DEFAULT_TOWER_HEIGHT_MM))
    }

    pub fn calib_tower_offset(&self) -> i32 {
        self.calib_tower_offset
            .unwrap_or_else(|| self.to_microsteps(DEFAULT_TOWER_OFFSET_MM))
    }

    /// Fan enable bitmask for `!fans`.
    pub fn fan_mask(&self) -> u32 {
        self.fan_enabled
            .iter()
            .enumerate()
            .filter(|(_, on)| **on)
            .fold(0, |mask, (i, _)| mask | (1 << i))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `screw_mm` is zero
    /// - `stirring_moves` is outside 1..=10
    /// - a sensitivity is outside -2..=2
    /// - `board_version` is outside 5..=6
    /// - `tilt_height` is negative
    /// - a tear-off stage has zero cycles
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.screw_mm == 0 {
            return Err(ConfigError::ValidationError(
                "hw.screw_mm must be greater than 0".to_string(),
            ));
        }
        if !(1..=10).contains(&self.stirring_moves) {
            return Err(ConfigError::ValidationError(format!(
                "hw.stirring_moves must be 1..=10, got {}",
                self.stirring_moves
            )));
        }
        for (name, value) in [
            ("tilt_sensitivity", self.tilt_sensitivity),
            ("tower_sensitivity", self.tower_sensitivity),
        ] {
            if !(SENSITIVITY_MIN..=SENSITIVITY_MAX).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "hw.{name} must be -2..=2, got {value}"
                )));
            }
        }
        if !(5..=6).contains(&self.board_version) {
            return Err(ConfigError::ValidationError(format!(
                "hw.board_version must be 5 or 6, got {}",
                self.board_version
            )));
        }
        if self.tilt_height < 0 {
            return Err(ConfigError::ValidationError(
                "hw.tilt_height must not be negative".to_string(),
            ));
        }
        for (name, stage) in [
            ("down_large_fill", &self.tuning.down_large_fill),
            ("down_small_fill", &self.tuning.down_small_fill),
            ("up", &self.tuning.up),
        ] {
            if stage.cycles == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "hw.tuning.{name} needs at least one cycle"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tower_conversions() {
        let hw = HwConfig::default();
        assert_eq!(hw.microsteps_per_mm(), 800.0);
        assert_eq!(hw.to_microsteps(36.0), 28_800);
        assert_eq!(hw.to_microsteps(1.0), 800);
        assert_eq!(hw.to_mm(4_800), 6.0);
        assert_eq!(hw.to_mm(1), 0.001);
        assert_eq!(hw.tower_height(), 96_000);
        assert_eq!(hw.calib_tower_offset(), 40);
        assert_eq!(hw.tower_microstep_nm(), 1250.0);
    }

    #[test]
    fn explicit_heights_win() {
        let hw = HwConfig {
            tower_height: Some(1024),
            calib_tower_offset: Some(-8),
            ..HwConfig::default()
        };
        assert_eq!(hw.tower_height(), 1024);
        assert_eq!(hw.calib_tower_offset(), -8);
    }

    #[test]
    fn fan_mask_follows_enabled() {
        let mut hw = HwConfig::default();
        assert_eq!(hw.fan_mask(), 0b111);
        hw.fan_enabled[1] = false;
        assert_eq!(hw.fan_mask(), 0b101);
    }

    #[test]
    fn validation() {
        assert!(HwConfig::default().validate().is_ok());

        let hw = HwConfig {
            screw_mm: 0,
            ..HwConfig::default()
        };
        assert!(hw.validate().is_err());

        let hw = HwConfig {
            tower_sensitivity: 3,
            ..HwConfig::default()
        };
        assert!(matches!(
            hw.validate(),
            Err(ConfigError::ValidationError(msg)) if msg.contains("tower_sensitivity")
        ));

        let hw = HwConfig {
            stirring_moves: 0,
            ..HwConfig::default()
        };
        assert!(hw.validate().is_err());

        let mut hw = HwConfig::default();
        hw.tuning.up.cycles = 0;
        assert!(hw.validate().is_err());
    }

    #[test]
    fn timing_helpers() {
        let t = MotionTiming::default();
        assert_eq!(t.homing_poll(), Duration::from_millis(250));
        assert_eq!(t.home_start(), Duration::from_millis(100));
        assert_eq!(MotionTiming::immediate().home_start(), Duration::ZERO);
        assert_eq!(t.wait_timeout(), None);
        let t = MotionTiming {
            wait_timeout_s: 30,
            ..MotionTiming::immediate()
        };
        assert_eq!(t.wait_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(t.move_poll(), Duration::ZERO);
    }
}
