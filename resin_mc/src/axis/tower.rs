//! Tower axis: platform positioning and resin level probing.

use super::motion::{Axis, AxisKind, AxisVerbs};
use crate::frame::Command;
use resin_common::consts::{RESIN_MAX_VOLUME_ML, RESIN_PROBE_END_MM, RESIN_PROBE_START_MM};
use resin_common::mc::error::{AxisId, McError};
use resin_common::mc::hw::HwConfig;
use resin_common::mc::profile::{SensitivityTable, TowerProfile};
use std::thread;
use tracing::{info, warn};

pub struct TowerAxis;

impl AxisKind for TowerAxis {
    type Profile = TowerProfile;

    const ID: AxisId = AxisId::Tower;
    const VERBS: AxisVerbs = AxisVerbs {
        home: "!twho",
        home_status: "?twho",
        home_calibrate: "!twhc",
        move_absolute: "!twma",
        get_position: "?twpo",
        set_position: "!twpo",
        select_profile: "!twcs",
        get_profile: "?twcs",
        set_profile_values: "!twcf",
        get_profile_values: "?twcf",
        set_current: "!twcu",
    };
    const MOTION_MASK: i32 = 1;
    const SENSITIVITY: SensitivityTable = SensitivityTable::TOWER;

    fn reference_position(hw: &HwConfig) -> i32 {
        hw.tower_height()
    }
}

pub type Tower = Axis<TowerAxis>;

// ─── Resin Probe ────────────────────────────────────────────────────

/// Outcome of a resin level measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResinProbeResult {
    /// Tower position where the sensor triggered [microsteps].
    pub position: i32,
    /// Resin volume rounded to 10 ml, 0 when nothing was detected.
    pub volume_ml: u32,
    start: i32,
    end: i32,
}

impl ResinProbeResult {
    /// Derive the volume from the stop position of a probe run that
    /// travelled from `start` down to at most `end`.
    pub fn from_stop(hw: &HwConfig, position: i32, start: i32, end: i32) -> Self {
        let volume_ml = if position == end {
            0
        } else {
            round_to_10_ml(precise_volume_ml(hw.to_mm(position)))
        };
        Self {
            position,
            volume_ml,
            start,
            end,
        }
    }

    /// Tank fill in percent, in steps of 10.
    pub fn volume_percent(&self) -> u32 {
        volume_percent(self.volume_ml)
    }

    /// Reject results a filled tank cannot produce.
    pub fn checked(self) -> Result<Self, McError> {
        if self.volume_ml == 0 || !(self.end..=self.start).contains(&self.position) {
            return Err(McError::ProbeImplausible {
                volume_ml: self.volume_ml,
                position: self.position,
            });
        }
        Ok(self)
    }
}

// Tank geometry: 1 mm holds 13.7 ml up to 10 mm (~137 ml) and 12.5 ml per
// 0.9 mm above.
fn precise_volume_ml(height_mm: f64) -> f64 {
    if height_mm < 10.0 {
        height_mm * 13.7
    } else {
        height_mm * 0.9 * 12.5
    }
}

fn round_to_10_ml(ml: f64) -> u32 {
    ((ml / 10.0).round_ties_even() * 10.0).max(0.0) as u32
}

/// Tank fill in percent, in steps of 10.
pub fn volume_percent(volume_ml: u32) -> u32 {
    (10.0 * (10.0 * f64::from(volume_ml) / RESIN_MAX_VOLUME_ML).ceil()) as u32
}

impl Axis<TowerAxis> {
    pub fn to_mm(&self, microsteps: i32) -> f64 {
        self.hw.to_mm(microsteps)
    }

    pub fn position_mm(&self) -> Result<f64, McError> {
        Ok(self.to_mm(self.position()?))
    }

    pub fn move_to_mm(&self, mm: f64) -> Result<(), McError> {
        self.move_absolute(self.hw.to_microsteps(mm))
    }

    pub fn tower_to_top(&self) -> Result<(), McError> {
        self.move_absolute(self.hw.tower_height())
    }

    /// Move to the calibrated print start.
    pub fn tower_to_zero(&self) -> Result<(), McError> {
        self.move_absolute(self.hw.calib_tower_offset())
    }

    fn resin_sensor(&self, enabled: bool) -> Result<(), McError> {
        self.mc
            .do_command(Command::new("!rsen").arg(enabled))
            .map(drop)
    }

    /// Measure the resin level by lowering the platform until the sensor
    /// touches the resin.
    ///
    /// The raw result is returned; use [`ResinProbeResult::checked`] to
    /// reject an empty or implausible measurement.
    pub fn probe_resin_volume(&self) -> Result<ResinProbeResult, McError> {
        let _op = self.operation();
        let start = self.hw.to_microsteps(RESIN_PROBE_START_MM);
        let end = self.hw.to_microsteps(RESIN_PROBE_END_MM);
        let retries = Some(self.hw.position_retries);

        self.set_profile(TowerProfile::HomingFast)?;
        self.move_absolute_wait(start, retries)?;
        self.resin_sensor(true)?;
        thread::sleep(self.hw.timing.resin_sensor_settle());

        self.set_profile(TowerProfile::ResinSensor)?;
        let measured = self.measure_resin(start, end);
        let disabled = self.resin_sensor(false);
        let position = measured?;
        disabled?;

        let result = ResinProbeResult::from_stop(&self.hw, position, start, end);
        if result.volume_ml == 0 {
            warn!(position, "Resin sensor did not trigger");
        } else {
            info!(
                position,
                volume_ml = result.volume_ml,
                percent = result.volume_percent(),
                "Resin volume measured"
            );
        }
        Ok(result)
    }

    fn measure_resin(&self, start: i32, end: i32) -> Result<i32, McError> {
        self.mc
            .do_command(Command::new("!rsme").arg(start - end))?;
        self.wait_stopped()?;
        self.position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedMc;
    use resin_common::config::McConfig;
    use resin_common::mc::hw::MotionTiming;
    use std::sync::Arc;

    fn rig() -> (SimulatedMc, Tower) {
        let sim = SimulatedMc::new();
        let mc = Arc::new(sim.controller(&McConfig::default()).unwrap());
        let hw = HwConfig {
            timing: MotionTiming::immediate(),
            ..HwConfig::default()
        };
        let tower = Tower::new(mc, Arc::new(hw));
        tower.sync(Some(0)).unwrap();
        (sim, tower)
    }

    #[test]
    fn volume_from_height() {
        let hw = HwConfig::default();
        let six_mm = ResinProbeResult::from_stop(&hw, 4800, 28_800, 800);
        assert_eq!(six_mm.volume_ml, 80);
        let twenty_two = ResinProbeResult::from_stop(&hw, 17_600, 28_800, 800);
        assert_eq!(twenty_two.volume_ml, 250);
        assert_eq!(ResinProbeResult::from_stop(&hw, 800, 28_800, 800).volume_ml, 0);
    }

    #[test]
    fn percent_rounds_up_to_tens() {
        assert_eq!(volume_percent(80), 40);
        assert_eq!(volume_percent(200), 100);
        assert_eq!(volume_percent(0), 0);
        assert_eq!(volume_percent(110), 60);
    }

    #[test]
    fn checked_rejects_empty_and_out_of_tank() {
        let hw = HwConfig::default();
        let empty = ResinProbeResult::from_stop(&hw, 800, 28_800, 800);
        assert!(matches!(empty.checked(), Err(McError::ProbeImplausible { volume_ml: 0, .. })));
        let above = ResinProbeResult::from_stop(&hw, 30_000, 28_800, 800);
        assert!(above.checked().is_err());
        let ok = ResinProbeResult::from_stop(&hw, 4800, 28_800, 800);
        assert_eq!(ok.checked().unwrap().volume_ml, 80);
    }

    #[test]
    fn probe_stops_at_resin() {
        let (sim, tower) = rig();
        sim.state().resin_level = Some(4800);
        let result = tower.probe_resin_volume().unwrap().checked().unwrap();
        assert_eq!(result.position, 4800);
        assert_eq!(result.volume_ml, 80);
        assert_eq!(result.volume_percent(), 40);

        let state = sim.state();
        assert!(!state.resin_sensor);
        assert!(state.commands.iter().any(|c| c == "!rsme 28000"));
        assert!(state.commands.iter().any(|c| c == "!twcs 7"));
    }

    #[test]
    fn probe_without_resin_reads_zero() {
        let (_sim, tower) = rig();
        let result = tower.probe_resin_volume().unwrap();
        assert_eq!(result.position, 800);
        assert_eq!(result.volume_ml, 0);
        assert!(result.checked().is_err());
    }

    #[test]
    fn helpers_use_calibration() {
        let (_sim, tower) = rig();
        assert_eq!(tower.position_mm().unwrap(), 120.0);
        tower.tower_to_zero().unwrap();
        tower.wait_stopped().unwrap();
        assert_eq!(tower.position().unwrap(), 40);
        tower.move_to_mm(6.0).unwrap();
        tower.wait_stopped().unwrap();
        assert_eq!(tower.position_mm().unwrap(), 6.0);
        tower.tower_to_top().unwrap();
        tower.wait_stopped().unwrap();
        assert_eq!(tower.position().unwrap(), 96_000);
    }
}
