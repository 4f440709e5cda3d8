//! Tilt axis: vat tilting, layer tear-off and resin stirring.

use super::motion::{Axis, AxisKind, AxisVerbs};
use resin_common::consts::{TILT_END, TILT_UNSTUCK_STEP};
use resin_common::mc::error::{AxisId, McError};
use resin_common::mc::hw::HwConfig;
use resin_common::mc::profile::{SensitivityTable, TiltProfile};
use resin_common::mc::status::StatusBit;
use std::thread;
use tracing::{debug, info, warn};

pub struct TiltAxis;

impl AxisKind for TiltAxis {
    type Profile = TiltProfile;

    const ID: AxisId = AxisId::Tilt;
    const VERBS: AxisVerbs = AxisVerbs {
        home: "!tiho",
        home_status: "?tiho",
        home_calibrate: "!tihc",
        move_absolute: "!tima",
        get_position: "?tipo",
        set_position: "!tipo",
        select_profile: "!tics",
        get_profile: "?tics",
        set_profile_values: "!ticf",
        get_profile_values: "?ticf",
        set_current: "!ticu",
    };
    const MOTION_MASK: i32 = 2;
    const SENSITIVITY: SensitivityTable = SensitivityTable::TILT;

    fn reference_position(_hw: &HwConfig) -> i32 {
        0
    }
}

pub type Tilt = Axis<TiltAxis>;

impl Axis<TiltAxis> {
    fn endstop(&self) -> bool {
        self.mc.check_state(StatusBit::Endstop)
    }

    fn move_wait_unchecked(&self, position: i32) -> Result<(), McError> {
        self.move_absolute(position)?;
        self.wait_stopped()
    }

    /// Tear the printed layer off the vat film and lower the tilt to the
    /// endstop.
    ///
    /// `slow` selects the large-fill stage. When the endstop is not reached
    /// the tilt is nudged down in small steps and then resynced.
    pub fn layer_down(&self, slow: bool) -> Result<(), McError> {
        let _op = self.operation();
        let stage = *self.hw.tuning.down(slow);
        debug!(slow, ?stage, "Tilt layer down");

        self.set_profile(stage.stage_profile)?;
        if stage.offset_steps > 0 {
            let position = self.position()?;
            self.move_wait_unchecked(position - stage.offset_steps)?;
        }
        self.set_profile(stage.finish_profile)?;
        thread::sleep(stage.offset_delay());

        let cycles = i32::try_from(stage.cycles).unwrap_or(i32::MAX).max(1);
        let per_cycle = self.position()? / cycles;
        for _ in 0..cycles {
            let position = self.position()?;
            self.move_wait_unchecked(position - per_cycle)?;
            thread::sleep(stage.cycle_delay());
        }

        self.move_wait_unchecked(0)?;
        if self.endstop() {
            return Ok(());
        }

        warn!("Tilt unstucking");
        self.set_profile(TiltProfile::LayerRelease)?;
        let mut travelled = 0;
        while travelled < TILT_END && !self.endstop() {
            self.set_position(TILT_UNSTUCK_STEP)?;
            self.move_wait_unchecked(0)?;
            travelled += TILT_UNSTUCK_STEP;
        }
        self.sync(Some(1))
    }

    /// Raise the tilt back to the leveled position after a layer and drop
    /// to the hold current.
    pub fn layer_up(&self) -> Result<(), McError> {
        let _op = self.operation();
        let stage = self.hw.tuning.up;
        let height = self.hw.tilt_height;
        debug!(?stage, "Tilt layer up");

        self.set_profile(stage.stage_profile)?;
        self.move_wait_unchecked(height - stage.offset_steps)?;
        self.set_profile(stage.finish_profile)?;
        thread::sleep(stage.offset_delay());

        let cycles = i32::try_from(stage.cycles).unwrap_or(i32::MAX).max(1);
        let start = self.position()?;
        let per_cycle = (height - start) / cycles;
        for cycle in 1..=cycles {
            let target = if cycle == cycles {
                height
            } else {
                start + per_cycle * cycle
            };
            self.move_wait_unchecked(target)?;
            thread::sleep(stage.cycle_delay());
        }

        self.set_current(self.hw.tilt_hold_current)
    }

    /// Move the tilt up and down to mix the resin. End positions are not
    /// verified; each cycle finishes with a resync allowed
    /// `homing_retries` extra attempts.
    pub fn stir_resin(&self) -> Result<(), McError> {
        let _op = self.operation();
        info!(moves = self.hw.stirring_moves, "Stirring resin");
        for _ in 0..self.hw.stirring_moves {
            self.set_profile(TiltProfile::HomingFast)?;
            self.move_wait_unchecked(self.hw.tilt_height)?;
            self.move_wait_unchecked(0)?;
            self.sync(Some(self.hw.homing_retries))?;
        }
        Ok(())
    }
}
