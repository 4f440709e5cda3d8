//! Printer hardware assembled around one MC connection.
//!
//! [`Hardware`] wires the controller, both axes and the peripherals to a
//! shared [`McController`] and runs the post-connect initialisation: profile
//! upload, homing sensitivities and peripheral defaults.

use crate::axis::{Tilt, Tower};
use crate::controller::{ConnectionInfo, McController};
use crate::peripherals::Peripherals;
use crate::sim::SimulatedMc;
use resin_common::config::McConfig;
use resin_common::mc::error::McError;
use resin_common::mc::hw::HwConfig;
use std::sync::Arc;
use tracing::{error, info};

pub struct Hardware {
    pub mc: Arc<McController>,
    pub tilt: Tilt,
    pub tower: Tower,
    pub io: Peripherals,
    hw: Arc<HwConfig>,
}

impl Hardware {
    pub fn new(mc: McController, hw: HwConfig) -> Self {
        let mc = Arc::new(mc);
        let hw = Arc::new(hw);
        Self {
            tilt: Tilt::new(Arc::clone(&mc), Arc::clone(&hw)),
            tower: Tower::new(Arc::clone(&mc), Arc::clone(&hw)),
            io: Peripherals::new(Arc::clone(&mc), Arc::clone(&hw)),
            mc,
            hw,
        }
    }

    /// Hardware on the serial device and reset GPIO of `config`.
    pub fn open(config: &McConfig) -> Result<Self, McError> {
        Ok(Self::new(McController::open(config)?, config.hw.clone()))
    }

    /// Hardware backed by a simulated MC.
    pub fn simulated(sim: &SimulatedMc, config: &McConfig) -> Result<Self, McError> {
        Ok(Self::new(sim.controller(config)?, config.hw.clone()))
    }

    pub fn hw_config(&self) -> &HwConfig {
        &self.hw
    }

    /// Connect to the MC and bring it into the configured state.
    ///
    /// A fatal self check or a wrong firmware version is an error here; use
    /// [`McController::connect`] directly to inspect those states.
    pub fn connect(&self) -> Result<ConnectionInfo, McError> {
        let state = self.mc.connect(self.hw.version_check)?;
        let info = state
            .ensure_connected()
            .inspect_err(|e| error!("MC unusable: {}", e))?
            .clone();
        info!("Connected to motion controller: {}", info);
        self.init()?;
        Ok(info)
    }

    fn init(&self) -> Result<(), McError> {
        if let Some(profiles) = &self.hw.tilt_profiles {
            self.tilt.set_profiles(profiles)?;
        }
        if let Some(profiles) = &self.hw.tower_profiles {
            self.tower.set_profiles(profiles)?;
        }
        self.tilt.sensitivity(self.hw.tilt_sensitivity)?;
        self.tower.sensitivity(self.hw.tower_sensitivity)?;
        self.io.init_defaults()
    }

    /// Home both axes.
    pub fn sync_all(&self, retries: Option<u32>) -> Result<(), McError> {
        self.tower.sync(retries)?;
        self.tilt.sync(retries)
    }

    /// Abort every running wait loop of both axes.
    pub fn cancel(&self) {
        self.tilt.cancel_token().cancel();
        self.tower.cancel_token().cancel();
    }

    /// Stop motion and disable the motor drivers.
    pub fn release_motors(&self) -> Result<(), McError> {
        self.tilt.stop()?;
        self.tower.stop()?;
        self.io.motors_release()
    }
}
