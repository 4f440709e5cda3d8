//! Generic axis operations shared by tilt and tower.
//!
//! Both axes speak the same command family with a two-letter axis prefix
//! (`ti` / `tw`). [`AxisKind`] carries what differs per axis: the verbs, the
//! named profile slots, the `?mot` bit, the sensitivity table and the
//! position written back after homing.

use super::poll::{CancelToken, Poller};
use super::state::{AxisPhase, AxisState};
use crate::controller::McController;
use crate::frame::Command;
use parking_lot::Mutex;
use resin_common::mc::error::{AxisId, McError};
use resin_common::mc::hw::HwConfig;
use resin_common::mc::profile::{AxisProfile, ProfileSet, ProfileSlot, SensitivityTable};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Wire verbs of one axis.
#[derive(Debug, Clone, Copy)]
pub struct AxisVerbs {
    pub home: &'static str,
    pub home_status: &'static str,
    pub home_calibrate: &'static str,
    pub move_absolute: &'static str,
    pub get_position: &'static str,
    pub set_position: &'static str,
    pub select_profile: &'static str,
    pub get_profile: &'static str,
    pub set_profile_values: &'static str,
    pub get_profile_values: &'static str,
    pub set_current: &'static str,
}

/// Static description of an axis.
pub trait AxisKind: Send + Sync + 'static {
    type Profile: ProfileSlot + fmt::Display;

    const ID: AxisId;
    const VERBS: AxisVerbs;
    /// Bit of this axis in `?mot`, `!mot` and `?ena`.
    const MOTION_MASK: i32;
    const SENSITIVITY: SensitivityTable;

    /// Position written back after a successful homing.
    fn reference_position(hw: &HwConfig) -> i32;
}

/// Marks a blocking operation of an axis. The outermost one re-arms the
/// cancel token, so a cancellation aborts only the operation it hits.
pub(super) struct Operation<'a> {
    depth: &'a AtomicUsize,
}

impl Drop for Operation<'_> {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One axis of the printer, driven through the shared controller.
pub struct Axis<K: AxisKind> {
    pub(super) mc: Arc<McController>,
    pub(super) hw: Arc<HwConfig>,
    state: Mutex<AxisState<K::Profile>>,
    cancel: CancelToken,
    depth: AtomicUsize,
    _kind: PhantomData<K>,
}

impl<K: AxisKind> Axis<K> {
    pub fn new(mc: Arc<McController>, hw: Arc<HwConfig>) -> Self {
        Self {
            mc,
            hw,
            state: Mutex::new(AxisState::default()),
            cancel: CancelToken::new(),
            depth: AtomicUsize::new(0),
            _kind: PhantomData,
        }
    }

    pub fn id(&self) -> AxisId {
        K::ID
    }

    /// Snapshot of the sequencer state.
    pub fn state(&self) -> AxisState<K::Profile> {
        self.state.lock().clone()
    }

    pub fn phase(&self) -> AxisPhase {
        self.state.lock().phase
    }

    /// Token aborting the running operation of this axis.
    ///
    /// Each top-level blocking operation re-arms the token when it starts,
    /// so a cancellation never outlives the operation it aborted.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn synced(&self) -> bool {
        self.state.lock().synced()
    }

    /// Whether the last sync gave up.
    pub fn sync_failed(&self) -> bool {
        self.phase() == AxisPhase::GaveUp
    }

    pub(super) fn operation(&self) -> Operation<'_> {
        if self.depth.fetch_add(1, Ordering::SeqCst) == 0 {
            self.cancel.reset();
        }
        Operation { depth: &self.depth }
    }

    pub(super) fn poller(&self, interval: Duration) -> Poller<'_> {
        Poller::new(interval, self.hw.timing.wait_timeout(), &self.cancel)
    }

    // ─── Homing ─────────────────────────────────────────────────────

    /// MC homing status: `>0` running, `0` done, `<0` failed.
    pub fn homing_status(&self) -> Result<i32, McError> {
        self.mc.get_int(K::VERBS.home_status)
    }

    fn wait_homing(&self) -> Result<i32, McError> {
        let start = self.hw.timing.home_start();
        if !start.is_zero() {
            thread::sleep(start);
        }
        let mut poll = self.poller(self.hw.timing.homing_poll());
        loop {
            poll.tick()?;
            let status = self.homing_status()?;
            if status <= 0 {
                return Ok(status);
            }
        }
    }

    /// Home the axis.
    ///
    /// `retries` is the number of additional attempts after a failed homing;
    /// `None` retries forever (until cancelled). When the budget is spent the
    /// axis gives up with [`McError::HomingFailed`].
    pub fn sync(&self, retries: Option<u32>) -> Result<(), McError> {
        let _op = self.operation();
        self.state.lock().begin_homing(retries);
        let result = self.sync_attempts(retries);
        if let Err(e) = &result {
            if !matches!(e, McError::HomingFailed { .. }) {
                self.state.lock().unsync();
            }
        }
        result
    }

    fn sync_attempts(&self, mut remaining: Option<u32>) -> Result<(), McError> {
        loop {
            self.set_profile(K::Profile::homing_fast())?;
            self.mc.do_command(K::VERBS.home)?;
            let status = self.wait_homing()?;
            if status == 0 {
                let reference = K::reference_position(&self.hw);
                self.set_position(reference)?;
                self.state.lock().homed(reference);
                info!(axis = %K::ID, "Axis synced");
                return Ok(());
            }

            warn!(axis = %K::ID, status, "Homing failed!");
            match remaining {
                Some(0) => {
                    error!(axis = %K::ID, "Homing max tries reached!");
                    self.state.lock().gave_up();
                    return Err(McError::HomingFailed { axis: K::ID });
                }
                Some(n) => remaining = Some(n - 1),
                None => {}
            }
            self.state.lock().sync_retries_remaining = remaining;
            debug!(axis = %K::ID, ?remaining, "Retrying homing");
        }
    }

    /// Measure and store the motor phase used for accurate homing.
    pub fn home_calibrate_wait(&self) -> Result<(), McError> {
        let _op = self.operation();
        self.mc.do_command(K::VERBS.home_calibrate)?;
        if self.wait_homing()? < 0 {
            self.state.lock().unsync();
            return Err(McError::HomingFailed { axis: K::ID });
        }
        let reference = K::reference_position(&self.hw);
        self.set_position(reference)?;
        self.state.lock().homed(reference);
        Ok(())
    }

    // ─── Position ───────────────────────────────────────────────────

    pub fn position(&self) -> Result<i32, McError> {
        self.mc.get_int(K::VERBS.get_position)
    }

    /// Overwrite the MC position counter without moving.
    pub fn set_position(&self, position: i32) -> Result<(), McError> {
        self.mc
            .do_command(Command::new(K::VERBS.set_position).arg(position))?;
        self.state.lock().target_position = position;
        Ok(())
    }

    pub fn moving(&self) -> Result<bool, McError> {
        Ok(self.mc.get_int("?mot")? & K::MOTION_MASK != 0)
    }

    pub fn move_absolute(&self, position: i32) -> Result<(), McError> {
        self.mc
            .do_command(Command::new(K::VERBS.move_absolute).arg(position))?;
        self.state.lock().begin_move(position);
        debug!(axis = %K::ID, position, "Move initiated");
        Ok(())
    }

    /// Poll until the axis stops.
    pub fn wait_stopped(&self) -> Result<(), McError> {
        let _op = self.operation();
        let mut poll = self.poller(self.hw.timing.move_poll());
        loop {
            poll.tick()?;
            if !self.moving()? {
                self.state.lock().stopped();
                return Ok(());
            }
        }
    }

    /// Whether the last move reached its target.
    ///
    /// `false` while the axis is still moving. A stopped axis away from its
    /// target stalled: it is resynced with the configured homing retries,
    /// the previous profile restored and the move reissued, at most
    /// `retries` times (`None` for unbounded).
    pub fn is_on_target(&self, retries: Option<u32>) -> Result<bool, McError> {
        let _op = self.operation();
        if self.moving()? {
            return Ok(false);
        }
        let target = self.state.lock().target_position;
        let mut remaining = retries;
        loop {
            let actual = self.position()?;
            if actual == target {
                self.state.lock().stopped();
                return Ok(true);
            }
            match remaining {
                Some(0) => {
                    self.state.lock().stopped();
                    error!(axis = %K::ID, target, actual, "Position mismatch");
                    return Err(McError::PositionMismatch {
                        axis: K::ID,
                        target,
                        actual,
                    });
                }
                Some(n) => remaining = Some(n - 1),
                None => {}
            }

            warn!(
                axis = %K::ID,
                target,
                actual,
                "Axis stalled, resyncing and repeating the move"
            );
            let profile = self.state.lock().last_profile;
            self.sync(Some(self.hw.homing_retries))?;
            if let Some(profile) = profile {
                self.set_profile(profile)?;
            }
            self.move_absolute(target)?;
            self.wait_stopped()?;
        }
    }

    /// Move, wait and verify, recovering stalls up to `retries` times.
    pub fn move_absolute_wait(&self, position: i32, retries: Option<u32>) -> Result<(), McError> {
        let _op = self.operation();
        self.move_absolute(position)?;
        loop {
            self.wait_stopped()?;
            if self.is_on_target(retries)? {
                return Ok(());
            }
        }
    }

    /// Stop this axis, leaving the other one alone.
    pub fn stop(&self) -> Result<(), McError> {
        let moving = self.mc.get_int("?mot")?;
        self.mc
            .do_command(Command::new("!mot").arg(moving & !K::MOTION_MASK))?;
        let position = self.position()?;
        let mut state = self.state.lock();
        state.target_position = position;
        state.stopped();
        debug!(axis = %K::ID, position, "Move stopped");
        Ok(())
    }

    /// Disable the motor driver. The axis has to be synced again.
    pub fn release(&self) -> Result<(), McError> {
        let enabled = self.mc.get_int("?ena")?;
        self.mc
            .do_command(Command::new("!ena").arg(enabled & !K::MOTION_MASK))?;
        self.state.lock().unsync();
        Ok(())
    }

    pub fn set_current(&self, current: i32) -> Result<(), McError> {
        self.mc
            .do_command(Command::new(K::VERBS.set_current).arg(current))
            .map(drop)
    }

    // ─── Profiles ───────────────────────────────────────────────────

    pub fn set_profile(&self, profile: K::Profile) -> Result<(), McError> {
        self.select_slot(profile.index())?;
        self.state.lock().last_profile = Some(profile);
        Ok(())
    }

    fn select_slot(&self, index: u8) -> Result<(), McError> {
        self.mc
            .do_command(Command::new(K::VERBS.select_profile).arg(index))
            .map(drop)
    }

    /// Profile currently selected in the MC.
    pub fn profile(&self) -> Result<K::Profile, McError> {
        let index = self.mc.get_int(K::VERBS.get_profile)?;
        u8::try_from(index)
            .ok()
            .and_then(K::Profile::from_index)
            .ok_or(McError::InvalidProfile)
    }

    /// Values of the currently selected profile.
    pub fn profile_values(&self) -> Result<AxisProfile, McError> {
        let values = self.mc.get_int_list(K::VERBS.get_profile_values)?;
        AxisProfile::from_slice(&values).ok_or_else(|| {
            McError::ProtocolError(format!("expected 7 profile values, got {}", values.len()))
        })
    }

    /// Overwrite the values of the currently selected profile.
    pub fn set_profile_values(&self, profile: &AxisProfile) -> Result<(), McError> {
        self.mc
            .do_command(Command::new(K::VERBS.set_profile_values).args(profile.values().iter().copied()))
            .map(drop)
    }

    /// Read all slots. The selected profile is restored afterwards.
    pub fn profiles(&self) -> Result<ProfileSet, McError> {
        let current = self.profile()?;
        let mut set = ProfileSet::default();
        for slot in K::Profile::ALL {
            self.select_slot(slot.index())?;
            *set.get_mut(slot) = self.profile_values()?;
        }
        self.select_slot(current.index())?;
        Ok(set)
    }

    /// Write all slots. The selected profile is restored afterwards.
    pub fn set_profiles(&self, set: &ProfileSet) -> Result<(), McError> {
        let current = self.profile()?;
        for (index, values) in set.iter() {
            self.select_slot(index)?;
            self.set_profile_values(values)?;
        }
        self.select_slot(current.index())?;
        info!(axis = %K::ID, "Profiles uploaded");
        Ok(())
    }

    /// Tune homing current and stall detection, -2 (gentle) to 2.
    pub fn sensitivity(&self, sensitivity: i8) -> Result<(), McError> {
        let mut set = self.profiles()?;
        set.apply_sensitivity::<K::Profile>(&K::SENSITIVITY, sensitivity)
            .ok_or(McError::InvalidProfile)?;
        self.set_profiles(&set)?;
        info!(axis = %K::ID, sensitivity, "Homing sensitivity changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::{Tilt, Tower};
    use crate::sim::SimulatedMc;
    use resin_common::config::McConfig;
    use resin_common::mc::hw::MotionTiming;
    use resin_common::mc::profile::{TiltProfile, TowerProfile};

    fn rig() -> (SimulatedMc, Tilt, Tower) {
        let sim = SimulatedMc::new();
        let mc = Arc::new(sim.controller(&McConfig::default()).unwrap());
        let hw = Arc::new(HwConfig {
            timing: MotionTiming::immediate(),
            ..HwConfig::default()
        });
        let tilt = Tilt::new(Arc::clone(&mc), Arc::clone(&hw));
        let tower = Tower::new(mc, hw);
        (sim, tilt, tower)
    }

    #[test]
    fn sync_writes_reference_position() {
        let (sim, tilt, tower) = rig();
        tilt.sync(Some(0)).unwrap();
        tower.sync(Some(0)).unwrap();
        assert!(tilt.synced());
        assert_eq!(tilt.position().unwrap(), 0);
        assert_eq!(tower.position().unwrap(), 96_000);
        assert_eq!(sim.state().tower.profile, TowerProfile::HomingFast as u8);
    }

    #[test]
    fn sync_retries_then_gives_up() {
        let (sim, tilt, _) = rig();
        sim.state().tilt.outcomes.extend([-1, -2]);
        tilt.sync(Some(2)).unwrap();
        assert_eq!(sim.state().tilt.homing_attempts, 3);

        sim.state().tilt.always_fail = true;
        assert_eq!(
            tilt.sync(Some(1)),
            Err(McError::HomingFailed { axis: AxisId::Tilt })
        );
        assert!(tilt.sync_failed());
        assert_eq!(sim.state().tilt.homing_attempts, 5);
    }

    #[test]
    fn cancelled_sync_leaves_axis_unsynced() {
        let (sim, tilt, _) = rig();
        sim.state().tilt.always_fail = true;
        sim.state().cancel_homing_after = Some((5, tilt.cancel_token()));
        assert_eq!(tilt.sync(None), Err(McError::Cancelled));
        assert_eq!(tilt.phase(), AxisPhase::Unsynced);
        assert_eq!(sim.state().tilt.homing_attempts, 5);
    }

    #[test]
    fn move_wait_and_stop_only_this_axis() {
        let (sim, tilt, tower) = rig();
        tilt.sync(Some(0)).unwrap();
        tilt.move_absolute_wait(1000, Some(0)).unwrap();
        assert_eq!(tilt.position().unwrap(), 1000);
        assert_eq!(tilt.phase(), AxisPhase::Synced);

        sim.state().move_polls = 5;
        tower.move_absolute(8000).unwrap();
        tilt.move_absolute(2000).unwrap();
        tilt.stop().unwrap();
        assert_eq!(sim.state().tilt.moving_polls, 0);
        assert!(sim.state().tower.moving_polls > 0);
    }

    #[test]
    fn stall_recovery_resyncs_restores_profile_and_reissues() {
        let (sim, tilt, _) = rig();
        tilt.sync(Some(0)).unwrap();
        tilt.set_profile(TiltProfile::MoveSlow).unwrap();
        sim.state().stall_moves = 1;
        sim.state().commands.clear();

        tilt.move_absolute_wait(2000, Some(1)).unwrap();
        assert_eq!(tilt.position().unwrap(), 2000);

        let commands = sim.state().commands.clone();
        let home = commands.iter().position(|c| c == "!tiho").unwrap();
        let restore = commands.iter().rposition(|c| c == "!tics 3").unwrap();
        let reissue = commands.iter().rposition(|c| c == "!tima 2000").unwrap();
        assert!(home < restore && restore < reissue);
    }

    #[test]
    fn stall_resync_retries_a_failed_homing() {
        let (sim, _, tower) = rig();
        tower.sync(Some(0)).unwrap();
        sim.state().stall_moves = 1;
        sim.state().tower.outcomes.push_back(-1);

        tower.move_absolute_wait(8000, Some(1)).unwrap();
        assert_eq!(tower.position().unwrap(), 8000);
        assert!(tower.synced());
        assert_eq!(sim.state().tower.homing_attempts, 3);
    }

    #[test]
    fn cancel_aborts_only_the_running_operation() {
        let (sim, tilt, tower) = rig();
        sim.state().cancel_homing_after = Some((1, tilt.cancel_token()));
        sim.state().tilt.always_fail = true;
        assert_eq!(tilt.sync(None), Err(McError::Cancelled));

        {
            let mut state = sim.state();
            state.cancel_homing_after = None;
            state.tilt.always_fail = false;
        }
        tilt.sync(Some(0)).unwrap();
        tilt.move_absolute_wait(1000, Some(0)).unwrap();
        assert_eq!(tilt.position().unwrap(), 1000);

        tower.cancel_token().cancel();
        tower.sync(Some(0)).unwrap();
        tower.move_absolute_wait(1000, Some(0)).unwrap();
        assert_eq!(tower.position().unwrap(), 1000);
    }

    #[test]
    fn homing_status_is_read_after_the_mc_starts() {
        let sim = SimulatedMc::new();
        let mc = Arc::new(sim.controller(&McConfig::default()).unwrap());
        let late = Arc::new(HwConfig {
            timing: MotionTiming {
                home_start_ms: 100,
                ..MotionTiming::immediate()
            },
            ..HwConfig::default()
        });
        let tilt = Tilt::new(mc, late);
        sim.state().homing_latency = Duration::from_millis(50);
        sim.state().tilt.outcomes.push_back(-1);

        assert_eq!(
            tilt.sync(Some(0)),
            Err(McError::HomingFailed { axis: AxisId::Tilt })
        );
        assert_eq!(sim.state().tilt.homing_attempts, 1);
    }

    #[test]
    fn stall_without_retries_is_position_mismatch() {
        let (sim, tilt, _) = rig();
        tilt.sync(Some(0)).unwrap();
        sim.state().stall_moves = 1;
        assert_eq!(
            tilt.move_absolute_wait(2000, Some(0)),
            Err(McError::PositionMismatch {
                axis: AxisId::Tilt,
                target: 2000,
                actual: 1000
            })
        );
    }

    #[test]
    fn profiles_round_trip_and_sensitivity() {
        let (sim, tilt, _) = rig();
        tilt.set_profile(TiltProfile::LayerRelease).unwrap();
        let mut set = ProfileSet::default();
        for (i, slot) in set.0.iter_mut().enumerate() {
            *slot = AxisProfile::new([i as i32, 2, 3, 4, 5, 6, 7]);
        }
        tilt.set_profiles(&set).unwrap();
        assert_eq!(tilt.profiles().unwrap(), set);
        assert_eq!(tilt.profile().unwrap(), TiltProfile::LayerRelease);

        tilt.sensitivity(2).unwrap();
        let fast = sim.state().tilt.profiles[0];
        assert_eq!(fast.values()[AxisProfile::CURRENT], 22);
        assert_eq!(fast.values()[AxisProfile::STALLGUARD], 12);
        assert_eq!(tilt.sensitivity(3), Err(McError::InvalidProfile));
    }

    #[test]
    fn release_unsyncs() {
        let (sim, tilt, tower) = rig();
        tilt.sync(Some(0)).unwrap();
        tower.sync(Some(0)).unwrap();
        tilt.release().unwrap();
        assert!(!tilt.synced());
        assert!(!sim.state().tilt.enabled);
        assert!(sim.state().tower.enabled);
    }

    #[test]
    fn home_calibrate_syncs() {
        let (sim, tilt, _) = rig();
        tilt.home_calibrate_wait().unwrap();
        assert!(tilt.synced());
        assert!(sim.state().commands.iter().any(|c| c == "!tihc"));
    }

    #[test]
    fn set_current_reaches_mc() {
        let (sim, _, tower) = rig();
        tower.set_current(12).unwrap();
        assert_eq!(sim.state().tower.current, 12);
    }
}
