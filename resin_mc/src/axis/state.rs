//! Sequencer-side state of one axis.

use std::fmt;

/// Lifecycle of an axis.
///
/// ```text
/// Unsynced ──► Homing ──► Synced ◄──► Moving
///                 │
///                 └──► GaveUp
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AxisPhase {
    #[default]
    Unsynced,
    Homing,
    Synced,
    Moving,
    /// Homing retries exhausted.
    GaveUp,
}

impl fmt::Display for AxisPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unsynced => "unsynced",
            Self::Homing => "homing",
            Self::Synced => "synced",
            Self::Moving => "moving",
            Self::GaveUp => "gave up",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisState<P> {
    pub phase: AxisPhase,
    /// Profile selected by the last `set_profile`.
    pub last_profile: Option<P>,
    /// Position the axis was last told to be at or move to.
    pub target_position: i32,
    /// Retries left in the running sync, `None` for unbounded.
    pub sync_retries_remaining: Option<u32>,
}

impl<P> Default for AxisState<P> {
    fn default() -> Self {
        Self {
            phase: AxisPhase::Unsynced,
            last_profile: None,
            target_position: 0,
            sync_retries_remaining: None,
        }
    }
}

impl<P> AxisState<P> {
    pub fn synced(&self) -> bool {
        matches!(self.phase, AxisPhase::Synced | AxisPhase::Moving)
    }

    pub fn moving(&self) -> bool {
        self.phase == AxisPhase::Moving
    }

    pub fn begin_homing(&mut self, retries: Option<u32>) {
        self.phase = AxisPhase::Homing;
        self.sync_retries_remaining = retries;
    }

    pub fn homed(&mut self, reference: i32) {
        self.phase = AxisPhase::Synced;
        self.target_position = reference;
        self.sync_retries_remaining = None;
    }

    pub fn gave_up(&mut self) {
        self.phase = AxisPhase::GaveUp;
        self.sync_retries_remaining = Some(0);
    }

    /// A move was issued. Moves of an unsynced axis leave it unsynced.
    pub fn begin_move(&mut self, target: i32) {
        self.target_position = target;
        if self.synced() {
            self.phase = AxisPhase::Moving;
        }
    }

    pub fn stopped(&mut self) {
        if self.phase == AxisPhase::Moving {
            self.phase = AxisPhase::Synced;
        }
    }

    pub fn unsync(&mut self) {
        self.phase = AxisPhase::Unsynced;
        self.sync_retries_remaining = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle() {
        let mut state = AxisState::<u8>::default();
        assert!(!state.synced());

        state.begin_homing(Some(2));
        assert_eq!(state.phase, AxisPhase::Homing);
        assert_eq!(state.sync_retries_remaining, Some(2));

        state.homed(0);
        assert!(state.synced());

        state.begin_move(4928);
        assert!(state.moving());
        assert!(state.synced());
        state.stopped();
        assert_eq!(state.phase, AxisPhase::Synced);
        assert_eq!(state.target_position, 4928);
    }

    #[test]
    fn unsynced_moves_stay_unsynced() {
        let mut state = AxisState::<u8>::default();
        state.begin_move(100);
        assert_eq!(state.phase, AxisPhase::Unsynced);
        state.stopped();
        assert_eq!(state.phase, AxisPhase::Unsynced);
    }

    #[test]
    fn give_up_is_terminal_until_next_sync() {
        let mut state = AxisState::<u8>::default();
        state.begin_homing(None);
        state.gave_up();
        assert_eq!(state.phase, AxisPhase::GaveUp);
        assert_eq!(state.phase.to_string(), "gave up");
        state.begin_move(10);
        assert_eq!(state.phase, AxisPhase::GaveUp);
        state.begin_homing(Some(0));
        assert_eq!(state.phase, AxisPhase::Homing);
    }
}
