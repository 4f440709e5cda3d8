//! Access gate of the MC link.
//!
//! A single [`LinkGate`] replaces the nested exclusive / command / flash
//! locks: one mutex guards a [`GateState`] and a condition variable wakes
//! waiters whenever a flag drops.
//!
//! - A normal command waits until no debug session holds the link
//!   exclusively and no other command is in flight.
//! - A debug passthrough line only waits for the in-flight command.
//! - The exclusive flag is taken by a debug session and held across many
//!   commands.
//! - While flashing, normal commands are refused with
//!   [`McError::FlashInProgress`].

use parking_lot::{Condvar, Mutex};
use resin_common::mc::error::McError;

/// Flags guarded by the gate.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GateState {
    pub exclusive: bool,
    pub command: bool,
    pub flashing: bool,
}

#[derive(Default)]
pub struct LinkGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

/// Held for one request/response round-trip.
#[must_use]
pub struct CommandGuard<'a> {
    gate: &'a LinkGate,
}

impl Drop for CommandGuard<'_> {
    fn drop(&mut self) {
        self.gate.state.lock().command = false;
        self.gate.changed.notify_all();
    }
}

/// Held for the duration of a firmware flash.
#[must_use]
pub struct FlashGuard<'a> {
    gate: &'a LinkGate,
}

impl Drop for FlashGuard<'_> {
    fn drop(&mut self) {
        self.gate.state.lock().flashing = false;
        self.gate.changed.notify_all();
    }
}

impl LinkGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GateState {
        *self.state.lock()
    }

    /// Take the command slot for a normal command.
    ///
    /// Blocks while a debug session holds the link or another command is in
    /// flight. Fails with `FlashInProgress` while the MC is being flashed.
    pub fn command(&self) -> Result<CommandGuard<'_>, McError> {
        let mut state = self.state.lock();
        while state.exclusive || state.command {
            self.changed.wait(&mut state);
        }
        if state.flashing {
            return Err(McError::FlashInProgress);
        }
        state.command = true;
        Ok(CommandGuard { gate: self })
    }

    /// Take the command slot regardless of the exclusive flag.
    ///
    /// Used by the debug session that owns the exclusive flag itself.
    pub fn raw_command(&self) -> CommandGuard<'_> {
        let mut state = self.state.lock();
        while state.command {
            self.changed.wait(&mut state);
        }
        state.command = true;
        CommandGuard { gate: self }
    }

    /// Take the exclusive flag without waiting.
    ///
    /// Returns `false` if it is already held or a command is in flight.
    pub fn try_acquire_exclusive(&self) -> bool {
        let mut state = self.state.lock();
        if state.exclusive || state.command {
            return false;
        }
        state.exclusive = true;
        true
    }

    /// Take the exclusive flag, waiting for an in-flight command to finish.
    ///
    /// Returns `false` without waiting if the flag is already held.
    pub fn acquire_exclusive(&self) -> bool {
        let mut state = self.state.lock();
        if state.exclusive {
            return false;
        }
        while state.command {
            self.changed.wait(&mut state);
        }
        state.exclusive = true;
        true
    }

    /// Drop the exclusive flag. Returns `false` if it was not held.
    pub fn release_exclusive(&self) -> bool {
        let released = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.exclusive, false)
        };
        if released {
            self.changed.notify_all();
        }
        released
    }

    pub fn is_exclusive(&self) -> bool {
        self.state.lock().exclusive
    }

    /// Enter flash mode, waiting for an in-flight command to finish.
    pub fn begin_flash(&self) -> Result<FlashGuard<'_>, McError> {
        let mut state = self.state.lock();
        if state.flashing {
            return Err(McError::FlashInProgress);
        }
        while state.command {
            self.changed.wait(&mut state);
        }
        state.flashing = true;
        Ok(FlashGuard { gate: self })
    }
}
