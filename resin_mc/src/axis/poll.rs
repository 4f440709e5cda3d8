//! Bounded polling with cancellation.

use resin_common::mc::error::McError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Shared flag that aborts wait loops.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Re-arm after a cancellation has been handled.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Ticks of a wait loop.
///
/// Each tick after the first sleeps `interval`. A tick yields
/// `Err(Cancelled)` once the token is cancelled and `Err(Timeout)` once the
/// deadline has passed; the iterator ends after yielding an error.
pub struct Poller<'a> {
    interval: Duration,
    deadline: Option<Instant>,
    cancel: &'a CancelToken,
    first: bool,
    done: bool,
}

impl<'a> Poller<'a> {
    pub fn new(interval: Duration, timeout: Option<Duration>, cancel: &'a CancelToken) -> Self {
        Self {
            interval,
            deadline: timeout.map(|t| Instant::now() + t),
            cancel,
            first: true,
            done: false,
        }
    }

    /// Wait for the next tick.
    pub fn tick(&mut self) -> Result<(), McError> {
        if !std::mem::replace(&mut self.first, false) && !self.interval.is_zero() {
            thread::sleep(self.interval);
        }
        if self.cancel.is_cancelled() {
            return Err(McError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(McError::Timeout);
        }
        Ok(())
    }
}

impl Iterator for Poller<'_> {
    type Item = Result<(), McError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let tick = self.tick();
        self.done = tick.is_err();
        Some(tick)
    }
}
