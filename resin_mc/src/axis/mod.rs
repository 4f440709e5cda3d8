//! Axis sequencer.
//!
//! Turns semantic axis operations (home, move, tear off a layer, probe the
//! resin level) into retried, timed sequences of MC commands. Every
//! operation blocks the calling thread; waits poll the MC and honour the
//! axis [`CancelToken`].
//!
//! # Module Structure
//!
//! - [`state`] - Per-axis lifecycle
//! - [`poll`] - Bounded polling iterator and cancellation token
//! - [`motion`] - Operations shared by both axes, generic over [`AxisKind`]
//! - [`tilt`] - Layer tear-off, layer raise and stirring
//! - [`tower`] - Resin probe and tower position helpers
//!
//! # Retries
//!
//! Retry budgets are `Option<u32>`: `Some(n)` allows `n` further attempts
//! after the first, `None` retries until cancelled.

pub mod motion;
pub mod poll;
pub mod state;
pub mod tilt;
pub mod tower;

pub use motion::{Axis, AxisKind, AxisVerbs};
pub use poll::{CancelToken, Poller};
pub use state::{AxisPhase, AxisState};
pub use tilt::{Tilt, TiltAxis};
pub use tower::{ResinProbeResult, Tower, TowerAxis, volume_percent};
