//! Status word edge tracking.
//!
//! Every `?` query result is fed to a [`StatusTracker`], which compares it
//! with the previous word and pushes a [`StatusEvent`] to each subscriber for
//! every watched flag that changed. The first update after construction
//! reports all watched flags.

use parking_lot::Mutex;
use resin_common::mc::status::{StatusBit, StatusBits};
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::debug;

/// Flags whose edges are reported to subscribers.
pub const WATCHED: [StatusBit; 5] = [
    StatusBit::Tower,
    StatusBit::Tilt,
    StatusBit::Button,
    StatusBit::Cover,
    StatusBit::Fans,
];

/// Edge of a single watched flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEvent {
    pub bit: StatusBit,
    pub value: bool,
}

#[derive(Default)]
pub struct StatusTracker {
    previous: Mutex<Option<StatusBits>>,
    subscribers: Mutex<Vec<Sender<StatusEvent>>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new event consumer.
    pub fn subscribe(&self) -> Receiver<StatusEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Last word seen, if any.
    pub fn last(&self) -> Option<StatusBits> {
        *self.previous.lock()
    }

    /// Record a fresh word and publish the edges it introduces.
    pub fn update(&self, bits: StatusBits) -> Vec<StatusEvent> {
        let previous = self.previous.lock().replace(bits);
        let changed = previous.map_or(StatusBits::all(), |prev| bits.changed_since(prev));

        let events: Vec<StatusEvent> = WATCHED
            .iter()
            .filter(|bit| changed.contains(bit.flag()))
            .map(|&bit| StatusEvent {
                bit,
                value: bits.get(bit),
            })
            .collect();

        if !events.is_empty() {
            let mut subscribers = self.subscribers.lock();
            for event in &events {
                debug!(bit = %event.bit, value = event.value, "MC status changed");
                // Dropped receivers are pruned.
                subscribers.retain(|tx| tx.send(*event).is_ok());
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_update_reports_all_watched() {
        let tracker = StatusTracker::new();
        let rx = tracker.subscribe();
        let events = tracker.update(StatusBits::from_word(0x0081));
        assert_eq!(events.len(), WATCHED.len());
        assert_eq!(
            events[0],
            StatusEvent {
                bit: StatusBit::Tower,
                value: true
            }
        );
        assert_eq!(rx.try_iter().count(), WATCHED.len());
    }

    #[test]
    fn only_edges_after_first() {
        let tracker = StatusTracker::new();
        tracker.update(StatusBits::from_word(0x0081));
        let rx = tracker.subscribe();

        assert!(tracker.update(StatusBits::from_word(0x0081)).is_empty());
        // Endstop is not watched.
        assert!(tracker.update(StatusBits::from_word(0x0181)).is_empty());

        let events = tracker.update(StatusBits::from_word(0x0101));
        assert_eq!(
            events,
            vec![StatusEvent {
                bit: StatusBit::Cover,
                value: false
            }]
        );
        assert_eq!(rx.try_recv().unwrap().bit, StatusBit::Cover);
        assert_eq!(tracker.last(), Some(StatusBits::from_word(0x0101)));
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let tracker = StatusTracker::new();
        drop(tracker.subscribe());
        tracker.update(StatusBits::empty());
        assert!(tracker.subscribers.lock().is_empty());
    }
}
