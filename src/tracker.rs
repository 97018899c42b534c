//! State Tracker: last known status per slot and transition detection.

use chrono::{DateTime, Local};
use std::collections::HashMap;

use crate::lane::SlotReading;
use crate::{LaneId, SlotId, SlotStatus};

/// A slot whose status differs from the previous observation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionEvent {
    pub slot_id: SlotId,
    pub lane: LaneId,
    pub camera_id: String,
    pub previous: SlotStatus,
    pub current: SlotStatus,
    pub at: DateTime<Local>,
}

/// Slot id -> last observed status. Entries are created on first sight and
/// never removed.
#[derive(Debug, Default)]
pub struct StateTracker {
    last_known: HashMap<SlotId, SlotStatus>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `reading`. The first observation of a slot is a baseline and
    /// yields no event.
    pub fn observe(&mut self, reading: &SlotReading) -> Option<TransitionEvent> {
        match self.last_known.insert(reading.slot_id, reading.status) {
            Some(previous) if previous != reading.status => Some(TransitionEvent {
                slot_id: reading.slot_id,
                lane: reading.lane,
                camera_id: reading.camera_id.clone(),
                previous,
                current: reading.status,
                at: Local::now(),
            }),
            _ => None,
        }
    }

    pub fn last_status(&self, slot_id: SlotId) -> Option<SlotStatus> {
        self.last_known.get(&slot_id).copied()
    }

    pub fn len(&self) -> usize {
        self.last_known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_known.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(slot_id: SlotId, status: SlotStatus) -> SlotReading {
        SlotReading {
            slot_id,
            status,
            lane: 1,
            camera_id: "camA".into(),
            location_id: 8,
        }
    }

    #[test]
    fn first_observation_is_baseline() {
        let mut tracker = StateTracker::new();
        assert!(tracker.observe(&reading(1, SlotStatus::Occupied)).is_none());
        assert_eq!(tracker.last_status(1), Some(SlotStatus::Occupied));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn one_event_per_change() {
        let mut tracker = StateTracker::new();
        tracker.observe(&reading(3, SlotStatus::Free));
        assert!(tracker.observe(&reading(3, SlotStatus::Free)).is_none());

        let event = tracker
            .observe(&reading(3, SlotStatus::Occupied))
            .expect("transition");
        assert_eq!(event.slot_id, 3);
        assert_eq!(event.previous, SlotStatus::Free);
        assert_eq!(event.current, SlotStatus::Occupied);
        assert_eq!(event.camera_id, "camA");

        assert!(tracker.observe(&reading(3, SlotStatus::Occupied)).is_none());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn slots_are_independent() {
        let mut tracker = StateTracker::new();
        tracker.observe(&reading(1, SlotStatus::Free));
        tracker.observe(&reading(2, SlotStatus::Free));
        assert!(tracker.observe(&reading(2, SlotStatus::Occupied)).is_some());
        assert!(tracker.observe(&reading(1, SlotStatus::Free)).is_none());
        assert_eq!(tracker.len(), 2);
    }
}
