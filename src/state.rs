//! Shared status boundary.
//!
//! `SharedState` is the only state the monitoring loop shares with the status
//! API: per-lane counts and annotated frames, the aggregate status derived from
//! them, and the manual overrides. Everything sits behind one mutex. Readers get
//! copies (`snapshot`) or reference-counted frames, never the raw fields.

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::frame::Frame;
use crate::lane::{LaneLayout, LaneResult};
use crate::{LaneId, SlotStatus};

/// Per-lane occupancy as last published.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LaneCount {
    pub lane: LaneId,
    pub camera_id: String,
    pub total: usize,
    /// `None` until the lane's camera has produced a frame.
    pub occupied: Option<usize>,
}

impl LaneCount {
    /// Free slots; zero before the first observation.
    pub fn available(&self) -> usize {
        match self.occupied {
            Some(occupied) => self.total.saturating_sub(occupied),
            None => 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.occupied == Some(self.total)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LaneAvailability {
    pub lane: LaneId,
    pub total: usize,
    pub available: usize,
}

/// Availability derived from the lane counts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AggregateStatus {
    pub total_slots: usize,
    pub available_total: usize,
    pub lanes: Vec<LaneAvailability>,
}

impl AggregateStatus {
    pub fn from_counts(counts: &[LaneCount]) -> Self {
        let lanes: Vec<LaneAvailability> = counts
            .iter()
            .map(|c| LaneAvailability {
                lane: c.lane,
                total: c.total,
                available: c.available(),
            })
            .collect();
        Self {
            total_slots: counts.iter().map(|c| c.total).sum(),
            available_total: lanes.iter().map(|l| l.available).sum(),
            lanes,
        }
    }
}

/// Consistent copy of the aggregate status and the overrides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub aggregate: AggregateStatus,
    pub overrides: Vec<(LaneId, Option<SlotStatus>)>,
}

impl StatusSnapshot {
    /// Flat JSON body served by `/parking_data`.
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("total_slots".into(), self.aggregate.total_slots.into());
        body.insert(
            "available_total".into(),
            self.aggregate.available_total.into(),
        );
        for lane in &self.aggregate.lanes {
            body.insert(format!("available_lane{}", lane.lane), lane.available.into());
            body.insert(format!("lane{}_total", lane.lane), lane.total.into());
        }
        for (lane, status) in &self.overrides {
            let value = match status {
                Some(status) => Value::from(status.code()),
                None => Value::Null,
            };
            body.insert(format!("manual_lane{}", lane), value);
        }
        Value::Object(body)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OverrideError {
    #[error("unknown lane {0}")]
    UnknownLane(LaneId),
    #[error("invalid lane status '{0}'")]
    InvalidValue(String),
}

/// Current annotated frame of one lane.
#[derive(Clone, Debug)]
pub struct LaneFrame {
    pub lane: LaneId,
    pub camera_id: String,
    pub frame: Arc<Frame>,
}

#[derive(Debug)]
struct LaneEntry {
    count: LaneCount,
    frame: Option<Arc<Frame>>,
    manual: Option<SlotStatus>,
}

#[derive(Debug)]
struct StateInner {
    lanes: Vec<LaneEntry>,
    aggregate: AggregateStatus,
}

impl StateInner {
    fn lane(&self, lane: LaneId) -> Option<&LaneEntry> {
        self.lanes.iter().find(|e| e.count.lane == lane)
    }

    fn lane_mut(&mut self, lane: LaneId) -> Option<&mut LaneEntry> {
        self.lanes.iter_mut().find(|e| e.count.lane == lane)
    }

    fn counts(&self) -> Vec<LaneCount> {
        self.lanes.iter().map(|e| e.count.clone()).collect()
    }
}

#[derive(Debug)]
pub struct SharedState {
    inner: Mutex<StateInner>,
}

impl SharedState {
    pub fn new(layouts: &[LaneLayout]) -> Self {
        let lanes: Vec<LaneEntry> = layouts
            .iter()
            .map(|layout| LaneEntry {
                count: LaneCount {
                    lane: layout.lane,
                    camera_id: layout.camera_id.clone(),
                    total: layout.total_slots(),
                    occupied: None,
                },
                frame: None,
                manual: None,
            })
            .collect();
        let counts: Vec<LaneCount> = lanes.iter().map(|e| e.count.clone()).collect();
        Self {
            inner: Mutex::new(StateInner {
                aggregate: AggregateStatus::from_counts(&counts),
                lanes,
            }),
        }
    }

    /// Hold the boundary for a multi-step update.
    pub fn lock(&self) -> StateGuard<'_> {
        StateGuard {
            inner: self.inner.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.lock().snapshot()
    }

    pub fn counts(&self) -> Vec<LaneCount> {
        self.lock().counts()
    }

    pub fn frame(&self, lane: LaneId) -> Option<Arc<Frame>> {
        self.lock().frame(lane)
    }

    /// Every lane that currently has a frame, in lane order.
    pub fn frames(&self) -> Vec<LaneFrame> {
        let guard = self.lock();
        guard
            .inner
            .lanes
            .iter()
            .filter_map(|e| {
                e.frame.as_ref().map(|frame| LaneFrame {
                    lane: e.count.lane,
                    camera_id: e.count.camera_id.clone(),
                    frame: Arc::clone(frame),
                })
            })
            .collect()
    }

    pub fn override_for(&self, lane: LaneId) -> Option<SlotStatus> {
        self.lock().override_for(lane)
    }

    /// Apply an operator override. Nothing changes when the lane or the value
    /// is rejected.
    pub fn set_override(&self, lane: LaneId, value: &str) -> Result<SlotStatus, OverrideError> {
        let status =
            SlotStatus::parse(value).ok_or_else(|| OverrideError::InvalidValue(value.to_string()))?;
        let mut guard = self.lock();
        let entry = guard
            .inner
            .lane_mut(lane)
            .ok_or(OverrideError::UnknownLane(lane))?;
        entry.manual = Some(status);
        Ok(status)
    }

    /// Return a lane to classifier control.
    pub fn clear_override(&self, lane: LaneId) -> Result<(), OverrideError> {
        let mut guard = self.lock();
        let entry = guard
            .inner
            .lane_mut(lane)
            .ok_or(OverrideError::UnknownLane(lane))?;
        entry.manual = None;
        Ok(())
    }
}

/// Held boundary. Dropping it releases the lock.
pub struct StateGuard<'a> {
    inner: MutexGuard<'a, StateInner>,
}

impl StateGuard<'_> {
    pub fn override_for(&self, lane: LaneId) -> Option<SlotStatus> {
        self.inner.lane(lane).and_then(|e| e.manual)
    }

    pub fn frame(&self, lane: LaneId) -> Option<Arc<Frame>> {
        self.inner.lane(lane).and_then(|e| e.frame.clone())
    }

    /// Replace a lane's count and frame with a fresh scan.
    pub fn publish_lane(&mut self, result: &LaneResult) {
        if let Some(entry) = self.inner.lane_mut(result.lane) {
            entry.count.occupied = Some(result.occupied.min(entry.count.total));
            entry.frame = Some(Arc::new(result.frame.clone()));
        }
    }

    /// Re-derive the aggregate status from the current lane counts.
    pub fn recompute(&mut self) -> AggregateStatus {
        let aggregate = AggregateStatus::from_counts(&self.inner.counts());
        self.inner.aggregate = aggregate.clone();
        aggregate
    }

    pub fn counts(&self) -> Vec<LaneCount> {
        self.inner.counts()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            aggregate: self.inner.aggregate.clone(),
            overrides: self
                .inner
                .lanes
                .iter()
                .map(|e| (e.count.lane, e.manual))
                .collect(),
        }
    }
}
