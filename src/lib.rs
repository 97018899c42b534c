//! Parking Sentinel
//!
//! This crate implements a parking-slot occupancy monitor for camera-observed lanes.
//!
//! # Architecture
//!
//! One long-running monitoring loop owns all mutable state. Each cycle it:
//!
//! 1. Reads one frame per lane and classifies every configured slot.
//! 2. Publishes lane counts, annotated frames and the aggregate status under a
//!    single lock shared with the status API.
//! 3. Diffs slot statuses against the last known values and captures an
//!    incident image for every transition.
//! 4. Signals full/empty facts to the lane controller over a serial link.
//! 5. Persists lane overview and slot status rows to the configured sink.
//!
//! # Module Structure
//!
//! - `config`: file + environment configuration and slot-map validation
//! - `frame`: owned RGB frames, cropping, overlay drawing, JPEG encoding
//! - `detect`: occupancy classification backends
//! - `ingest`: camera frame sources (stub, still file, HTTP snapshot/MJPEG)
//! - `lane`: per-lane scan producing slot readings
//! - `tracker`: slot transition detection
//! - `signal`: controller wire messages and serial link
//! - `incident`: local + remote incident image capture
//! - `sink`: persistence sinks (Supabase REST, SQLite, in-memory)
//! - `state`: the shared status boundary
//! - `monitor`: the monitoring loop state machine
//! - `api`: HTTP status/override interface

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod api;
pub mod config;
pub mod detect;
pub mod frame;
pub mod incident;
pub mod ingest;
pub mod lane;
pub mod monitor;
pub mod signal;
pub mod sink;
pub mod state;
pub mod tracker;

pub use detect::{AdaptiveThresholdBackend, OccupancyBackend, DEFAULT_OCCUPANCY_THRESHOLD};
pub use frame::Frame;
pub use incident::{CaptureOutcome, IncidentCapturer};
pub use ingest::{open_source, FrameSource};
pub use lane::{scan_lane, LaneLayout, LaneResult, SlotReading};
pub use monitor::{CycleFailure, CycleReport, Monitor, MonitorParts, MonitorState, StartError};
pub use signal::{encode_messages, HardwareSignaler, SignalLink};
pub use sink::{IncidentRecord, MemorySink, OverviewRecord, PersistenceSink, SqliteSink};
pub use state::{AggregateStatus, LaneCount, OverrideError, SharedState, StatusSnapshot};
pub use tracker::{StateTracker, TransitionEvent};

/// Globally unique slot identifier (1-based, continuous across lanes).
pub type SlotId = u32;

/// Lane identifier (1-based position in the configured lane list).
pub type LaneId = u8;

// -------------------- Slot Status --------------------

/// Binary occupancy of a slot.
///
/// Serialized with the controller wire codes: `F` (full) and `E` (empty).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotStatus {
    #[serde(rename = "F")]
    Occupied,
    #[serde(rename = "E")]
    Free,
}

impl SlotStatus {
    pub fn from_occupied(occupied: bool) -> Self {
        if occupied {
            SlotStatus::Occupied
        } else {
            SlotStatus::Free
        }
    }

    pub fn is_occupied(self) -> bool {
        matches!(self, SlotStatus::Occupied)
    }

    /// Single-letter wire code.
    pub fn code(self) -> &'static str {
        match self {
            SlotStatus::Occupied => "F",
            SlotStatus::Free => "E",
        }
    }

    /// Parse an operator-supplied value. Accepts the wire codes and the
    /// spelled-out names, case-insensitive.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "f" | "full" | "occupied" => Some(SlotStatus::Occupied),
            "e" | "empty" | "free" => Some(SlotStatus::Free),
            _ => None,
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// -------------------- Slot Geometry --------------------

/// Axis-aligned slot rectangle in frame pixel coordinates.
///
/// Configured as `[x, y, width, height]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct SlotRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl SlotRect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn fits_within(&self, frame_width: u32, frame_height: u32) -> bool {
        self.right() <= frame_width as u64 && self.bottom() <= frame_height as u64
    }

    pub fn overlaps(&self, other: &SlotRect) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        (self.x as u64) < other.right()
            && (other.x as u64) < self.right()
            && (self.y as u64) < other.bottom()
            && (other.y as u64) < self.bottom()
    }
}

impl From<[u32; 4]> for SlotRect {
    fn from(v: [u32; 4]) -> Self {
        SlotRect::new(v[0], v[1], v[2], v[3])
    }
}

impl From<SlotRect> for [u32; 4] {
    fn from(r: SlotRect) -> Self {
        [r.x, r.y, r.width, r.height]
    }
}
