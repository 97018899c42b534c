//! Lane Scanner.
//!
//! One read per lane per cycle: grab a frame, classify every configured slot,
//! annotate a copy of the frame, and report the readings. A failed read is
//! "no data this cycle" and never an error for the caller.

use serde::Serialize;

use crate::detect::OccupancyBackend;
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::{LaneId, SlotId, SlotRect, SlotStatus};

/// One slot's verdict for one cycle, in the shape the sink persists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SlotReading {
    pub slot_id: SlotId,
    pub status: SlotStatus,
    pub lane: LaneId,
    pub camera_id: String,
    pub location_id: i64,
}

/// Static description of one lane, built once from configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaneLayout {
    pub lane: LaneId,
    pub camera_id: String,
    pub location_id: i64,
    pub slots: Vec<SlotRect>,
    /// Number of slots in all preceding lanes; slot ids start at `offset + 1`.
    pub slot_offset: u32,
}

impl LaneLayout {
    pub fn total_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_id(&self, index: usize) -> SlotId {
        self.slot_offset + index as u32 + 1
    }

    pub fn slot_ids(&self) -> impl Iterator<Item = SlotId> + '_ {
        (0..self.slots.len()).map(|i| self.slot_id(i))
    }
}

/// Output of a successful lane scan.
#[derive(Clone, Debug)]
pub struct LaneResult {
    pub lane: LaneId,
    pub occupied: usize,
    /// One reading per configured slot, in configuration order.
    pub readings: Vec<SlotReading>,
    /// Annotated copy of the frame.
    pub frame: Frame,
}

impl LaneResult {
    pub fn total(&self) -> usize {
        self.readings.len()
    }

    pub fn available(&self) -> usize {
        self.total() - self.occupied
    }
}

/// Read one frame from `source` and classify it. Returns `None` when the read
/// fails.
pub fn scan_lane(
    source: &mut dyn FrameSource,
    layout: &LaneLayout,
    manual_override: Option<SlotStatus>,
    classifier: &mut dyn OccupancyBackend,
) -> Option<LaneResult> {
    match source.read_frame() {
        Ok(frame) => Some(classify_frame(&frame, layout, manual_override, classifier)),
        Err(err) => {
            log::warn!(
                "lane {} ({}): frame read from {} failed: {:#}",
                layout.lane,
                layout.camera_id,
                source.describe(),
                err
            );
            None
        }
    }
}

/// Classify every slot of `layout` in `frame`.
///
/// An `Occupied` override skips the classifier for the whole lane; `Free` or
/// no override leaves the classifier in charge.
pub fn classify_frame(
    frame: &Frame,
    layout: &LaneLayout,
    manual_override: Option<SlotStatus>,
    classifier: &mut dyn OccupancyBackend,
) -> LaneResult {
    let forced = manual_override == Some(SlotStatus::Occupied);
    let mut annotated = frame.clone();
    let mut readings = Vec::with_capacity(layout.slots.len());
    let mut occupied = 0;

    for (index, rect) in layout.slots.iter().enumerate() {
        let status = if forced {
            SlotStatus::Occupied
        } else {
            match frame.crop(*rect) {
                Some(region) => classifier.classify(&region),
                None => SlotStatus::Free,
            }
        };
        if status.is_occupied() {
            occupied += 1;
        }
        annotated.annotate_slot(*rect, status);
        readings.push(SlotReading {
            slot_id: layout.slot_id(index),
            status,
            lane: layout.lane,
            camera_id: layout.camera_id.clone(),
            location_id: layout.location_id,
        });
    }

    LaneResult {
        lane: layout.lane,
        occupied,
        readings,
        frame: annotated,
    }
}
