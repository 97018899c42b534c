//! Persistence sinks.
//!
//! The monitor writes three kinds of rows and one kind of object:
//! - lane overview rows, upserted on `camera_id` every cycle
//! - slot status rows, upserted on `slot_id` every cycle
//! - incident index rows, inserted per capture
//! - incident JPEG objects, uploaded per capture
//!
//! Sinks are shared between the monitor thread and the API thread, so
//! implementations are `Send + Sync` and take `&self`.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use crate::config::SinkSettings;
use crate::lane::{LaneLayout, SlotReading};
use crate::state::LaneCount;
use crate::SlotStatus;

mod memory;
mod sqlite;
mod supabase;

pub use memory::MemorySink;
pub use sqlite::SqliteSink;
pub use supabase::SupabaseSink;

/// Per-lane occupancy snapshot, keyed by camera id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OverviewRecord {
    pub camera_id: String,
    pub total_slots: usize,
    pub occupied: usize,
    pub available: usize,
    /// `F` when every slot of the lane is occupied.
    pub status: SlotStatus,
    pub location_id: i64,
}

impl OverviewRecord {
    /// `None` for a lane that has not produced a frame yet.
    pub fn from_count(count: &LaneCount, layout: &LaneLayout) -> Option<Self> {
        let occupied = count.occupied?;
        Some(Self {
            camera_id: layout.camera_id.clone(),
            total_slots: count.total,
            occupied,
            available: count.available(),
            status: SlotStatus::from_occupied(count.is_full()),
            location_id: layout.location_id,
        })
    }
}

/// Incident index row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IncidentRecord {
    #[serde(rename = "image")]
    pub image_url: String,
    /// RFC 3339 local time.
    #[serde(rename = "date")]
    pub timestamp: String,
    pub camera_id: String,
}

pub trait PersistenceSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn upsert_overview(&self, rows: &[OverviewRecord]) -> Result<()>;

    fn upsert_slot_statuses(&self, rows: &[SlotReading]) -> Result<()>;

    /// Store a JPEG under `file_name` and return the URL it can be read from.
    fn upload_image(&self, file_name: &str, jpeg: &[u8]) -> Result<String>;

    fn insert_incident(&self, record: &IncidentRecord) -> Result<()>;
}

/// Build the configured sink. A sink that fails to initialise is logged and
/// treated as absent for the rest of the process.
pub fn open_sink(settings: &SinkSettings) -> Option<Arc<dyn PersistenceSink>> {
    let opened: Result<Arc<dyn PersistenceSink>> = match settings {
        SinkSettings::Disabled => {
            log::warn!("no persistence sink configured; rows and incidents stay local");
            return None;
        }
        SinkSettings::Supabase { url, key, bucket } => {
            SupabaseSink::new(url, key, bucket).map(|s| Arc::new(s) as Arc<dyn PersistenceSink>)
        }
        SinkSettings::Sqlite { path } => {
            SqliteSink::open(path).map(|s| Arc::new(s) as Arc<dyn PersistenceSink>)
        }
    };
    match opened {
        Ok(sink) => {
            log::info!("persistence sink ready: {}", sink.name());
            Some(sink)
        }
        Err(err) => {
            log::error!("persistence sink init failed: {:#}", err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SlotRect;

    #[test]
    fn overview_row_marks_full_lanes() {
        let layout = LaneLayout {
            lane: 1,
            camera_id: "camA".into(),
            location_id: 8,
            slots: vec![SlotRect::new(0, 0, 10, 10); 2],
            slot_offset: 0,
        };
        let mut count = LaneCount {
            lane: 1,
            camera_id: "camA".into(),
            total: 2,
            occupied: None,
        };
        assert!(OverviewRecord::from_count(&count, &layout).is_none());

        count.occupied = Some(2);
        let row = OverviewRecord::from_count(&count, &layout).unwrap();
        assert_eq!(row.status, SlotStatus::Occupied);
        assert_eq!(row.available, 0);

        count.occupied = Some(1);
        let json = serde_json::to_value(OverviewRecord::from_count(&count, &layout).unwrap()).unwrap();
        assert_eq!(json["status"], "E");
        assert_eq!(json["location_id"], 8);
    }

    #[test]
    fn incident_record_uses_index_column_names() {
        let record = IncidentRecord {
            image_url: "https://example/x.jpg".into(),
            timestamp: "2024-05-01T10:00:00+07:00".into(),
            camera_id: "camB".into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["image"], "https://example/x.jpg");
        assert_eq!(json["date"], "2024-05-01T10:00:00+07:00");
        assert_eq!(json["camera_id"], "camB");
    }
}
