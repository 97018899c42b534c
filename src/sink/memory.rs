//! In-process sink. Keeps everything in maps; used by tests and dry runs.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{IncidentRecord, OverviewRecord, PersistenceSink};
use crate::lane::SlotReading;
use crate::{SlotId, SlotStatus};

#[derive(Default)]
struct MemoryInner {
    overviews: BTreeMap<String, OverviewRecord>,
    slots: BTreeMap<SlotId, SlotReading>,
    images: BTreeMap<String, Vec<u8>>,
    incidents: Vec<IncidentRecord>,
    overview_writes: usize,
    slot_writes: usize,
    fail_uploads: bool,
    fail_slot_writes: bool,
}

#[derive(Default)]
pub struct MemorySink {
    inner: Mutex<MemoryInner>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent upload fail.
    pub fn fail_uploads(&self, fail: bool) {
        self.inner().fail_uploads = fail;
    }

    /// Make every subsequent slot-status upsert fail.
    pub fn fail_slot_writes(&self, fail: bool) {
        self.inner().fail_slot_writes = fail;
    }

    pub fn overview(&self, camera_id: &str) -> Option<OverviewRecord> {
        self.inner().overviews.get(camera_id).cloned()
    }

    pub fn slot_status(&self, slot_id: SlotId) -> Option<SlotStatus> {
        self.inner().slots.get(&slot_id).map(|r| r.status)
    }

    pub fn slot_rows(&self) -> usize {
        self.inner().slots.len()
    }

    pub fn image_names(&self) -> Vec<String> {
        self.inner().images.keys().cloned().collect()
    }

    pub fn incidents(&self) -> Vec<IncidentRecord> {
        self.inner().incidents.clone()
    }

    pub fn overview_writes(&self) -> usize {
        self.inner().overview_writes
    }

    pub fn slot_writes(&self) -> usize {
        self.inner().slot_writes
    }
}

impl PersistenceSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn upsert_overview(&self, rows: &[OverviewRecord]) -> Result<()> {
        let mut inner = self.inner();
        inner.overview_writes += 1;
        for row in rows {
            inner.overviews.insert(row.camera_id.clone(), row.clone());
        }
        Ok(())
    }

    fn upsert_slot_statuses(&self, rows: &[SlotReading]) -> Result<()> {
        let mut inner = self.inner();
        if inner.fail_slot_writes {
            return Err(anyhow!("slot status upsert rejected"));
        }
        inner.slot_writes += 1;
        for row in rows {
            inner.slots.insert(row.slot_id, row.clone());
        }
        Ok(())
    }

    fn upload_image(&self, file_name: &str, jpeg: &[u8]) -> Result<String> {
        let mut inner = self.inner();
        if inner.fail_uploads {
            return Err(anyhow!("upload of {} rejected", file_name));
        }
        inner.images.insert(file_name.to_string(), jpeg.to_vec());
        Ok(format!("memory://{}", file_name))
    }

    fn insert_incident(&self, record: &IncidentRecord) -> Result<()> {
        self.inner().incidents.push(record.clone());
        Ok(())
    }
}
