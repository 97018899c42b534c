//! Local SQLite sink, for sites without the remote store.
//!
//! Same three tables as the remote schema plus an `incident_images` table
//! that holds the JPEG objects themselves.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{IncidentRecord, OverviewRecord, PersistenceSink};
use crate::lane::SlotReading;
use crate::{SlotId, SlotStatus};

pub struct SqliteSink {
    conn: Mutex<Connection>,
}

impl SqliteSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let sink = Self {
            conn: Mutex::new(conn),
        };
        sink.ensure_schema()?;
        Ok(sink)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS parking_overview (
              camera_id TEXT PRIMARY KEY,
              total_slots INTEGER NOT NULL,
              occupied INTEGER NOT NULL,
              available INTEGER NOT NULL,
              status TEXT NOT NULL,
              location_id INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS parking_slots_status (
              slot_id INTEGER PRIMARY KEY,
              status TEXT NOT NULL,
              lane INTEGER NOT NULL,
              camera_id TEXT NOT NULL,
              location_id INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS parking_lot (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              image TEXT NOT NULL,
              date TEXT NOT NULL,
              camera_id TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS incident_images (
              name TEXT PRIMARY KEY,
              jpeg BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_parking_lot_camera ON parking_lot(camera_id);
            "#,
        )?;
        Ok(())
    }

    pub fn overview(&self, camera_id: &str) -> Result<Option<OverviewRecord>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT total_slots, occupied, available, status, location_id
                 FROM parking_overview WHERE camera_id = ?1",
                params![camera_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((total, occupied, available, status, location_id)) = row else {
            return Ok(None);
        };
        Ok(Some(OverviewRecord {
            camera_id: camera_id.to_string(),
            total_slots: total as usize,
            occupied: occupied as usize,
            available: available as usize,
            status: parse_status(&status)?,
            location_id,
        }))
    }

    pub fn slot_status(&self, slot_id: SlotId) -> Result<Option<SlotStatus>> {
        let status: Option<String> = self
            .conn()
            .query_row(
                "SELECT status FROM parking_slots_status WHERE slot_id = ?1",
                params![slot_id],
                |row| row.get(0),
            )
            .optional()?;
        status.map(|s| parse_status(&s)).transpose()
    }

    pub fn incident_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM parking_lot", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn image(&self, file_name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT jpeg FROM incident_images WHERE name = ?1",
                params![file_name],
                |row| row.get(0),
            )
            .optional()?)
    }
}

impl PersistenceSink for SqliteSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn upsert_overview(&self, rows: &[OverviewRecord]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for row in rows {
            tx.execute(
                r#"
                INSERT INTO parking_overview(camera_id, total_slots, occupied, available, status, location_id)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(camera_id) DO UPDATE SET
                  total_slots = excluded.total_slots,
                  occupied = excluded.occupied,
                  available = excluded.available,
                  status = excluded.status,
                  location_id = excluded.location_id
                "#,
                params![
                    row.camera_id,
                    row.total_slots as i64,
                    row.occupied as i64,
                    row.available as i64,
                    row.status.code(),
                    row.location_id
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert_slot_statuses(&self, rows: &[SlotReading]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for row in rows {
            tx.execute(
                r#"
                INSERT INTO parking_slots_status(slot_id, status, lane, camera_id, location_id)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(slot_id) DO UPDATE SET
                  status = excluded.status,
                  lane = excluded.lane,
                  camera_id = excluded.camera_id,
                  location_id = excluded.location_id
                "#,
                params![
                    row.slot_id,
                    row.status.code(),
                    row.lane,
                    row.camera_id,
                    row.location_id
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn upload_image(&self, file_name: &str, jpeg: &[u8]) -> Result<String> {
        self.conn().execute(
            "INSERT OR REPLACE INTO incident_images(name, jpeg) VALUES (?1, ?2)",
            params![file_name, jpeg],
        )?;
        Ok(format!("sqlite://incident_images/{}", file_name))
    }

    fn insert_incident(&self, record: &IncidentRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO parking_lot(image, date, camera_id) VALUES (?1, ?2, ?3)",
            params![record.image_url, record.timestamp, record.camera_id],
        )?;
        Ok(())
    }
}

fn parse_status(code: &str) -> Result<SlotStatus> {
    SlotStatus::parse(code).ok_or_else(|| anyhow!("corrupt status column: {:?}", code))
}
