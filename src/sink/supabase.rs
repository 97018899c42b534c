//! Supabase REST + storage sink.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use url::Url;

use super::{IncidentRecord, OverviewRecord, PersistenceSink};
use crate::lane::SlotReading;

pub const OVERVIEW_TABLE: &str = "parking_overview";
pub const SLOT_STATUS_TABLE: &str = "parking_slots_status";
pub const INCIDENT_TABLE: &str = "parking_lot";
pub const OBJECT_PREFIX: &str = "public";

pub struct SupabaseSink {
    base: String,
    key: String,
    bucket: String,
    agent: ureq::Agent,
}

impl SupabaseSink {
    pub fn new(url: &str, key: &str, bucket: &str) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|| format!("parse supabase url {}", url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!("supabase url must be http(s): {}", url));
        }
        if key.trim().is_empty() {
            return Err(anyhow!("supabase key is empty"));
        }
        if bucket.trim().is_empty() {
            return Err(anyhow!("supabase bucket is empty"));
        }
        Ok(Self {
            base: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            bucket: bucket.to_string(),
            agent: ureq::AgentBuilder::new().build(),
        })
    }

    /// Public URL of an object uploaded as `file_name`.
    pub fn public_url(&self, file_name: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}/{}",
            self.base, self.bucket, OBJECT_PREFIX, file_name
        )
    }

    fn post_rows<T: Serialize + ?Sized>(
        &self,
        table_and_query: &str,
        prefer: &str,
        rows: &T,
    ) -> Result<()> {
        let url = format!("{}/rest/v1/{}", self.base, table_and_query);
        self.agent
            .post(&url)
            .set("apikey", &self.key)
            .set("Authorization", &format!("Bearer {}", self.key))
            .set("Prefer", prefer)
            .send_json(rows)
            .map_err(request_error)
            .with_context(|| format!("POST {}", url))?;
        Ok(())
    }
}

impl PersistenceSink for SupabaseSink {
    fn name(&self) -> &'static str {
        "supabase"
    }

    fn upsert_overview(&self, rows: &[OverviewRecord]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.post_rows(
            &format!("{}?on_conflict=camera_id", OVERVIEW_TABLE),
            "resolution=merge-duplicates,return=minimal",
            rows,
        )
    }

    fn upsert_slot_statuses(&self, rows: &[SlotReading]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.post_rows(
            &format!("{}?on_conflict=slot_id", SLOT_STATUS_TABLE),
            "resolution=merge-duplicates,return=minimal",
            rows,
        )
    }

    fn upload_image(&self, file_name: &str, jpeg: &[u8]) -> Result<String> {
        let url = format!(
            "{}/storage/v1/object/{}/{}/{}",
            self.base, self.bucket, OBJECT_PREFIX, file_name
        );
        self.agent
            .post(&url)
            .set("apikey", &self.key)
            .set("Authorization", &format!("Bearer {}", self.key))
            .set("Content-Type", "image/jpeg")
            .set("x-upsert", "true")
            .send_bytes(jpeg)
            .map_err(request_error)
            .with_context(|| format!("upload {}", file_name))?;
        Ok(self.public_url(file_name))
    }

    fn insert_incident(&self, record: &IncidentRecord) -> Result<()> {
        self.post_rows(INCIDENT_TABLE, "return=minimal", std::slice::from_ref(record))
    }
}

fn request_error(err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            anyhow!("HTTP {}: {}", code, body.trim())
        }
        other => anyhow!(other),
    }
}
