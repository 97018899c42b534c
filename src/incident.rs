//! Incident Capturer.
//!
//! A capture writes the annotated lane frame to the local incident directory
//! as `{camera_id}_{YYYYmmdd_HHMMSS}.jpg`, uploads the same bytes to the sink's
//! object store, then inserts an index row pointing at the returned URL.
//! Failures at any step end up in the returned `CaptureOutcome`; nothing here
//! returns an error to the caller.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::frame::Frame;
use crate::sink::{IncidentRecord, PersistenceSink};

/// Result of one capture, reported back to the API and the logs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CaptureOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl CaptureOutcome {
    fn failed(message: String, local_path: Option<PathBuf>) -> Self {
        Self {
            success: false,
            message,
            local_path,
            image_url: None,
        }
    }
}

pub fn incident_file_name(camera_id: &str, at: &DateTime<Local>) -> String {
    format!("{}_{}.jpg", camera_id, at.format("%Y%m%d_%H%M%S"))
}

pub struct IncidentCapturer {
    dir: PathBuf,
    sink: Option<Arc<dyn PersistenceSink>>,
}

impl IncidentCapturer {
    pub fn new(dir: impl Into<PathBuf>, sink: Option<Arc<dyn PersistenceSink>>) -> Self {
        Self {
            dir: dir.into(),
            sink,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn capture(&self, camera_id: &str, frame: Option<&Frame>) -> CaptureOutcome {
        let Some(frame) = frame else {
            log::warn!("incident capture for {} skipped: no frame yet", camera_id);
            return CaptureOutcome::failed(format!("No frame for {}", camera_id), None);
        };

        let at = Local::now();
        let file_name = incident_file_name(camera_id, &at);
        let (local_path, jpeg) = match self.write_local(&file_name, frame) {
            Ok(written) => written,
            Err(err) => {
                log::error!("incident capture for {} failed: {:#}", camera_id, err);
                return CaptureOutcome::failed(format!("{:#}", err), None);
            }
        };

        let Some(sink) = self.sink.as_deref() else {
            log::warn!(
                "incident image {} kept locally: no persistence sink",
                local_path.display()
            );
            return CaptureOutcome::failed(
                format!("{} image kept locally; no persistence sink", camera_id),
                Some(local_path),
            );
        };

        match publish(sink, camera_id, &file_name, &jpeg, &at) {
            Ok(url) => {
                log::info!("incident image for {} uploaded: {}", camera_id, url);
                CaptureOutcome {
                    success: true,
                    message: format!("{} image uploaded.", camera_id),
                    local_path: Some(local_path),
                    image_url: Some(url),
                }
            }
            Err(err) => {
                log::error!("image upload error for {}: {:#}", camera_id, err);
                CaptureOutcome::failed(format!("{:#}", err), Some(local_path))
            }
        }
    }

    fn write_local(&self, file_name: &str, frame: &Frame) -> Result<(PathBuf, Vec<u8>)> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create incident dir {}", self.dir.display()))?;
        let jpeg = frame.encode_jpeg()?;
        let path = self.dir.join(file_name);
        std::fs::write(&path, &jpeg).with_context(|| format!("write {}", path.display()))?;
        Ok((path, jpeg))
    }
}

fn publish(
    sink: &dyn PersistenceSink,
    camera_id: &str,
    file_name: &str,
    jpeg: &[u8],
    at: &DateTime<Local>,
) -> Result<String> {
    let url = sink.upload_image(file_name, jpeg)?;
    sink.insert_incident(&IncidentRecord {
        image_url: url.clone(),
        timestamp: at.to_rfc3339(),
        camera_id: camera_id.to_string(),
    })
    .context("insert incident index row")?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use chrono::TimeZone;
    use image::Rgb;

    #[test]
    fn file_name_is_camera_and_second() {
        let at = Local
            .with_ymd_and_hms(2024, 5, 1, 9, 5, 7)
            .single()
            .expect("unambiguous local time");
        assert_eq!(incident_file_name("camA", &at), "camA_20240501_090507.jpg");
    }

    #[test]
    fn capture_writes_uploads_and_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let capturer = IncidentCapturer::new(dir.path(), Some(sink.clone()));
        let frame = Frame::filled(16, 16, Rgb([9, 9, 9]));

        let outcome = capturer.capture("camB", Some(&frame));
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.message, "camB image uploaded.");
        let path = outcome.local_path.expect("local path");
        assert!(path.exists());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("camB_"));

        let incidents = sink.incidents();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].camera_id, "camB");
        assert_eq!(Some(incidents[0].image_url.clone()), outcome.image_url);
        assert_eq!(sink.image_names().len(), 1);
    }

    #[test]
    fn upload_failure_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        sink.fail_uploads(true);
        let capturer = IncidentCapturer::new(dir.path(), Some(sink.clone()));
        let outcome = capturer.capture("camA", Some(&Frame::filled(8, 8, Rgb([0, 0, 0]))));
        assert!(!outcome.success);
        assert!(outcome.local_path.is_some());
        assert!(sink.incidents().is_empty());
    }

    #[test]
    fn missing_sink_keeps_image_locally() {
        let dir = tempfile::tempdir().unwrap();
        let capturer = IncidentCapturer::new(dir.path().join("nested"), None);
        let outcome = capturer.capture("camA", Some(&Frame::filled(8, 8, Rgb([0, 0, 0]))));
        assert!(!outcome.success);
        assert!(outcome.message.contains("kept locally"));
        assert!(outcome.local_path.unwrap().exists());
    }

    #[test]
    fn missing_frame_is_a_failure() {
        let capturer = IncidentCapturer::new("unused", None);
        let outcome = capturer.capture("camA", None);
        assert!(!outcome.success);
        assert_eq!(outcome.message, "No frame for camA");
    }
}
