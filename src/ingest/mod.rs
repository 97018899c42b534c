//! Camera frame sources.
//!
//! One source per lane, chosen by URL:
//! - `stub://name`: synthetic uniform frame (tests, dry runs)
//! - a local path or `file://` URL: a still image re-read every cycle
//! - `http(s)://`: ESP32-style MJPEG stream or single-JPEG snapshot endpoint
//!
//! Sources are blocking and carry no timeout of their own beyond what the
//! transport imposes; a hung read stalls the cycle that issued it.

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::frame::Frame;

pub mod file;
pub mod http;
pub mod stub;

pub use file::StillImageSource;
pub use http::HttpCameraSource;
pub use stub::StubSource;

/// A live camera handle.
pub trait FrameSource: Send {
    /// Human-readable origin, for logs.
    fn describe(&self) -> String;

    /// Read the next frame. Errors are per-read; the source stays usable.
    fn read_frame(&mut self) -> Result<Frame>;

    /// False once the source is known to be permanently unusable.
    fn is_opened(&self) -> bool;
}

/// Open the source named by `url`. `width`/`height` size synthetic frames.
pub fn open_source(url: &str, width: u32, height: u32) -> Result<Box<dyn FrameSource>> {
    let url = url.trim();
    if url.is_empty() {
        return Err(anyhow!("camera source is empty"));
    }
    if let Some(name) = url.strip_prefix("stub://") {
        return Ok(Box::new(StubSource::new(name, width, height)));
    }
    if !url.contains("://") {
        return Ok(Box::new(StillImageSource::open(url)?));
    }
    let parsed = Url::parse(url).with_context(|| format!("parse camera url {}", url))?;
    match parsed.scheme() {
        "file" => {
            let path = parsed
                .to_file_path()
                .map_err(|_| anyhow!("file url has no local path: {}", url))?;
            Ok(Box::new(StillImageSource::open(path)?))
        }
        "http" | "https" => Ok(Box::new(HttpCameraSource::connect(url)?)),
        other => Err(anyhow!(
            "unsupported camera scheme '{}'; expected stub, file or http(s)",
            other
        )),
    }
}
