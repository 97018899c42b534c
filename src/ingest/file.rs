//! Local still-image source.
//!
//! Re-reads the image file on every cycle, so an external process can keep
//! overwriting it (a `fswebcam` cron job, a test harness). The file must exist
//! when the source is opened; later read failures are per-cycle.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::FrameSource;
use crate::frame::Frame;

pub struct StillImageSource {
    path: PathBuf,
}

impl StillImageSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(anyhow!("still image {} does not exist", path.display()));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for StillImageSource {
    fn describe(&self) -> String {
        format!("file://{}", self.path.display())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let bytes =
            std::fs::read(&self.path).with_context(|| format!("read {}", self.path.display()))?;
        Frame::decode(&bytes)
    }

    fn is_opened(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn rereads_file_each_cycle() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("lane.jpg");
        Frame::filled(32, 16, Rgb([10, 10, 10])).write_jpeg(&path)?;

        let mut source = StillImageSource::open(&path)?;
        assert_eq!(source.read_frame()?.dimensions(), (32, 16));

        Frame::filled(8, 8, Rgb([10, 10, 10])).write_jpeg(&path)?;
        assert_eq!(source.read_frame()?.dimensions(), (8, 8));

        std::fs::remove_file(&path)?;
        assert!(source.read_frame().is_err());
        assert!(source.is_opened());
        Ok(())
    }
}
