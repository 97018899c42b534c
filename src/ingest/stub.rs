//! Synthetic source (`stub://name`).
//!
//! Produces a flat grey frame of the configured size every read. Flat frames
//! have no texture, so every slot classifies as free.

use anyhow::Result;
use image::Rgb;

use super::FrameSource;
use crate::frame::Frame;

const STUB_GREY: Rgb<u8> = Rgb([128, 128, 128]);

pub struct StubSource {
    name: String,
    width: u32,
    height: u32,
    frames_read: u64,
}

impl StubSource {
    pub fn new(name: &str, width: u32, height: u32) -> Self {
        log::info!("StubSource: {} ({}x{}, synthetic)", name, width, height);
        Self {
            name: name.to_string(),
            width,
            height,
            frames_read: 0,
        }
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

impl FrameSource for StubSource {
    fn describe(&self) -> String {
        format!("stub://{}", self.name)
    }

    fn read_frame(&mut self) -> Result<Frame> {
        self.frames_read += 1;
        Ok(Frame::filled(self.width, self.height, STUB_GREY))
    }

    fn is_opened(&self) -> bool {
        true
    }
}
