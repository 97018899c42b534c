//! Frame container and overlay drawing.
//!
//! - `Frame`: owned RGB frame as produced by a camera source.
//! - Cropping follows slice semantics: a rectangle that runs past the frame
//!   edge is truncated, and one that starts outside the frame is empty.
//! - Annotation draws slot outlines in place; callers annotate a copy so the
//!   classifier always sees unannotated pixels.

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ImageBuffer, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;

use crate::{SlotRect, SlotStatus};

pub const JPEG_QUALITY: u8 = 90;

/// Outline thickness in pixels for slot annotations.
pub const OVERLAY_THICKNESS: u32 = 2;

pub const FREE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const OCCUPIED_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Owned RGB frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    /// Build a frame from packed RGB24 bytes.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = ImageBuffer::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", width, height))?;
        Ok(Self { image })
    }

    /// Uniform frame, mostly for synthetic sources and tests.
    pub fn filled(width: u32, height: u32, color: Rgb<u8>) -> Self {
        Self {
            image: ImageBuffer::from_pixel(width, height, color),
        }
    }

    /// Decode a JPEG/PNG image held in memory.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode frame image")?;
        Ok(Self {
            image: image.into_rgb8(),
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Copy out the pixels under `rect`. Returns `None` when the visible part
    /// of the rectangle is empty.
    pub fn crop(&self, rect: SlotRect) -> Option<RgbImage> {
        let (w, h) = self.image.dimensions();
        if rect.x >= w || rect.y >= h {
            return None;
        }
        let cw = rect.width.min(w - rect.x);
        let ch = rect.height.min(h - rect.y);
        if cw == 0 || ch == 0 {
            return None;
        }
        Some(imageops::crop_imm(&self.image, rect.x, rect.y, cw, ch).to_image())
    }

    /// Draw the outline of `rect` (corners inclusive) clipped to the frame.
    pub fn draw_outline(&mut self, rect: SlotRect, color: Rgb<u8>) {
        let (w, h) = self.image.dimensions();
        let x0 = rect.x as i64;
        let y0 = rect.y as i64;
        let x1 = rect.right() as i64;
        let y1 = rect.bottom() as i64;
        for t in 0..OVERLAY_THICKNESS as i64 {
            let (l, r, top, bot) = (x0 + t, x1 - t, y0 + t, y1 - t);
            if l > r || top > bot {
                break;
            }
            for x in l..=r {
                put_clipped(&mut self.image, x, top, w, h, color);
                put_clipped(&mut self.image, x, bot, w, h, color);
            }
            for y in top..=bot {
                put_clipped(&mut self.image, l, y, w, h, color);
                put_clipped(&mut self.image, r, y, w, h, color);
            }
        }
    }

    /// Green outline for free slots, red for occupied.
    pub fn annotate_slot(&mut self, rect: SlotRect, status: SlotStatus) {
        let color = match status {
            SlotStatus::Occupied => OCCUPIED_COLOR,
            SlotStatus::Free => FREE_COLOR,
        };
        self.draw_outline(rect, color);
    }

    pub fn encode_jpeg(&self) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
        self.image
            .write_with_encoder(encoder)
            .context("encode frame as jpeg")?;
        Ok(buf.into_inner())
    }

    /// JPEG bytes as standard base64, the form the status API serves.
    pub fn encode_base64_jpeg(&self) -> Result<String> {
        let jpeg = self.encode_jpeg()?;
        Ok(base64::engine::general_purpose::STANDARD.encode(jpeg))
    }

    pub fn write_jpeg(&self, path: &Path) -> Result<()> {
        let jpeg = self.encode_jpeg()?;
        std::fs::write(path, jpeg).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

fn put_clipped(image: &mut RgbImage, x: i64, y: i64, w: u32, h: u32, color: Rgb<u8>) {
    if x < 0 || y < 0 || x >= w as i64 || y >= h as i64 {
        return;
    }
    image.put_pixel(x as u32, y as u32, color);
}
