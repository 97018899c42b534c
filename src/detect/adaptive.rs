use image::RgbImage;

use super::backend::OccupancyBackend;
use super::filters::{self, Border};
use crate::SlotStatus;

/// Foreground pixel count above which a slot reads as occupied.
pub const DEFAULT_OCCUPANCY_THRESHOLD: usize = 300;

/// Neighbourhood size for the local mean.
pub const ADAPTIVE_BLOCK_SIZE: usize = 11;

/// How far below its local mean a pixel must sit to count as foreground.
pub const ADAPTIVE_OFFSET: i32 = 2;

const PRE_BLUR_SIZE: usize = 5;

/// Texture-count classifier: grayscale, 5x5 Gaussian blur, inverted adaptive
/// threshold, then compare the foreground count to `threshold`.
///
/// A vehicle brings edges and shading into an otherwise flat patch of
/// tarmac, which shows up as foreground after the local-mean threshold.
#[derive(Clone, Debug)]
pub struct AdaptiveThresholdBackend {
    threshold: usize,
}

impl AdaptiveThresholdBackend {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Foreground pixel count for `region`.
    pub fn foreground_pixels(&self, region: &RgbImage) -> usize {
        if region.width() == 0 || region.height() == 0 {
            return 0;
        }
        let gray = filters::to_gray(region);
        let blurred = filters::gaussian_blur(&gray, PRE_BLUR_SIZE, 0.0, Border::Reflect101);
        let binary = filters::adaptive_threshold_inv(&blurred, ADAPTIVE_BLOCK_SIZE, ADAPTIVE_OFFSET);
        filters::count_foreground(&binary)
    }
}

impl Default for AdaptiveThresholdBackend {
    fn default() -> Self {
        Self::new(DEFAULT_OCCUPANCY_THRESHOLD)
    }
}

impl OccupancyBackend for AdaptiveThresholdBackend {
    fn name(&self) -> &'static str {
        "adaptive_threshold"
    }

    fn classify(&mut self, region: &RgbImage) -> SlotStatus {
        SlotStatus::from_occupied(self.foreground_pixels(region) > self.threshold)
    }
}

/// Classify an optional crop. Missing or empty regions are `Free`.
pub fn classify_region(region: Option<&RgbImage>, threshold: usize) -> SlotStatus {
    match region {
        Some(region) => AdaptiveThresholdBackend::new(threshold).classify(region),
        None => SlotStatus::Free,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn checkerboard(width: u32, height: u32, cell: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            if ((x / cell) + (y / cell)) % 2 == 0 {
                Rgb([20, 20, 20])
            } else {
                Rgb([235, 235, 235])
            }
        })
    }

    #[test]
    fn empty_region_is_free() {
        assert_eq!(classify_region(None, 300), SlotStatus::Free);
        let empty = RgbImage::new(0, 0);
        assert_eq!(classify_region(Some(&empty), 300), SlotStatus::Free);
    }

    #[test]
    fn uniform_region_is_free() {
        let flat = RgbImage::from_pixel(30, 60, Rgb([128, 128, 128]));
        let backend = AdaptiveThresholdBackend::default();
        assert_eq!(backend.foreground_pixels(&flat), 0);
        assert_eq!(classify_region(Some(&flat), 300), SlotStatus::Free);
    }

    #[test]
    fn textured_region_is_occupied() {
        let region = checkerboard(30, 60, 6);
        let backend = AdaptiveThresholdBackend::default();
        assert!(backend.foreground_pixels(&region) > DEFAULT_OCCUPANCY_THRESHOLD);
        assert_eq!(classify_region(Some(&region), 300), SlotStatus::Occupied);
    }

    #[test]
    fn threshold_is_strictly_greater_than() {
        let region = checkerboard(30, 60, 6);
        let count = AdaptiveThresholdBackend::default().foreground_pixels(&region);
        assert_eq!(classify_region(Some(&region), count), SlotStatus::Free);
        assert_eq!(classify_region(Some(&region), count - 1), SlotStatus::Occupied);
    }

    #[test]
    fn classification_is_repeatable() {
        let region = checkerboard(30, 60, 4);
        let mut backend = AdaptiveThresholdBackend::new(300);
        let first = backend.classify(&region);
        assert_eq!(backend.classify(&region), first);
    }
}
