use image::RgbImage;

use crate::SlotStatus;

/// Occupancy classifier backend.
///
/// A backend turns one cropped slot region into a binary verdict. It must
/// never fail: degenerate regions classify as `Free`.
pub trait OccupancyBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Classify one slot region.
    fn classify(&mut self, region: &RgbImage) -> SlotStatus;
}
