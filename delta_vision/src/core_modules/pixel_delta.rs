// THEORY:
// The `pixel_delta` module is the comparative layer directly above `Pixel`. A single
// pixel is meaningless on its own; its value is in the relationship between the
// baseline and the current capture at the same location.
//
// It produces two things in one pass over the canvas:
// 1.  **The headline number**: the share of channel cells (width x height x 3) whose
//     absolute difference is non-zero, as a percentage. This is the figure a
//     comparison reports, so it is deliberately strict: any change, however faint,
//     counts.
// 2.  **The change mask**: a single-channel image marking every pixel where at least
//     one channel differs. The region extractor uses it to keep reported boxes tight
//     to pixels that really changed.

use crate::core_modules::pixel::pixel::{CHANNELS, Pixel};
use crate::error::CompareError;
use image::{GrayImage, Luma, RgbImage};

pub type Percentage = f64;

/// Value written into the change mask for a pixel that differs.
pub const CHANGED: u8 = 255;

/// The outcome of comparing two equally sized captures cell by cell.
#[derive(Debug, Clone)]
pub struct PixelDelta {
    /// Share of differing channel cells, in `[0, 100]`.
    pub percentage: Percentage,
    /// Number of channel cells with a non-zero difference.
    pub differing_cells: u64,
    /// `CHANGED` where any channel differs, 0 elsewhere.
    pub mask: GrayImage,
}

/// Scores how much of `after` differs from `before`.
///
/// Both images must already share the same dimensions.
pub fn pixel_delta(before: &RgbImage, after: &RgbImage) -> Result<PixelDelta, CompareError> {
    if before.dimensions() != after.dimensions() {
        return Err(CompareError::mismatch(before.dimensions(), after.dimensions()));
    }

    let (width, height) = before.dimensions();
    let mut mask = GrayImage::new(width, height);
    let mut differing_cells = 0u64;

    for ((x, y, old), new) in before.enumerate_pixels().zip(after.pixels()) {
        let changed = Pixel::from(old).differing_channels(&Pixel::from(new));
        if changed > 0 {
            differing_cells += changed as u64;
            mask.put_pixel(x, y, Luma([CHANGED]));
        }
    }

    let total_cells = width as u64 * height as u64 * CHANNELS as u64;
    let percentage = if total_cells == 0 {
        0.0
    } else {
        (differing_cells as f64 * 100.0) / total_cells as f64
    };

    Ok(PixelDelta {
        percentage,
        differing_cells,
        mask,
    })
}
