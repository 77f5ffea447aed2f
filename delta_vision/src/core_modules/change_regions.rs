// THEORY:
// The `change_regions` module is the spatial grouping layer of the engine. It turns
// the per-pixel difference map into a short list of discrete, reportable changes,
// each with a bounding box and a snapshot cropped from the current capture.
//
// Algorithm steps:
// 1.  **Automatic threshold**: an Otsu level is chosen from the histogram of the
//     difference map. Locations at or below it (low similarity) become foreground.
// 2.  **Outer borders**: borders are traced over the binary map (Suzuki-Abe). Only
//     outer borders without a parent are kept, so a shape sitting inside another
//     shape's hole is never reported on its own.
// 3.  **Components**: the binary map is labelled with 8-connectivity. Each kept
//     border names one component; its area is the number of foreground pixels in it.
// 4.  **Noise floor**: a component must cover strictly more pixels than the minimum
//     area. Anti-aliasing and sub-pixel rendering jitter stay below it.
// 5.  **Change confirmation**: the windowed similarity smears every change by up to
//     half a window. The box of a surviving component is shrunk to the pixels inside
//     it that really changed; a component with no changed pixel is dropped. Scattered
//     edits (stripes, re-rendered glyphs) still form one component in the map.
// 6.  **Data aggregation**: each survivor becomes a `ChangeRegion` with its box and a
//     crop of the current capture. Regions are returned in reading order of their
//     top-left corner.

use crate::core_modules::pixel_delta::CHANGED;
use crate::core_modules::structural::DifferenceMap;
use image::{GrayImage, RgbImage};

/// The default noise floor: components of this many pixels or fewer are ignored.
pub const DEFAULT_MIN_REGION_AREA: usize = 40;

/// A simple struct to represent a pixel coordinate on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// An axis-aligned rectangle in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Top-left, top-right, bottom-left and bottom-right corners.
    ///
    /// The right and bottom edges are exclusive, so a 10 pixel wide box at x = 20
    /// reports corners at 20 and 30.
    pub fn corners(&self) -> [Point; 4] {
        let right = self.x + self.width;
        let bottom = self.y + self.height;
        [
            Point { x: self.x, y: self.y },
            Point { x: right, y: self.y },
            Point { x: self.x, y: bottom },
            Point { x: right, y: bottom },
        ]
    }
}

/// A single, spatially coherent change between the baseline and the current capture.
/// This is a "dumb" data container; it never changes after extraction.
#[derive(Debug, Clone)]
pub struct ChangeRegion {
    /// The box enclosing every pixel of the component.
    pub bounding_box: Rect,
    /// The number of pixels in the component.
    pub area: usize,
    /// The current capture cropped to `bounding_box`.
    pub snapshot: RgbImage,
}

impl ChangeRegion {
    pub fn corners(&self) -> [Point; 4] {
        self.bounding_box.corners()
    }
}

pub mod region_extractor {
    use super::*; // Make structs from parent module available.
    use crate::error::CompareError;
    use image::{Luma, imageops};
    use imageproc::contours::{BorderType, Contour, find_contours};
    use imageproc::contrast::{ThresholdType, otsu_level, threshold};
    use imageproc::definitions::Image;
    use imageproc::region_labelling::{Connectivity, connected_components};
    use tracing::debug;

    /// Thresholds the difference map and returns every qualifying change region.
    pub fn extract_regions(
        diff: &DifferenceMap,
        change_mask: &GrayImage,
        after: &RgbImage,
        min_area: usize,
    ) -> Result<Vec<ChangeRegion>, CompareError> {
        let dimensions = diff.map.dimensions();
        if change_mask.dimensions() != dimensions {
            return Err(CompareError::mismatch(dimensions, change_mask.dimensions()));
        }
        if after.dimensions() != dimensions {
            return Err(CompareError::mismatch(dimensions, after.dimensions()));
        }
        if dimensions.0 == 0 || dimensions.1 == 0 {
            return Ok(Vec::new());
        }

        // --- 1. Inverted Otsu threshold ---
        let level = otsu_level(&diff.map);
        let binary = threshold(&diff.map, level, ThresholdType::BinaryInverted);

        // --- 2 & 3. Outer borders and their components ---
        let contours: Vec<Contour<u32>> = find_contours(&binary);
        let labels = connected_components(&binary, Connectivity::Eight, Luma([0u8]));

        let mut boxes: Vec<(Rect, usize)> = Vec::new();
        let mut outermost = 0usize;
        for contour in &contours {
            if contour.border_type != BorderType::Outer || contour.parent.is_some() {
                continue;
            }
            let Some(start) = contour.points.first() else {
                continue;
            };
            outermost += 1;
            let label = labels.get_pixel(start.x, start.y).0[0];
            let outline = contour_bounds(contour);

            // --- 4 & 5. Noise floor, then confirmation against the change mask ---
            let (area, changed) = measure(&labels, label, change_mask, outline);
            if area <= min_area {
                continue;
            }
            if let Some(rect) = changed {
                boxes.push((rect, area));
            }
        }

        // Reading order; the sort is stable so ties keep border discovery order.
        boxes.sort_by_key(|(rect, _)| (rect.y, rect.x));
        debug!(level, outermost, kept = boxes.len(), min_area, "extracted change regions");

        // --- 6. Data aggregation ---
        Ok(boxes
            .into_iter()
            .map(|(rect, area)| ChangeRegion {
                bounding_box: rect,
                area,
                snapshot: imageops::crop_imm(after, rect.x, rect.y, rect.width, rect.height)
                    .to_image(),
            })
            .collect())
    }

    /// The box enclosing every point of a traced border.
    fn contour_bounds(contour: &Contour<u32>) -> Rect {
        let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
        let (mut max_x, mut max_y) = (0u32, 0u32);
        for point in &contour.points {
            min_x = min_x.min(point.x);
            min_y = min_y.min(point.y);
            max_x = max_x.max(point.x);
            max_y = max_y.max(point.y);
        }
        Rect {
            x: min_x,
            y: min_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
        }
    }

    /// Counts the pixels of component `label` inside `outline` and boxes the ones
    /// that changed. `None` when none of them changed.
    fn measure(
        labels: &Image<Luma<u32>>,
        label: u32,
        change_mask: &GrayImage,
        outline: Rect,
    ) -> (usize, Option<Rect>) {
        let mut area = 0usize;
        let mut changed: Option<(u32, u32, u32, u32)> = None;

        for y in outline.y..outline.y + outline.height {
            for x in outline.x..outline.x + outline.width {
                if labels.get_pixel(x, y).0[0] != label {
                    continue;
                }
                area += 1;
                if change_mask.get_pixel(x, y).0[0] != CHANGED {
                    continue;
                }
                changed = Some(match changed {
                    None => (x, y, x, y),
                    Some((min_x, min_y, max_x, max_y)) => {
                        (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
                    }
                });
            }
        }

        let rect = changed.map(|(min_x, min_y, max_x, max_y)| Rect {
            x: min_x,
            y: min_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
        });
        (area, rect)
    }
}
