// THEORY:
// The `structural` module measures *where* two captures differ in a way a person
// would notice. Raw pixel deltas treat a one-unit shift in brightness the same as a
// missing button; structural similarity instead compares local luminance, contrast
// and structure over a sliding window and yields a per-pixel similarity field.
//
// Algorithm steps:
// 1.  **Grayscale**: both captures are reduced to Rec. 601 luma.
// 2.  **Local statistics**: means, variances and the covariance of the two gray
//     images are computed over a uniform square window with a separable box filter.
//     Borders are handled by mirror reflection (`d c b a | a b c d | d c b a`).
//     Variances use the sample normalization N / (N - 1).
// 3.  **Similarity index**: for each pixel,
//         S = (2 ux uy + C1)(2 vxy + C2) / ((ux^2 + uy^2 + C1)(vx + vy + C2))
//     with C1 = (k1 L)^2, C2 = (k2 L)^2 and L = 255.
// 4.  **Difference map**: the field is clamped to [0, 1] and scaled to bytes.
//     Low values mark structurally different locations; the region extractor
//     thresholds this map.

use crate::core_modules::pixel::pixel::Pixel;
use crate::error::CompareError;
use image::{GrayImage, Luma, RgbImage};

pub type SimilarityScore = f64;

const DATA_RANGE: f64 = 255.0;

/// Parameters of the windowed similarity index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SsimParams {
    /// Side of the square window. Must be odd; shrinks for images smaller than it.
    pub window_size: u32,
    pub k1: f64,
    pub k2: f64,
}

impl Default for SsimParams {
    fn default() -> Self {
        Self {
            window_size: 7,
            k1: 0.01,
            k2: 0.03,
        }
    }
}

/// A single-channel map where 255 means "identical here" and 0 "nothing alike".
#[derive(Debug, Clone)]
pub struct DifferenceMap {
    pub map: GrayImage,
}

impl DifferenceMap {
    /// The same map replicated across three channels, for viewing.
    pub fn to_visualization(&self) -> RgbImage {
        let (width, height) = self.map.dimensions();
        RgbImage::from_fn(width, height, |x, y| {
            let value = self.map.get_pixel(x, y).0[0];
            image::Rgb([value, value, value])
        })
    }
}

/// Reduces an RGB capture to Rec. 601 grayscale.
pub fn grayscale(image: &RgbImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut gray = GrayImage::new(width, height);
    for (x, y, rgb) in image.enumerate_pixels() {
        gray.put_pixel(x, y, Luma([Pixel::from(rgb).gray()]));
    }
    gray
}

/// Computes the mean structural similarity and the per-pixel difference map.
pub fn structural_diff_map(
    before: &RgbImage,
    after: &RgbImage,
    params: &SsimParams,
) -> Result<(SimilarityScore, DifferenceMap), CompareError> {
    if before.dimensions() != after.dimensions() {
        return Err(CompareError::mismatch(before.dimensions(), after.dimensions()));
    }

    let (width, height) = before.dimensions();
    let field = similarity_field(&grayscale(before), &grayscale(after), params);
    let score = mean_score(&field, width as usize, height as usize, params);

    let map = GrayImage::from_fn(width, height, |x, y| {
        let similarity = field[y as usize * width as usize + x as usize];
        Luma([(similarity.clamp(0.0, 1.0) * 255.0).round() as u8])
    });

    Ok((score, DifferenceMap { map }))
}

/// Largest odd window that fits in both dimensions, capped at the requested size.
fn effective_window(width: usize, height: usize, requested: u32) -> usize {
    let mut window = (requested.max(1) as usize).min(width).min(height).max(1);
    if window % 2 == 0 {
        window -= 1;
    }
    window.max(1)
}

fn similarity_field(x: &GrayImage, y: &GrayImage, params: &SsimParams) -> Vec<f64> {
    let (width, height) = (x.width() as usize, x.height() as usize);
    let window = effective_window(width, height, params.window_size);
    let radius = window / 2;
    let samples = (window * window) as f64;
    let cov_norm = if samples > 1.0 { samples / (samples - 1.0) } else { 1.0 };

    let xs: Vec<f64> = x.as_raw().iter().map(|v| *v as f64).collect();
    let ys: Vec<f64> = y.as_raw().iter().map(|v| *v as f64).collect();
    let xx: Vec<f64> = xs.iter().map(|v| v * v).collect();
    let yy: Vec<f64> = ys.iter().map(|v| v * v).collect();
    let xy: Vec<f64> = xs.iter().zip(&ys).map(|(a, b)| a * b).collect();

    let ux = box_filter(&xs, width, height, radius);
    let uy = box_filter(&ys, width, height, radius);
    let uxx = box_filter(&xx, width, height, radius);
    let uyy = box_filter(&yy, width, height, radius);
    let uxy = box_filter(&xy, width, height, radius);

    let c1 = (params.k1 * DATA_RANGE).powi(2);
    let c2 = (params.k2 * DATA_RANGE).powi(2);

    (0..width * height)
        .map(|i| {
            let vx = cov_norm * (uxx[i] - ux[i] * ux[i]);
            let vy = cov_norm * (uyy[i] - uy[i] * uy[i]);
            let vxy = cov_norm * (uxy[i] - ux[i] * uy[i]);

            let a1 = 2.0 * ux[i] * uy[i] + c1;
            let a2 = 2.0 * vxy + c2;
            let b1 = ux[i] * ux[i] + uy[i] * uy[i] + c1;
            let b2 = vx + vy + c2;
            (a1 * a2) / (b1 * b2)
        })
        .collect()
}

/// Mean of the field, excluding the border a full window cannot cover when possible.
fn mean_score(field: &[f64], width: usize, height: usize, params: &SsimParams) -> SimilarityScore {
    let pad = effective_window(width, height, params.window_size) / 2;
    let (x_range, y_range) = if width > 2 * pad && height > 2 * pad {
        (pad..width - pad, pad..height - pad)
    } else {
        (0..width, 0..height)
    };

    let mut sum = 0.0;
    let mut count = 0usize;
    for y in y_range {
        for x in x_range.clone() {
            sum += field[y * width + x];
            count += 1;
        }
    }
    if count == 0 { 1.0 } else { sum / count as f64 }
}

/// Mirror index into `0..len`, repeating the reflection as often as needed.
fn reflect(index: isize, len: usize) -> usize {
    let period = 2 * len as isize;
    let wrapped = index.rem_euclid(period);
    if wrapped >= len as isize {
        (period - 1 - wrapped) as usize
    } else {
        wrapped as usize
    }
}

/// Separable mean filter over a `(2 * radius + 1)` square window.
fn box_filter(src: &[f64], width: usize, height: usize, radius: usize) -> Vec<f64> {
    let window = (2 * radius + 1) as f64;
    let r = radius as isize;

    let mut horizontal = vec![0.0; src.len()];
    for y in 0..height {
        let row = &src[y * width..(y + 1) * width];
        for x in 0..width {
            let mut sum = 0.0;
            for dx in -r..=r {
                sum += row[reflect(x as isize + dx, width)];
            }
            horizontal[y * width + x] = sum / window;
        }
    }

    let mut out = vec![0.0; src.len()];
    for y in 0..height {
        for x in 0..width {
            let mut sum = 0.0;
            for dy in -r..=r {
                sum += horizontal[reflect(y as isize + dy, height) * width + x];
            }
            out[y * width + x] = sum / window;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn white(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
    }

    fn with_black_square(mut image: RgbImage, x0: u32, y0: u32, side: u32) -> RgbImage {
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                image.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }
        image
    }

    #[test]
    fn reflect_mirrors_around_both_edges() {
        assert_eq!(reflect(-1, 4), 0);
        assert_eq!(reflect(-2, 4), 1);
        assert_eq!(reflect(4, 4), 3);
        assert_eq!(reflect(5, 4), 2);
        assert_eq!(reflect(-3, 1), 0);
    }

    #[test]
    fn box_filter_of_constant_is_constant() {
        let src = vec![7.0; 5 * 3];
        let out = box_filter(&src, 5, 3, 3);
        assert!(out.iter().all(|v| (v - 7.0).abs() < 1e-9));
    }

    #[test]
    fn identical_images_are_fully_similar() {
        let image = with_black_square(white(40, 30), 5, 5, 8);
        let (score, diff) = structural_diff_map(&image, &image, &SsimParams::default()).unwrap();
        assert!((score - 1.0).abs() < 1e-9);
        assert!(diff.map.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn changed_block_is_dark_in_the_map() {
        let before = white(100, 100);
        let after = with_black_square(before.clone(), 20, 20, 10);
        let (score, diff) = structural_diff_map(&before, &after, &SsimParams::default()).unwrap();

        assert!(score < 1.0);
        assert!(diff.map.get_pixel(25, 25).0[0] < 10);
        assert!(diff.map.get_pixel(20, 20).0[0] < 10);
        assert_eq!(diff.map.get_pixel(80, 80).0[0], 255);
        assert_eq!(diff.map.get_pixel(5, 5).0[0], 255);
    }

    #[test]
    fn tiny_images_shrink_the_window() {
        assert_eq!(effective_window(3, 10, 7), 3);
        assert_eq!(effective_window(4, 10, 7), 3);
        assert_eq!(effective_window(1, 1, 7), 1);

        let before = white(1, 1);
        let mut after = before.clone();
        after.put_pixel(0, 0, Rgb([0, 0, 0]));
        let (score, diff) = structural_diff_map(&before, &after, &SsimParams::default()).unwrap();
        assert!(score < 0.01);
        assert_eq!(diff.map.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn visualization_replicates_the_map() {
        let before = white(12, 12);
        let after = with_black_square(before.clone(), 4, 4, 3);
        let (_, diff) = structural_diff_map(&before, &after, &SsimParams::default()).unwrap();
        let view = diff.to_visualization();
        let value = diff.map.get_pixel(5, 5).0[0];
        assert_eq!(view.get_pixel(5, 5).0, [value, value, value]);
    }
}
