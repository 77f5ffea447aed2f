// THEORY:
// The `canvas` module reconciles two captures of unequal size onto one common
// canvas so that every later stage can compare them cell by cell.
//
// Neither image is ever treated as "the smaller one". Ordering two (height, width)
// shapes is not a real two-dimensional ordering: a capture can be taller but
// narrower than its baseline. Instead, the target canvas is the elementwise maximum
// of both shapes and each image is padded independently, on the bottom and right
// edges only, with a constant fill color. Content is always anchored at the
// top-left corner, so pixel (x, y) of the input is pixel (x, y) of the output.

use image::{Rgb, RgbImage, imageops};
use tracing::debug;

/// White, the fill used by default for the padded margins.
pub const DEFAULT_PADDING: [u8; 3] = [255, 255, 255];

/// Pads both images onto a canvas of `(max width, max height)`.
///
/// Images that already match are returned untouched, without copying.
pub fn normalize(before: RgbImage, after: RgbImage, fill: [u8; 3]) -> (RgbImage, RgbImage) {
    if before.dimensions() == after.dimensions() {
        return (before, after);
    }

    let width = before.width().max(after.width());
    let height = before.height().max(after.height());
    debug!(
        before = ?before.dimensions(),
        after = ?after.dimensions(),
        width,
        height,
        "padding captures onto a common canvas"
    );

    (
        pad_to(before, width, height, fill),
        pad_to(after, width, height, fill),
    )
}

/// Extends `image` on the bottom and right edges until it is `width` x `height`.
fn pad_to(image: RgbImage, width: u32, height: u32, fill: [u8; 3]) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image;
    }
    let mut canvas = RgbImage::from_pixel(width, height, Rgb(fill));
    imageops::replace(&mut canvas, &image, 0, 0);
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([value, value, value]))
    }

    #[test]
    fn equal_shapes_are_left_alone() {
        let a = solid(20, 10, 40);
        let (left, right) = normalize(a.clone(), a.clone(), DEFAULT_PADDING);
        assert_eq!(left, a);
        assert_eq!(right, a);
    }

    #[test]
    fn target_size_ignores_argument_order() {
        // Wider but shorter versus narrower but taller.
        let wide = solid(100, 50, 0);
        let tall = solid(50, 100, 0);

        let (a, b) = normalize(wide.clone(), tall.clone(), DEFAULT_PADDING);
        let (c, d) = normalize(tall, wide, DEFAULT_PADDING);
        for image in [&a, &b, &c, &d] {
            assert_eq!(image.dimensions(), (100, 100));
        }
    }

    #[test]
    fn fifty_square_against_sixty_by_seventy() {
        let small = solid(50, 50, 0);
        let large = solid(70, 60, 10);
        let (padded, untouched) = normalize(small, large.clone(), DEFAULT_PADDING);

        assert_eq!(padded.dimensions(), (70, 60));
        assert_eq!(untouched, large);
    }

    #[test]
    fn padding_goes_bottom_right_only() {
        let small = solid(3, 2, 0);
        let large = solid(5, 4, 0);
        let (padded, _) = normalize(small, large, DEFAULT_PADDING);

        for y in 0..4 {
            for x in 0..5 {
                let expected = if x < 3 && y < 2 { [0, 0, 0] } else { DEFAULT_PADDING };
                assert_eq!(padded.get_pixel(x, y).0, expected, "pixel ({x}, {y})");
            }
        }
    }

    #[test]
    fn custom_fill_color_is_used() {
        let (padded, _) = normalize(solid(1, 1, 0), solid(2, 1, 0), [9, 8, 7]);
        assert_eq!(padded.get_pixel(1, 0).0, [9, 8, 7]);
    }
}
