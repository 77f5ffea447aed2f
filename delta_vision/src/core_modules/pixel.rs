// THEORY (Single Pixel Heuristics):
// The `Pixel` module is the most fundamental unit of the comparison engine. It is a
// "dumb" data container for a single RGB pixel plus the few single-pixel heuristics
// the numeric stages need. Anything that needs more than one pixel (differences,
// windows, connectivity) belongs in the higher-level modules.
//
// What lives here:
// - Raw channels (RGB, one byte each). Captures never carry alpha: decoders drop it
//   before a pixel is built.
// - Luminance (Rec. 601), the weighting used to reduce a capture to grayscale for
//   the structural similarity stage.
// - Per-channel absolute delta against another pixel, the primitive behind the
//   pixel delta score.

pub mod pixel {
    use image::Rgb;

    pub type Byte = u8;
    pub type Channel = Byte;
    pub type Luminance = f64;

    pub const CHANNELS: usize = 3;

    /// A "dumb" data container representing a single RGB pixel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Pixel {
        /// The red channel value (0-255).
        pub red: Channel,
        /// The green channel value (0-255).
        pub green: Channel,
        /// The blue channel value (0-255).
        pub blue: Channel,
    }

    impl Pixel {
        pub fn new(red: Channel, green: Channel, blue: Channel) -> Self {
            Pixel { red, green, blue }
        }

        /// Rec. 601 luma, the weighting used by common BGR/RGB to gray conversions.
        pub fn luminance(&self) -> Luminance {
            0.299 * self.red as f64 + 0.587 * self.green as f64 + 0.114 * self.blue as f64
        }

        /// Luminance rounded into the byte range of a grayscale image.
        pub fn gray(&self) -> Byte {
            self.luminance().round().clamp(0.0, 255.0) as Byte
        }

        /// Absolute difference of every channel against `other`.
        pub fn channel_deltas(&self, other: &Pixel) -> [Byte; CHANNELS] {
            [
                self.red.abs_diff(other.red),
                self.green.abs_diff(other.green),
                self.blue.abs_diff(other.blue),
            ]
        }

        /// Number of channels that differ from `other` at all.
        pub fn differing_channels(&self, other: &Pixel) -> usize {
            self.channel_deltas(other).iter().filter(|delta| **delta != 0).count()
        }
    }

    impl From<&Rgb<u8>> for Pixel {
        fn from(rgb: &Rgb<u8>) -> Self {
            Pixel::new(rgb[0], rgb[1], rgb[2])
        }
    }

    impl From<Pixel> for Rgb<u8> {
        fn from(pixel: Pixel) -> Self {
            Rgb([pixel.red, pixel.green, pixel.blue])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::pixel::*;

    #[test]
    fn luminance_of_primaries() {
        assert_eq!(Pixel::new(255, 255, 255).gray(), 255);
        assert_eq!(Pixel::new(0, 0, 0).gray(), 0);
        assert_eq!(Pixel::new(255, 0, 0).gray(), 76);
        assert_eq!(Pixel::new(0, 255, 0).gray(), 150);
        assert_eq!(Pixel::new(0, 0, 255).gray(), 29);
    }

    #[test]
    fn channel_deltas_are_symmetric() {
        let a = Pixel::new(10, 200, 30);
        let b = Pixel::new(20, 100, 30);
        assert_eq!(a.channel_deltas(&b), [10, 100, 0]);
        assert_eq!(b.channel_deltas(&a), [10, 100, 0]);
        assert_eq!(a.differing_channels(&b), 2);
        assert_eq!(a.differing_channels(&a), 0);
    }
}
