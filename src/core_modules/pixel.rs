// THEORY (Single Pixel Colorimetry):
// The `Pixel` module is the most fundamental unit of the segmentation engine. It is a
// "dumb" data container for one RGB pixel plus the single-pixel color metrics the
// masking stages are built on. Nothing here reads neighbors.
//
// Two metrics matter downstream:
// - Lightness: CIE L* (0..100), rescaled to a byte so it can be histogrammed,
//   equalized and thresholded like any 8-bit gray channel.
// - Chroma magnitude: sqrt(a*² + b*²). It is hue-invariant: large for saturated
//   pills of any color and close to zero for white, gray or black surfaces, which
//   makes it the natural discriminator between a colored object and its shadow.
//
// The conversion chain is sRGB bytes -> linear light (256-entry `OnceLock` LUT) ->
// XYZ (D65 matrix) -> CIE Lab relative to the D65 white point. The LUT keeps the hot
// path to a table lookup and a few multiplies; the only transcendental left per
// pixel is the cube root of the Lab companding function.

pub mod pixel {
    use std::sync::OnceLock;

    pub type Channel = u8;
    pub type NormalizedChannel = f32;
    pub type Lightness = f32;
    pub type Chroma = f32;

    // Fast path: 256-entry LUT for sRGB (0..255) -> linear normalized (0..1)
    static SRGB_TO_LINEAR_LUT: OnceLock<[NormalizedChannel; 256]> = OnceLock::new();

    // D65 reference white, Y normalized to 1.
    const WHITE_X: f32 = 0.95047;
    const WHITE_Z: f32 = 1.08883;

    // (6/29)^3 and (29/3)^3 from the CIE Lab definition.
    const LAB_EPSILON: f32 = 216.0 / 24389.0;
    const LAB_KAPPA: f32 = 24389.0 / 27.0;

    /// A CIE Lab triple. `lightness` is L* in 0..100.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Lab {
        pub lightness: Lightness,
        pub a: f32,
        pub b: f32,
    }

    impl Lab {
        /// Euclidean norm of the two chroma axes.
        pub fn chroma(&self) -> Chroma {
            self.a.hypot(self.b)
        }
    }

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

    impl From<&image::Rgb<u8>> for Pixel {
        fn from(rgb: &image::Rgb<u8>) -> Self {
            Pixel::new(rgb[0], rgb[1], rgb[2])
        }
    }

    impl Pixel {
        pub fn new(red: Channel, green: Channel, blue: Channel) -> Self {
            Pixel { red, green, blue }
        }

        #[inline]
        fn srgb_to_linear_normalized_from_byte(srgb_value: Channel) -> NormalizedChannel {
            let table = SRGB_TO_LINEAR_LUT.get_or_init(|| {
                let mut table = [0.0f32; 256];
                let mut i = 0usize;
                while i < 256 {
                    let srgb_normalized = i as NormalizedChannel / 255.0f32;
                    table[i] = if srgb_normalized <= 0.04045f32 {
                        srgb_normalized / 12.92f32
                    } else {
                        ((srgb_normalized + 0.055f32) / 1.055f32).powf(2.4f32)
                    };
                    i += 1;
                }
                table
            });
            table[srgb_value as usize]
        }

        /// CIE XYZ (D65) from LUT-linearized channels.
        pub fn xyz(&self) -> (f32, f32, f32) {
            let red = Self::srgb_to_linear_normalized_from_byte(self.red);
            let green = Self::srgb_to_linear_normalized_from_byte(self.green);
            let blue = Self::srgb_to_linear_normalized_from_byte(self.blue);

            let x = 0.4124564f32 * red + 0.3575761f32 * green + 0.1804375f32 * blue;
            let y = 0.2126729f32 * red + 0.7151522f32 * green + 0.0721750f32 * blue;
            let z = 0.0193339f32 * red + 0.1191920f32 * green + 0.9503041f32 * blue;
            (x, y, z)
        }

        /// CIE Lab relative to the D65 white point.
        pub fn lab(&self) -> Lab {
            let (x, y, z) = self.xyz();
            let fx = Self::lab_companding(x / WHITE_X);
            let fy = Self::lab_companding(y);
            let fz = Self::lab_companding(z / WHITE_Z);

            Lab {
                lightness: 116.0 * fy - 16.0,
                a: 500.0 * (fx - fy),
                b: 200.0 * (fy - fz),
            }
        }

        #[inline]
        fn lab_companding(t: f32) -> f32 {
            if t > LAB_EPSILON {
                t.cbrt()
            } else {
                (LAB_KAPPA * t + 16.0) / 116.0
            }
        }

        /// L* rescaled from 0..100 to a byte.
        pub fn lightness_to_byte(lightness: Lightness) -> Channel {
            (lightness * 255.0 / 100.0).round().clamp(0.0, 255.0) as Channel
        }
    }
}
