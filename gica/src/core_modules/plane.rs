// THEORY:
// The `IntensityPlane` is the most fundamental unit of the engine. It is a "dumb"
// data container for one channel of an image: a width, a height and a flattened
// row-major buffer of intensities. Whatever the source bit depth (8-bit, 16-bit or
// float), values are coerced to `f32` once, on the way in, so every later stage
// works on a single numeric type.
//
// Key principles:
// 1) Single-channel scope: a plane knows nothing about other channels. Combining
//    channels is the job of `ChannelSet`.
// 2) Grayscale only: colour images are rejected here. Splitting an RGB image into
//    planes is a collaborator concern, offered as the separate `split_channels`
//    helper so a caller has to ask for it.
// 3) Summary statistics (mean, unbiased variance) are the only computations a
//    plane performs on itself; they feed the adaptive threshold.

pub mod plane {
    use crate::error::{GicaError, GicaResult};
    use image::{DynamicImage, GrayImage, ImageBuffer, Luma};

    pub type Intensity = f32;

    /// A single grayscale channel, coerced to floating point.
    #[derive(Debug, Clone, PartialEq)]
    pub struct IntensityPlane {
        width: usize,
        height: usize,
        /// Row-major intensities, `width * height` entries.
        data: Vec<Intensity>,
    }

    impl IntensityPlane {
        pub fn new(width: usize, height: usize, data: Vec<Intensity>) -> GicaResult<Self> {
            if data.len() != width * height {
                return Err(GicaError::invalid(
                    "data",
                    format!(
                        "{} values supplied for a {}x{} plane",
                        data.len(),
                        width,
                        height
                    ),
                ));
            }
            Ok(Self {
                width,
                height,
                data,
            })
        }

        /// Builds a plane by evaluating `f(x, y)` for every pixel.
        pub fn from_fn(
            width: usize,
            height: usize,
            mut f: impl FnMut(usize, usize) -> Intensity,
        ) -> Self {
            let mut data = Vec::with_capacity(width * height);
            for y in 0..height {
                for x in 0..width {
                    data.push(f(x, y));
                }
            }
            Self {
                width,
                height,
                data,
            }
        }

        /// Accepts the grayscale variants of `DynamicImage` only.
        pub fn from_dynamic(image: &DynamicImage) -> GicaResult<Self> {
            match image {
                DynamicImage::ImageLuma8(buffer) => Ok(Self::from(buffer)),
                DynamicImage::ImageLuma16(buffer) => Ok(Self::from(buffer)),
                other => Err(GicaError::UnsupportedFormat(format!(
                    "{:?}; only 8/16-bit grayscale planes are accepted",
                    other.color()
                ))),
            }
        }

        pub fn width(&self) -> usize {
            self.width
        }

        pub fn height(&self) -> usize {
            self.height
        }

        pub fn len(&self) -> usize {
            self.data.len()
        }

        pub fn is_empty(&self) -> bool {
            self.data.is_empty()
        }

        pub fn pixels(&self) -> &[Intensity] {
            &self.data
        }

        pub fn get(&self, x: usize, y: usize) -> Intensity {
            self.data[y * self.width + x]
        }

        /// Mean intensity, accumulated in `f64`.
        pub fn mean(&self) -> f64 {
            if self.data.is_empty() {
                return 0.0;
            }
            self.data.iter().map(|&v| v as f64).sum::<f64>() / self.data.len() as f64
        }

        /// Unbiased variance (divides by n - 1). Requires at least two pixels.
        pub fn variance(&self, mean: f64) -> GicaResult<f64> {
            let n = self.data.len();
            if n < 2 {
                return Err(GicaError::DegeneratePlane { pixels: n });
            }
            let sum_sq: f64 = self
                .data
                .iter()
                .map(|&v| (v as f64 - mean).powi(2))
                .sum();
            Ok(sum_sq / (n - 1) as f64)
        }
    }

    impl From<&GrayImage> for IntensityPlane {
        fn from(buffer: &GrayImage) -> Self {
            Self {
                width: buffer.width() as usize,
                height: buffer.height() as usize,
                data: buffer.as_raw().iter().map(|&v| v as Intensity).collect(),
            }
        }
    }

    impl From<&ImageBuffer<Luma<u16>, Vec<u16>>> for IntensityPlane {
        fn from(buffer: &ImageBuffer<Luma<u16>, Vec<u16>>) -> Self {
            Self {
                width: buffer.width() as usize,
                height: buffer.height() as usize,
                data: buffer.as_raw().iter().map(|&v| v as Intensity).collect(),
            }
        }
    }

    impl From<&ImageBuffer<Luma<f32>, Vec<f32>>> for IntensityPlane {
        fn from(buffer: &ImageBuffer<Luma<f32>, Vec<f32>>) -> Self {
            Self {
                width: buffer.width() as usize,
                height: buffer.height() as usize,
                data: buffer.as_raw().clone(),
            }
        }
    }

    /// Splits an image into grayscale planes: one plane for grayscale input, the
    /// red, green and blue planes for colour input. Alpha is dropped.
    pub fn split_channels(image: &DynamicImage) -> GicaResult<Vec<IntensityPlane>> {
        match image {
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_) => {
                Ok(vec![IntensityPlane::from_dynamic(image)?])
            }
            DynamicImage::ImageLumaA8(_) => Ok(vec![IntensityPlane::from(&image.to_luma8())]),
            DynamicImage::ImageLumaA16(_) => Ok(vec![IntensityPlane::from(&image.to_luma16())]),
            DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => {
                let rgb = image.to_rgb8();
                Ok(split_rgb(rgb.width(), rgb.height(), rgb.as_raw(), |v| {
                    v as Intensity
                }))
            }
            DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgba16(_) => {
                let rgb = image.to_rgb16();
                Ok(split_rgb(rgb.width(), rgb.height(), rgb.as_raw(), |v| {
                    v as Intensity
                }))
            }
            DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
                let rgb = image.to_rgb32f();
                Ok(split_rgb(rgb.width(), rgb.height(), rgb.as_raw(), |v| v))
            }
            other => Err(GicaError::UnsupportedFormat(format!("{:?}", other.color()))),
        }
    }

    fn split_rgb<T: Copy>(
        width: u32,
        height: u32,
        raw: &[T],
        convert: impl Fn(T) -> Intensity,
    ) -> Vec<IntensityPlane> {
        let (width, height) = (width as usize, height as usize);
        (0..3)
            .map(|channel| IntensityPlane {
                width,
                height,
                data: raw.chunks(3).map(|px| convert(px[channel])).collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::plane::*;
    use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};

    #[test]
    fn statistics_use_unbiased_variance() {
        let plane = IntensityPlane::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let mean = plane.mean();
        assert_eq!(mean, 2.5);
        // sum of squared deviations = 5.0, divided by n - 1 = 3
        assert!((plane.variance(mean).unwrap() - 5.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn single_pixel_plane_has_no_variance() {
        let plane = IntensityPlane::new(1, 1, vec![7.0]).unwrap();
        assert_eq!(
            plane.variance(plane.mean()),
            Err(crate::error::GicaError::DegeneratePlane { pixels: 1 })
        );
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        assert!(IntensityPlane::new(3, 3, vec![0.0; 8]).is_err());
    }

    #[test]
    fn gray_image_is_coerced_to_float() {
        let img = GrayImage::from_fn(3, 2, |x, y| Luma([(x + 10 * y) as u8]));
        let plane = IntensityPlane::from(&img);
        assert_eq!(plane.width(), 3);
        assert_eq!(plane.height(), 2);
        assert_eq!(plane.get(2, 1), 12.0);
    }

    #[test]
    fn colour_image_is_rejected_but_can_be_split() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([10, 20, 30])));
        assert!(matches!(
            IntensityPlane::from_dynamic(&img),
            Err(crate::error::GicaError::UnsupportedFormat(_))
        ));

        let planes = split_channels(&img).unwrap();
        assert_eq!(planes.len(), 3);
        assert_eq!(planes[0].get(1, 1), 10.0);
        assert_eq!(planes[1].get(1, 1), 20.0);
        assert_eq!(planes[2].get(1, 1), 30.0);
    }
}
