// THEORY:
// Topology and intermediate maps are float images with no fixed range, which
// most viewers cannot open. For inspection they are linearly rescaled onto
// 0..=255 and written as 8-bit grayscale PNGs. A map whose values are all equal
// becomes all black.

pub mod image_helper {
    use crate::core_modules::activation_map::{FloatImage, MapView};
    use image::codecs::png::PngEncoder;
    use image::{ExtendedColorType, ImageEncoder, ImageError};
    use std::path::Path;

    /// Rescales `values` so the smallest maps to 0 and the largest to 255.
    pub fn scale_to_u8(values: &[f32]) -> Vec<u8> {
        let (min, max) = values
            .iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let span = max - min;
        if !span.is_finite() || span <= 0.0 {
            return vec![0; values.len()];
        }
        values
            .iter()
            .map(|&v| {
                if v.is_finite() {
                    ((v - min) / span * 255.0).round() as u8
                } else {
                    0
                }
            })
            .collect()
    }

    pub fn save(path: impl AsRef<Path>, width: u32, height: u32, buffer: &[u8]) -> Result<(), ImageError> {
        let output = std::fs::File::create(path)?;
        let encoder = PngEncoder::new(output);
        encoder.write_image(buffer, width, height, ExtendedColorType::L8)?;
        Ok(())
    }

    pub fn save_float_map(path: impl AsRef<Path>, image: &FloatImage) -> Result<(), ImageError> {
        let (width, height) = image.dimensions();
        save(path, width, height, &scale_to_u8(image.as_raw()))
    }

    pub fn save_map(path: impl AsRef<Path>, map: &dyn MapView) -> Result<(), ImageError> {
        save_float_map(path, &map.to_float_image())
    }
}

#[cfg(test)]
mod tests {
    use super::image_helper::*;
    use crate::core_modules::activation_map::{ActivationMap, FloatImage};
    use image::Luma;

    #[test]
    fn scaling_spans_full_range() {
        assert_eq!(scale_to_u8(&[1.0, 2.0, 3.0]), vec![0, 128, 255]);
        assert_eq!(scale_to_u8(&[4.0; 3]), vec![0, 0, 0]);
        assert_eq!(scale_to_u8(&[f32::NAN, 0.0, 1.0]), vec![0, 0, 255]);
        assert!(scale_to_u8(&[]).is_empty());
    }

    #[test]
    fn save_gradient_file() {
        let image = FloatImage::from_fn(64, 32, |x, y| Luma([(x + y) as f32 * 0.1]));
        let path = std::env::temp_dir().join("gica_gradient_file.png");
        save_float_map(&path, &image).expect("Error Saving File.");

        let reloaded = image::open(&path).unwrap().to_luma8();
        assert_eq!(reloaded.dimensions(), (64, 32));
        assert_eq!(reloaded.get_pixel(0, 0).0[0], 0);
        assert_eq!(reloaded.get_pixel(63, 31).0[0], 255);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn save_activation_map() {
        let map = ActivationMap::from_cells(3, 2, vec![0, 1, 0, 1, 0, 1]).unwrap();
        let path = std::env::temp_dir().join("gica_activation_map.png");
        save_map(&path, &map).expect("Error Saving File.");

        let reloaded = image::open(&path).unwrap().to_luma8();
        assert_eq!(reloaded.as_raw(), &vec![0, 255, 0, 255, 0, 255]);
        let _ = std::fs::remove_file(path);
    }
}
