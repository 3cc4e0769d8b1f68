//! Deterministic image preprocessing
//!
//! Every image entering the network goes through the same pure transform:
//! decode to RGB, resize to a fixed square, scale to [0, 1], then apply a
//! per-channel `(x - mean) / std`. Output is a flattened CHW `Vec<f32>`.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, RgbImage};
use serde::{Deserialize, Serialize};

use crate::utils::error::{DuelError, Result};
use crate::IMAGE_SIZE;

/// Default normalization, maps [0, 1] to [-1, 1]
pub const DEFAULT_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
/// See [`DEFAULT_MEAN`]
pub const DEFAULT_STD: [f32; 3] = [0.5, 0.5, 0.5];

/// Pure resize/normalize transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    /// Output width and height
    pub image_size: usize,
    /// Per-channel mean subtracted after scaling to [0, 1]
    pub mean: [f32; 3],
    /// Per-channel divisor applied after mean subtraction
    pub std: [f32; 3],
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            image_size: IMAGE_SIZE,
            mean: DEFAULT_MEAN,
            std: DEFAULT_STD,
        }
    }
}

impl Preprocessor {
    pub fn new(image_size: usize, mean: [f32; 3], std: [f32; 3]) -> Self {
        Self {
            image_size,
            mean,
            std,
        }
    }

    /// Number of floats in one processed image
    pub fn tensor_len(&self) -> usize {
        3 * self.image_size * self.image_size
    }

    /// Decode an image file, mapping every failure to `CorruptImage`
    pub fn decode(&self, path: &Path) -> Result<DynamicImage> {
        let corrupt = |reason: String| DuelError::CorruptImage {
            path: path.to_path_buf(),
            reason,
        };

        ImageReader::open(path)
            .map_err(|e| corrupt(e.to_string()))?
            .with_guessed_format()
            .map_err(|e| corrupt(e.to_string()))?
            .decode()
            .map_err(|e| corrupt(e.to_string()))
    }

    /// Decode and resize to the working resolution, without normalization
    pub fn load_rgb(&self, path: &Path) -> Result<RgbImage> {
        Ok(self.resize(&self.decode(path)?))
    }

    /// Convert to three 8-bit channels, then resize to the fixed square
    pub fn resize(&self, image: &DynamicImage) -> RgbImage {
        let size = self.image_size as u32;
        let rgb = image.to_rgb8();
        imageops::resize(&rgb, size, size, FilterType::Triangle)
    }

    /// Load a file and return its normalized CHW tensor data
    pub fn load(&self, path: &Path) -> Result<Vec<f32>> {
        let image = self.decode(path)?;
        Ok(self.process(&image))
    }

    /// Apply the full transform to an in-memory image
    pub fn process(&self, image: &DynamicImage) -> Vec<f32> {
        let rgb = self.resize(image);
        self.normalize(&rgb)
    }

    /// Convert an RGB image of the working size to normalized CHW floats
    pub fn normalize(&self, rgb: &RgbImage) -> Vec<f32> {
        let (width, height) = rgb.dimensions();
        let num_pixels = (width * height) as usize;
        let mut data = vec![0.0f32; 3 * num_pixels];

        // CHW layout: all R values, then all G values, then all B values
        for (i, pixel) in rgb.pixels().enumerate() {
            for c in 0..3 {
                data[c * num_pixels + i] = (pixel[c] as f32 / 255.0 - self.mean[c]) / self.std[c];
            }
        }

        data
    }

    /// Undo normalization for one CHW tensor, back to an RGB image
    pub fn denormalize(&self, data: &[f32]) -> RgbImage {
        let size = self.image_size as u32;
        let num_pixels = self.image_size * self.image_size;

        RgbImage::from_fn(size, size, |x, y| {
            let i = (y * size + x) as usize;
            let mut px = [0u8; 3];
            for c in 0..3 {
                let v = data[c * num_pixels + i] * self.std[c] + self.mean[c];
                px[c] = (v * 255.0).round().clamp(0.0, 255.0) as u8;
            }
            image::Rgb(px)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn gradient_image(width: u32, height: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_process_is_bit_identical() {
        let pre = Preprocessor::new(32, DEFAULT_MEAN, DEFAULT_STD);
        let img = gradient_image(50, 40);

        let a = pre.process(&img);
        let b = pre.process(&img);

        assert_eq!(a.len(), pre.tensor_len());
        let a_bits: Vec<u32> = a.iter().map(|v| v.to_bits()).collect();
        let b_bits: Vec<u32> = b.iter().map(|v| v.to_bits()).collect();
        assert_eq!(a_bits, b_bits);
    }

    #[test]
    fn test_normalized_range() {
        let pre = Preprocessor::new(16, DEFAULT_MEAN, DEFAULT_STD);
        let data = pre.process(&gradient_image(16, 16));
        assert!(data.iter().all(|v| (-1.0..=1.0).contains(v)));

        let white = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, image::Rgb([255, 255, 255])));
        assert!(pre.process(&white).iter().all(|v| (*v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_color_conversion_happens_before_resize() {
        let pre = Preprocessor::new(16, DEFAULT_MEAN, DEFAULT_STD);

        let deep = DynamicImage::ImageRgb16(image::ImageBuffer::from_fn(37, 23, |x, y| {
            image::Rgb([(x * 1771) as u16, (y * 2843) as u16, ((x * y) * 97) as u16])
        }));
        let shallow = DynamicImage::ImageRgb8(deep.to_rgb8());
        assert_eq!(pre.process(&deep), pre.process(&shallow));

        let luma_alpha = DynamicImage::ImageLumaA8(image::ImageBuffer::from_fn(31, 19, |x, y| {
            image::LumaA([(x * 8) as u8, (y * 13) as u8])
        }));
        let flattened = DynamicImage::ImageRgb8(luma_alpha.to_rgb8());
        assert_eq!(pre.process(&luma_alpha), pre.process(&flattened));
    }

    #[test]
    fn test_grayscale_input_becomes_three_channels() {
        let pre = Preprocessor::new(8, DEFAULT_MEAN, DEFAULT_STD);
        let gray = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(10, 10, image::Luma([128])));
        let data = pre.process(&gray);
        assert_eq!(data.len(), 3 * 8 * 8);
        assert_eq!(data[0], data[64]);
        assert_eq!(data[0], data[128]);
    }

    #[test]
    fn test_load_file_matches_in_memory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("img.png");
        let img = gradient_image(20, 20);
        img.save(&path).unwrap();

        let pre = Preprocessor::new(12, DEFAULT_MEAN, DEFAULT_STD);
        assert_eq!(pre.load(&path).unwrap(), pre.process(&img));
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        let err = Preprocessor::default().load(&path).unwrap_err();
        assert!(matches!(err, DuelError::CorruptImage { .. }));
    }

    #[test]
    fn test_denormalize_roundtrip() {
        let pre = Preprocessor::new(8, DEFAULT_MEAN, DEFAULT_STD);
        let rgb = pre.resize(&gradient_image(8, 8));
        let restored = pre.denormalize(&pre.normalize(&rgb));
        assert_eq!(restored, rgb);
    }
}
