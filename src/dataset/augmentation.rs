//! Deterministic test-time augmentations
//!
//! All transforms operate on already-normalized CHW float planes, so they can
//! be applied after preprocessing without re-decoding the image. Rotation uses
//! bilinear sampling about the image center; pixels that map outside the
//! source are filled with zero.

use serde::{Deserialize, Serialize};

/// A single deterministic view of an image
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Augmentation {
    Identity,
    HorizontalFlip,
    VerticalFlip,
    /// Counter-clockwise rotation about the center
    Rotate { degrees: f32 },
}

impl Augmentation {
    /// The four-view TTA set: identity, horizontal flip, rotation, vertical flip
    pub fn tta_set(rotation_degrees: f32) -> Vec<Augmentation> {
        vec![
            Augmentation::Identity,
            Augmentation::HorizontalFlip,
            Augmentation::Rotate {
                degrees: rotation_degrees,
            },
            Augmentation::VerticalFlip,
        ]
    }

    pub fn name(&self) -> String {
        match self {
            Augmentation::Identity => "identity".to_string(),
            Augmentation::HorizontalFlip => "hflip".to_string(),
            Augmentation::VerticalFlip => "vflip".to_string(),
            Augmentation::Rotate { degrees } => format!("rotate{}", degrees),
        }
    }

    /// Apply to a flattened `[3, size, size]` image
    pub fn apply(&self, image: &[f32], size: usize) -> Vec<f32> {
        match *self {
            Augmentation::Identity => image.to_vec(),
            Augmentation::HorizontalFlip => remap(image, size, |x, y| (size - 1 - x, y)),
            Augmentation::VerticalFlip => remap(image, size, |x, y| (x, size - 1 - y)),
            Augmentation::Rotate { degrees } => rotate(image, size, degrees),
        }
    }
}

/// Copy pixels through an integer coordinate mapping
fn remap<F>(image: &[f32], size: usize, source: F) -> Vec<f32>
where
    F: Fn(usize, usize) -> (usize, usize),
{
    let plane = size * size;
    let mut out = vec![0.0f32; image.len()];

    for c in 0..3 {
        let base = c * plane;
        for y in 0..size {
            for x in 0..size {
                let (sx, sy) = source(x, y);
                out[base + y * size + x] = image[base + sy * size + sx];
            }
        }
    }

    out
}

fn rotate(image: &[f32], size: usize, degrees: f32) -> Vec<f32> {
    if degrees == 0.0 {
        return image.to_vec();
    }

    let angle = degrees.to_radians();
    let (sin_a, cos_a) = angle.sin_cos();
    let center = (size as f32 - 1.0) / 2.0;
    let plane = size * size;
    let mut out = vec![0.0f32; image.len()];

    for y in 0..size {
        for x in 0..size {
            // Inverse mapping: find where each output pixel comes from
            let dx = x as f32 - center;
            let dy = y as f32 - center;
            let src_x = center + dx * cos_a - dy * sin_a;
            let src_y = center + dx * sin_a + dy * cos_a;

            for c in 0..3 {
                let channel = &image[c * plane..(c + 1) * plane];
                out[c * plane + y * size + x] = bilinear_sample(channel, size, src_x, src_y);
            }
        }
    }

    out
}

/// Sample one channel plane with bilinear interpolation, zero outside
fn bilinear_sample(plane: &[f32], size: usize, x: f32, y: f32) -> f32 {
    const EPS: f32 = 1e-3;
    let max = size as f32 - 1.0;

    if x < -EPS || y < -EPS || x > max + EPS || y > max + EPS {
        return 0.0;
    }

    let x = x.clamp(0.0, max);
    let y = y.clamp(0.0, max);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(size - 1);
    let y1 = (y0 + 1).min(size - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let v00 = plane[y0 * size + x0];
    let v10 = plane[y0 * size + x1];
    let v01 = plane[y1 * size + x0];
    let v11 = plane[y1 * size + x1];

    v00 * (1.0 - fx) * (1.0 - fy) + v10 * fx * (1.0 - fy) + v01 * (1.0 - fx) * fy + v11 * fx * fy
}
