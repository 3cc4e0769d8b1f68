//! Grad-CAM for the real/fake head
//!
//! The last convolutional block's maps are computed on the eval-mode inner
//! model, re-attached to the autodiff graph as a leaf, and pushed through
//! pooling and the binary head. The score for the predicted side (logit if
//! real, negated logit if fake) is differentiated with respect to the maps;
//! spatially averaged gradients weight the channels of the map.

use std::path::{Path, PathBuf};

use burn::{
    module::AutodiffModule,
    tensor::{backend::AutodiffBackend, ElementConversion, Tensor},
};
use image::{imageops::FilterType, GrayImage, Luma, Rgb, RgbImage};

use crate::dataset::burn_dataset::{check_image_len, images_to_tensor};
use crate::dataset::{Authenticity, Preprocessor};
use crate::model::DualHeadClassifier;
use crate::utils::error::{DuelError, Result};

/// Heatmap opacity in the saved overlay
const OVERLAY_ALPHA: f32 = 0.5;

/// A rendered Grad-CAM overlay
#[derive(Debug, Clone)]
pub struct GradCamOutput {
    /// Saved overlay image
    pub path: PathBuf,
    /// Normalized activation map at input resolution, row-major, in [0, 1]
    pub heatmap: Vec<f32>,
    pub predicted: Authenticity,
    /// Sigmoid of the binary logit
    pub probability: f32,
}

/// Output file for a sample: `{out_dir}/sample_{index}_real_fake.png`
pub fn overlay_path(out_dir: &Path, sample_index: usize) -> PathBuf {
    out_dir.join(format!("sample_{}_real_fake.png", sample_index))
}

/// Compute and save a Grad-CAM overlay for one preprocessed image
pub fn grad_cam<B: AutodiffBackend>(
    model: &DualHeadClassifier<B>,
    image: &[f32],
    preprocessor: &Preprocessor,
    sample_index: usize,
    out_dir: &Path,
    device: &B::Device,
) -> Result<GradCamOutput> {
    let size = preprocessor.image_size;
    check_image_len(image, size, "gradcam_input")?;

    let input = images_to_tensor::<B::InnerBackend>(&[image], size, device);
    let maps = model.valid().backbone.forward_maps(input);
    let [_, channels, height, width] = maps.dims();
    if channels == 0 || height == 0 || width == 0 {
        return Err(DuelError::Explainability(format!(
            "empty activation map {:?}",
            maps.dims()
        )));
    }

    let tracked = Tensor::<B, 4>::from_inner(maps.clone()).require_grad();
    let logit = model.binary_logits_from_maps(tracked.clone());
    let logit_value: f32 = logit.clone().inner().into_scalar().elem();

    let predicted = Authenticity::from_probability(sigmoid(logit_value));
    let score = match predicted {
        Authenticity::Real => logit,
        Authenticity::Fake => logit.neg(),
    };

    let grads = score.sum().backward();
    let grad = tracked
        .grad(&grads)
        .ok_or_else(|| DuelError::Explainability("no gradient reached the feature maps".into()))?;

    // Channel weights: spatial mean of the gradient
    let weights = grad.mean_dim(2).mean_dim(3);
    let cam = (maps * weights).sum_dim(1).clamp_min(0.0);
    let cam: Vec<f32> = cam.into_data().iter::<f32>().collect();

    if cam.iter().any(|v| !v.is_finite()) {
        return Err(DuelError::Explainability("non-finite activation map".into()));
    }

    let heatmap = upsample(&normalize(cam), width, height, size);
    let overlay = blend(&preprocessor.denormalize(image), &heatmap, size);

    std::fs::create_dir_all(out_dir)?;
    let path = overlay_path(out_dir, sample_index);
    overlay
        .save(&path)
        .map_err(|e| DuelError::Explainability(format!("cannot save {:?}: {}", path, e)))?;

    Ok(GradCamOutput {
        path,
        heatmap,
        predicted,
        probability: sigmoid(logit_value),
    })
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Scale to [0, 1] by the maximum; an all-zero map stays zero
fn normalize(mut cam: Vec<f32>) -> Vec<f32> {
    let max = cam.iter().cloned().fold(0.0f32, f32::max);
    if max > 0.0 {
        cam.iter_mut().for_each(|v| *v /= max);
    }
    cam
}

/// Bilinear resize of a `width x height` map to `size x size`
fn upsample(cam: &[f32], width: usize, height: usize, size: usize) -> Vec<f32> {
    let small = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let v = cam[y as usize * width + x as usize];
        Luma([(v * 255.0).round().clamp(0.0, 255.0) as u8])
    });
    let large = image::imageops::resize(&small, size as u32, size as u32, FilterType::Triangle);
    large.pixels().map(|p| p[0] as f32 / 255.0).collect()
}

/// Jet colormap: blue (0) to red (1)
pub fn jet(v: f32) -> [u8; 3] {
    let v = v.clamp(0.0, 1.0);
    let channel = |offset: f32| {
        let c = (1.5 - (4.0 * v - offset).abs()).clamp(0.0, 1.0);
        (c * 255.0).round() as u8
    };
    [channel(3.0), channel(2.0), channel(1.0)]
}

fn blend(original: &RgbImage, heatmap: &[f32], size: usize) -> RgbImage {
    RgbImage::from_fn(size as u32, size as u32, |x, y| {
        let heat = jet(heatmap[y as usize * size + x as usize]);
        let base = original.get_pixel(x, y);
        let mut px = [0u8; 3];
        for c in 0..3 {
            let v = (1.0 - OVERLAY_ALPHA) * base[c] as f32 + OVERLAY_ALPHA * heat[c] as f32;
            px[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(px)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DualHeadClassifierConfig;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn test_gradcam_writes_overlay() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let model = DualHeadClassifierConfig::new()
            .with_base_filters(4)
            .with_hidden_dim(8)
            .init::<TestBackend>(&device);

        let pre = Preprocessor::new(32, [0.5; 3], [0.5; 3]);
        let image: Vec<f32> = (0..pre.tensor_len())
            .map(|i| ((i % 17) as f32 / 8.0) - 1.0)
            .collect();

        let out_dir = dir.path().join("gradcam_outputs");
        let output = grad_cam(&model, &image, &pre, 10, &out_dir, &device).unwrap();

        assert!(output.path.ends_with("sample_10_real_fake.png"));
        assert!(output.path.is_file());
        assert_eq!(output.heatmap.len(), 32 * 32);
        assert!(output.heatmap.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!((0.0..=1.0).contains(&output.probability));

        let saved = image::open(&output.path).unwrap();
        assert_eq!((saved.width(), saved.height()), (32, 32));
    }

    #[test]
    fn test_wrong_input_length_is_rejected() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let model = DualHeadClassifierConfig::new()
            .with_base_filters(4)
            .with_hidden_dim(8)
            .init::<TestBackend>(&device);
        let pre = Preprocessor::new(32, [0.5; 3], [0.5; 3]);

        let err = grad_cam(&model, &[0.0; 12], &pre, 0, dir.path(), &device).unwrap_err();
        assert!(matches!(err, DuelError::ShapeMismatch { .. }));
        assert!(!overlay_path(dir.path(), 0).exists());
    }

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet(0.0), [0, 0, 128]);
        assert_eq!(jet(1.0), [128, 0, 0]);
        assert_eq!(jet(0.5)[1], 255);
    }

    #[test]
    fn test_normalize_handles_zero_map() {
        assert_eq!(normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
        assert_eq!(normalize(vec![1.0, 2.0]), vec![0.5, 1.0]);
    }
}
