//! Shared convolutional feature extractor
//!
//! Four Conv-BN-ReLU-MaxPool blocks with doubling width, followed by global
//! average pooling. The spatial maps of the last block are exposed separately
//! so Grad-CAM can differentiate with respect to them.

use std::path::Path;

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{backend::Backend, Tensor},
};

use crate::utils::error::{DuelError, Result};

/// Conv2d, BatchNorm, ReLU and 2x2 max pooling
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }

    /// Weight shapes of the conv and batch-norm layers
    pub fn parameter_shapes(&self, prefix: &str) -> Vec<(String, Vec<usize>)> {
        vec![
            (format!("{prefix}.conv.weight"), self.conv.weight.val().dims().to_vec()),
            (format!("{prefix}.bn.gamma"), self.bn.gamma.val().dims().to_vec()),
        ]
    }
}

/// Backbone producing a pooled feature vector per image
#[derive(Module, Debug)]
pub struct FeatureExtractor<B: Backend> {
    pub conv1: ConvBlock<B>,
    pub conv2: ConvBlock<B>,
    pub conv3: ConvBlock<B>,
    pub conv4: ConvBlock<B>,
    pub global_pool: AdaptiveAvgPool2d,
    feature_dim: usize,
}

impl<B: Backend> FeatureExtractor<B> {
    /// Build a backbone with widths `base, 2*base, 4*base, 8*base`
    pub fn new(in_channels: usize, base_filters: usize, device: &B::Device) -> Self {
        let base = base_filters;

        // 224 -> 112 -> 56 -> 28 -> 14
        Self {
            conv1: ConvBlock::new(in_channels, base, device),
            conv2: ConvBlock::new(base, base * 2, device),
            conv3: ConvBlock::new(base * 2, base * 4, device),
            conv4: ConvBlock::new(base * 4, base * 8, device),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            feature_dim: base * 8,
        }
    }

    /// Length of the pooled feature vector
    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    /// Spatial maps of the last convolutional block, `[N, C, h, w]`
    pub fn forward_maps(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(x);
        let x = self.conv2.forward(x);
        let x = self.conv3.forward(x);
        self.conv4.forward(x)
    }

    /// Global average pool and flatten: `[N, C, h, w]` -> `[N, C]`
    pub fn pool(&self, maps: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.global_pool.forward(maps);
        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.pool(self.forward_maps(x))
    }

    /// Replace the randomly initialized weights with a saved backbone record
    pub fn load_weights(self, path: &Path, device: &B::Device) -> Result<Self> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        self.load_file(path.to_path_buf(), &recorder, device)
            .map_err(|e| DuelError::CheckpointIncompatible {
                path: path.to_path_buf(),
                reason: format!("{:?}", e),
            })
    }

    pub fn parameter_shapes(&self) -> Vec<(String, Vec<usize>)> {
        let mut shapes = Vec::new();
        for (name, block) in [
            ("backbone.conv1", &self.conv1),
            ("backbone.conv2", &self.conv2),
            ("backbone.conv3", &self.conv3),
            ("backbone.conv4", &self.conv4),
        ] {
            shapes.extend(block.parameter_shapes(name));
        }
        shapes
    }
}
