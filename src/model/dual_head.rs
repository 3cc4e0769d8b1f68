//! Dual-head classifier
//!
//! A shared [`FeatureExtractor`] feeds two independent heads:
//!
//! - **binary head**: one logit per image, positive means real
//! - **class head**: three logits over human faces, animals, vehicles
//!
//! Each head is `Linear -> ReLU -> Dropout -> Linear`. Dropout is only
//! active under an autodiff backend; evaluation goes through
//! `AutodiffModule::valid()` and runs deterministically.

use burn::{
    config::Config,
    module::Module,
    nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu},
    tensor::{backend::Backend, Tensor},
};

use super::backbone::FeatureExtractor;

/// Architecture hyperparameters
#[derive(Config, Debug)]
pub struct DualHeadClassifierConfig {
    /// Number of domain classes
    #[config(default = "3")]
    pub num_classes: usize,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Width of the first backbone block; the last block has 8x this
    #[config(default = "32")]
    pub base_filters: usize,

    /// Hidden width of each head
    #[config(default = "128")]
    pub hidden_dim: usize,

    /// Dropout rate inside each head
    #[config(default = "0.3")]
    pub dropout: f64,
}

impl DualHeadClassifierConfig {
    /// Length of the shared feature vector
    pub fn feature_dim(&self) -> usize {
        self.base_filters * 8
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> DualHeadClassifier<B> {
        let backbone = FeatureExtractor::new(self.in_channels, self.base_filters, device);
        let feature_dim = backbone.feature_dim();

        DualHeadClassifier {
            backbone,
            binary_head: PredictionHead::new(feature_dim, self.hidden_dim, 1, self.dropout, device),
            class_head: PredictionHead::new(
                feature_dim,
                self.hidden_dim,
                self.num_classes,
                self.dropout,
                device,
            ),
        }
    }
}

/// `Linear -> ReLU -> Dropout -> Linear`
#[derive(Module, Debug)]
pub struct PredictionHead<B: Backend> {
    pub fc1: Linear<B>,
    pub activation: Relu,
    pub dropout: Dropout,
    pub fc2: Linear<B>,
}

impl<B: Backend> PredictionHead<B> {
    pub fn new(
        input_dim: usize,
        hidden_dim: usize,
        output_dim: usize,
        dropout: f64,
        device: &B::Device,
    ) -> Self {
        Self {
            fc1: LinearConfig::new(input_dim, hidden_dim).init(device),
            activation: Relu::new(),
            dropout: DropoutConfig::new(dropout).init(),
            fc2: LinearConfig::new(hidden_dim, output_dim).init(device),
        }
    }

    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.fc1.forward(features);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }

    /// Forward pass with dropout bypassed
    pub fn forward_deterministic(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.fc1.forward(features);
        let x = self.activation.forward(x);
        self.fc2.forward(x)
    }

    fn parameter_shapes(&self, prefix: &str) -> Vec<(String, Vec<usize>)> {
        vec![
            (format!("{prefix}.fc1.weight"), self.fc1.weight.val().dims().to_vec()),
            (format!("{prefix}.fc2.weight"), self.fc2.weight.val().dims().to_vec()),
        ]
    }
}

/// Outputs of one forward pass
#[derive(Debug, Clone)]
pub struct DualHeadOutput<B: Backend> {
    /// Real/fake logits `[N]`
    pub binary_logits: Tensor<B, 1>,
    /// Domain class logits `[N, num_classes]`
    pub class_logits: Tensor<B, 2>,
}

/// Multi-task real/fake and domain classifier
#[derive(Module, Debug)]
pub struct DualHeadClassifier<B: Backend> {
    pub backbone: FeatureExtractor<B>,
    pub binary_head: PredictionHead<B>,
    pub class_head: PredictionHead<B>,
}

impl<B: Backend> DualHeadClassifier<B> {
    /// Forward pass
    ///
    /// # Arguments
    /// * `images` - Input tensor of shape [batch_size, 3, height, width]
    pub fn forward(&self, images: Tensor<B, 4>) -> DualHeadOutput<B> {
        let features = self.backbone.forward(images);
        let [batch_size, _] = features.dims();

        let binary_logits = self
            .binary_head
            .forward(features.clone())
            .reshape([batch_size]);
        let class_logits = self.class_head.forward(features);

        DualHeadOutput {
            binary_logits,
            class_logits,
        }
    }

    /// Real/fake logits computed from last-block feature maps, without dropout
    pub fn binary_logits_from_maps(&self, maps: Tensor<B, 4>) -> Tensor<B, 1> {
        let features = self.backbone.pool(maps);
        let [batch_size, _] = features.dims();
        self.binary_head
            .forward_deterministic(features)
            .reshape([batch_size])
    }

    pub fn num_classes(&self) -> usize {
        self.class_head.fc2.weight.val().dims()[1]
    }

    /// Named weight shapes, used to validate loaded checkpoints
    pub fn parameter_shapes(&self) -> Vec<(String, Vec<usize>)> {
        let mut shapes = self.backbone.parameter_shapes();
        shapes.extend(self.binary_head.parameter_shapes("binary_head"));
        shapes.extend(self.class_head.parameter_shapes("class_head"));
        shapes
    }
}
