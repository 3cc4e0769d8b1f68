//! Joint multi-task loss
//!
//! total = BCE-with-logits(binary) + class-weighted CE(class)
//!
//! Class weights are the normalized inverse of each domain's total sample
//! count, computed once per run.

use burn::tensor::{activation::log_softmax, backend::Backend, Int, Tensor, TensorData};

use crate::dataset::NUM_DOMAIN_CLASSES;
use crate::model::DualHeadOutput;
use crate::utils::error::{DuelError, Result};

/// Per-class cross-entropy weights, summing to 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassWeights {
    weights: [f32; NUM_DOMAIN_CLASSES],
}

impl ClassWeights {
    /// Normalized inverse frequency: `w_c = (1/n_c) / sum_k (1/n_k)`
    pub fn from_counts(counts: &[usize; NUM_DOMAIN_CLASSES]) -> Result<Self> {
        if let Some(pos) = counts.iter().position(|c| *c == 0) {
            return Err(DuelError::Config(format!(
                "cannot weight class {} with zero samples",
                pos
            )));
        }

        let inverse: Vec<f64> = counts.iter().map(|c| 1.0 / *c as f64).collect();
        let total: f64 = inverse.iter().sum();

        let mut weights = [0.0f32; NUM_DOMAIN_CLASSES];
        for (w, inv) in weights.iter_mut().zip(&inverse) {
            *w = (inv / total) as f32;
        }

        Ok(Self { weights })
    }

    pub fn as_array(&self) -> [f32; NUM_DOMAIN_CLASSES] {
        self.weights
    }

    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 1> {
        Tensor::from_floats(
            TensorData::new(self.weights.to_vec(), [NUM_DOMAIN_CLASSES]),
            device,
        )
    }
}

/// Mean logistic loss computed directly from logits
///
/// Uses `max(x, 0) - x * y + log(1 + exp(-|x|))`, which never overflows.
pub fn binary_cross_entropy_with_logits<B: Backend>(
    logits: Tensor<B, 1>,
    targets: Tensor<B, 1>,
) -> Tensor<B, 1> {
    let positive = logits.clone().clamp_min(0.0);
    let soft = logits.clone().abs().neg().exp().log1p();
    (positive - logits * targets + soft).mean()
}

/// Weighted cross-entropy with weighted-mean reduction
///
/// Each sample's negative log likelihood is scaled by its target class
/// weight; the sum is divided by the sum of those weights.
pub fn weighted_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
    class_weights: Tensor<B, 1>,
) -> Tensor<B, 1> {
    let [batch_size, _num_classes] = logits.dims();

    let log_probs = log_softmax(logits, 1);

    // Gather the log probabilities for the target classes
    let targets_2d = targets.clone().reshape([batch_size, 1]);
    let nll = log_probs.gather(1, targets_2d).reshape([batch_size]).neg();

    let sample_weights = class_weights.select(0, targets);
    let weighted = (nll * sample_weights.clone()).sum();
    weighted / sample_weights.sum()
}

/// Loss terms of one forward pass, each of shape `[1]`
#[derive(Debug, Clone)]
pub struct LossBreakdown<B: Backend> {
    pub binary: Tensor<B, 1>,
    pub class: Tensor<B, 1>,
    pub total: Tensor<B, 1>,
}

/// Sum of the binary and weighted class objectives
#[derive(Debug, Clone)]
pub struct JointLoss {
    class_weights: ClassWeights,
}

impl JointLoss {
    pub fn new(class_weights: ClassWeights) -> Self {
        Self { class_weights }
    }

    pub fn class_weights(&self) -> &ClassWeights {
        &self.class_weights
    }

    pub fn forward<B: Backend>(
        &self,
        output: &DualHeadOutput<B>,
        binary_targets: Tensor<B, 1, Int>,
        class_targets: Tensor<B, 1, Int>,
    ) -> LossBreakdown<B> {
        let device = output.binary_logits.device();

        let binary =
            binary_cross_entropy_with_logits(output.binary_logits.clone(), binary_targets.float());
        let class = weighted_cross_entropy(
            output.class_logits.clone(),
            class_targets,
            self.class_weights.to_tensor(&device),
        );
        let total = binary.clone() + class.clone();

        LossBreakdown {
            binary,
            class,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::KNOWN_CLASS_COUNTS;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn scalar(t: Tensor<TestBackend, 1>) -> f32 {
        t.into_data().iter::<f32>().next().unwrap()
    }

    #[test]
    fn test_class_weights_sum_to_one_and_favor_rare_classes() {
        let weights = ClassWeights::from_counts(&KNOWN_CLASS_COUNTS).unwrap().as_array();

        let sum: f32 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);

        // animals (25,200) > vehicles (58,798) > human_faces (84,000)
        assert!(weights[1] > weights[2]);
        assert!(weights[2] > weights[0]);
    }

    #[test]
    fn test_equal_counts_give_uniform_weights() {
        let weights = ClassWeights::from_counts(&[10, 10, 10]).unwrap().as_array();
        for w in weights {
            assert!((w - 1.0 / 3.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_zero_count_is_rejected() {
        assert!(ClassWeights::from_counts(&[10, 0, 10]).is_err());
    }

    #[test]
    fn test_bce_values() {
        let device = Default::default();

        let logits = Tensor::<TestBackend, 1>::from_floats([0.0, 0.0], &device);
        let targets = Tensor::<TestBackend, 1>::from_floats([1.0, 0.0], &device);
        let loss = scalar(binary_cross_entropy_with_logits(logits, targets));
        assert!((loss - std::f32::consts::LN_2).abs() < 1e-5);

        // Large logits stay finite
        let logits = Tensor::<TestBackend, 1>::from_floats([100.0, -100.0], &device);
        let targets = Tensor::<TestBackend, 1>::from_floats([0.0, 1.0], &device);
        let loss = scalar(binary_cross_entropy_with_logits(logits, targets));
        assert!(loss.is_finite());
        assert!((loss - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_weighted_cross_entropy_matches_manual() {
        let device = Default::default();
        let w = [0.2f32, 0.3, 0.5];

        let logits =
            Tensor::<TestBackend, 2>::from_floats([[2.0, 0.0, 0.0], [0.0, 1.0, 0.0]], &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 2], &device);
        let weights = Tensor::<TestBackend, 1>::from_floats(w, &device);

        let loss = scalar(weighted_cross_entropy(logits, targets, weights));

        let e = std::f32::consts::E;
        let nll0 = (e * e + 2.0).ln() - 2.0;
        let nll1 = (e + 2.0).ln();
        let expected = (w[0] * nll0 + w[2] * nll1) / (w[0] + w[2]);
        assert!((loss - expected).abs() < 1e-5);
    }

    #[test]
    fn test_uniform_logits_give_ln3_for_any_weights() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::zeros([4, 3], &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 1, 2, 1], &device);
        let weights = ClassWeights::from_counts(&KNOWN_CLASS_COUNTS)
            .unwrap()
            .to_tensor::<TestBackend>(&device);

        let loss = scalar(weighted_cross_entropy(logits, targets, weights));
        assert!((loss - 3.0f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_joint_loss_is_sum_of_terms() {
        let device = Default::default();
        let output = DualHeadOutput {
            binary_logits: Tensor::<TestBackend, 1>::from_floats([0.5, -1.0], &device),
            class_logits: Tensor::<TestBackend, 2>::from_floats(
                [[1.0, 0.0, -1.0], [0.0, 0.5, 0.0]],
                &device,
            ),
        };
        let loss = JointLoss::new(ClassWeights::from_counts(&KNOWN_CLASS_COUNTS).unwrap());
        let parts = loss.forward(
            &output,
            Tensor::<TestBackend, 1, Int>::from_ints([1, 0], &device),
            Tensor::<TestBackend, 1, Int>::from_ints([0, 1], &device),
        );

        let binary = scalar(parts.binary);
        let class = scalar(parts.class);
        let total = scalar(parts.total);
        assert!(binary > 0.0 && class > 0.0);
        assert!((total - (binary + class)).abs() < 1e-6);
    }
}
