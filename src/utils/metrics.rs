//! Per-task accuracy and loss accumulation
//!
//! Losses are weighted by batch size so the epoch loss is a per-sample mean
//! regardless of how the last batch is cut.

use burn::tensor::{activation::sigmoid, backend::Backend, ElementConversion, Int, Tensor};
use serde::{Deserialize, Serialize};

/// Number of samples whose thresholded sigmoid matches the binary target
pub fn binary_correct<B: Backend>(logits: Tensor<B, 1>, targets: Tensor<B, 1, Int>) -> usize {
    let predictions = sigmoid(logits).greater_elem(0.5).int();
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

/// Number of samples whose argmax logit matches the class target
pub fn class_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = logits.dims();
    let predictions = logits.argmax(1).reshape([batch_size]);
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

/// Loss and accuracies of one pass over a split
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub loss: f64,
    pub acc_bin: f64,
    pub acc_cls: f64,
}

/// Running sums over the batches of one epoch
#[derive(Debug, Clone, Default)]
pub struct RunningMetrics {
    loss_sum: f64,
    binary_correct: usize,
    class_correct: usize,
    samples: usize,
}

impl RunningMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one batch; `loss` is the batch mean
    pub fn update(&mut self, loss: f64, binary_correct: usize, class_correct: usize, batch_size: usize) {
        self.loss_sum += loss * batch_size as f64;
        self.binary_correct += binary_correct;
        self.class_correct += class_correct;
        self.samples += batch_size;
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn loss(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.loss_sum / self.samples as f64
        }
    }

    pub fn binary_accuracy(&self) -> f64 {
        ratio(self.binary_correct, self.samples)
    }

    pub fn class_accuracy(&self) -> f64 {
        ratio(self.class_correct, self.samples)
    }

    pub fn finish(&self) -> EpochMetrics {
        EpochMetrics {
            loss: self.loss(),
            acc_bin: self.binary_accuracy(),
            acc_cls: self.class_accuracy(),
        }
    }
}

fn ratio(correct: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_running_metrics_weight_by_batch_size() {
        let mut metrics = RunningMetrics::new();
        metrics.update(1.0, 3, 2, 4);
        metrics.update(4.0, 0, 1, 2);

        let epoch = metrics.finish();
        assert!((epoch.loss - 2.0).abs() < 1e-12);
        assert!((epoch.acc_bin - 0.5).abs() < 1e-12);
        assert!((epoch.acc_cls - 0.5).abs() < 1e-12);
        assert_eq!(metrics.samples(), 6);
    }

    #[test]
    fn test_empty_metrics() {
        let epoch = RunningMetrics::new().finish();
        assert_eq!(epoch, EpochMetrics::default());
    }

    #[test]
    fn test_binary_correct_thresholds_at_half() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 1>::from_floats([2.0, -1.0, 0.0, 0.5], &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([1, 0, 1, 0], &device);
        // sigmoid(0) = 0.5 counts as fake
        assert_eq!(binary_correct(logits, targets), 2);
    }

    #[test]
    fn test_class_correct_uses_argmax() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_floats(
            [[0.1, 0.9, 0.0], [2.0, 1.0, 0.0], [0.0, 0.0, 3.0]],
            &device,
        );
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([1, 1, 2], &device);
        assert_eq!(class_correct(logits, targets), 2);
    }
}
