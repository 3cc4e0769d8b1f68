//! Test-time augmentation
//!
//! Every image is passed through the model once per augmentation. Sigmoid
//! probabilities of the binary head and raw class logits are averaged
//! arithmetically across views; the averaged probability is thresholded at
//! 0.5 and the averaged logits are reduced with argmax.

use burn::tensor::{activation::sigmoid, backend::Backend};
use serde::{Deserialize, Serialize};

use crate::dataset::burn_dataset::{check_image_len, images_to_tensor};
use crate::dataset::{Augmentation, Authenticity, DomainClass, TestItem, NUM_DOMAIN_CLASSES};
use crate::model::DualHeadClassifier;
use crate::utils::error::{DuelError, Result};
use crate::utils::records::PredictionRecord;

/// Averaged prediction for one test image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtaPrediction {
    pub id: String,
    /// Mean real-class probability across views
    pub p_real: f32,
    /// Mean class logits across views
    pub class_logits: [f32; NUM_DOMAIN_CLASSES],
    pub authenticity: Authenticity,
    pub class: DomainClass,
}

impl TtaPrediction {
    pub fn to_record(&self) -> PredictionRecord {
        PredictionRecord {
            image: self.id.clone(),
            label: self.authenticity.target(),
            class: self.class.name().to_string(),
        }
    }
}

/// Index of the largest value; ties resolve to the first index
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// Runs a read-only model over a fixed list of augmentations
pub struct TtaPredictor<B: Backend> {
    model: DualHeadClassifier<B>,
    augmentations: Vec<Augmentation>,
    image_size: usize,
    device: B::Device,
}

impl<B: Backend> TtaPredictor<B> {
    pub fn new(
        model: DualHeadClassifier<B>,
        augmentations: Vec<Augmentation>,
        image_size: usize,
        device: B::Device,
    ) -> Result<Self> {
        if augmentations.is_empty() {
            return Err(DuelError::Config("TTA needs at least one augmentation".into()));
        }

        Ok(Self {
            model,
            augmentations,
            image_size,
            device,
        })
    }

    pub fn augmentations(&self) -> &[Augmentation] {
        &self.augmentations
    }

    /// Predict a batch of test items, preserving their order
    pub fn predict(&self, items: &[TestItem]) -> Result<Vec<TtaPrediction>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        for item in items {
            check_image_len(&item.image, self.image_size, &item.id)?;
        }

        let n = items.len();
        let mut prob_sums = vec![0.0f32; n];
        let mut logit_sums = vec![[0.0f32; NUM_DOMAIN_CLASSES]; n];

        for augmentation in &self.augmentations {
            let views: Vec<Vec<f32>> = items
                .iter()
                .map(|item| augmentation.apply(&item.image, self.image_size))
                .collect();
            let views: Vec<&[f32]> = views.iter().map(|v| v.as_slice()).collect();
            let images = images_to_tensor::<B>(&views, self.image_size, &self.device);

            let output = self.model.forward(images);
            let probs: Vec<f32> = sigmoid(output.binary_logits)
                .into_data()
                .iter::<f32>()
                .collect();
            let logits: Vec<f32> = output.class_logits.into_data().iter::<f32>().collect();

            for i in 0..n {
                prob_sums[i] += probs[i];
                for c in 0..NUM_DOMAIN_CLASSES {
                    logit_sums[i][c] += logits[i * NUM_DOMAIN_CLASSES + c];
                }
            }
        }

        let views = self.augmentations.len() as f32;
        let predictions = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let p_real = prob_sums[i] / views;
                let class_logits = logit_sums[i].map(|v| v / views);
                let class = DomainClass::from_index(argmax(&class_logits))
                    .unwrap_or(DomainClass::HumanFaces);

                TtaPrediction {
                    id: item.id.clone(),
                    p_real,
                    class_logits,
                    authenticity: Authenticity::from_probability(p_real),
                    class,
                }
            })
            .collect();

        Ok(predictions)
    }
}
