//! Run Configuration
//!
//! `TrainingConfig` carries every externally overridable setting of a run:
//! preprocessing, data loading, optimizer, architecture and TTA. It is
//! loaded from / saved to JSON and checked with [`TrainingConfig::validate`]
//! before any work starts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::dual_head::DualHeadClassifierConfig;
use crate::dataset::preprocess::{Preprocessor, DEFAULT_MEAN, DEFAULT_STD};
use crate::dataset::{KNOWN_CLASS_COUNTS, NUM_DOMAIN_CLASSES};
use crate::utils::error::{DuelError, Result};
use crate::IMAGE_SIZE;

/// Training, preprocessing and inference settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Square input resolution
    pub image_size: usize,
    /// Per-channel normalization mean
    pub norm_mean: [f32; 3],
    /// Per-channel normalization scale
    pub norm_std: [f32; 3],
    pub batch_size: usize,
    /// Decode threads used to prepare each batch
    pub num_workers: usize,
    pub learning_rate: f64,
    /// AdamW decoupled weight decay
    pub weight_decay: f32,
    pub epochs: usize,
    /// Dropout rate inside both heads
    pub dropout: f64,
    /// Hidden width of both heads
    pub hidden_dim: usize,
    /// Width of the first backbone block
    pub base_filters: usize,
    /// Rotation applied by the third TTA view, degrees counter-clockwise
    pub tta_rotation_degrees: f32,
    /// Seed for weight init, dropout and shuffling
    pub seed: u64,
    /// Total samples per domain class used for loss weights, class-index order
    pub class_counts: [usize; NUM_DOMAIN_CLASSES],
    /// Drop undecodable images instead of aborting
    pub skip_corrupt: bool,
    /// Optional pretrained backbone record
    pub backbone_weights: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            image_size: IMAGE_SIZE,
            norm_mean: DEFAULT_MEAN,
            norm_std: DEFAULT_STD,
            batch_size: 32,
            num_workers: 4,
            learning_rate: 1e-4,
            weight_decay: 0.01,
            epochs: 10,
            dropout: 0.3,
            hidden_dim: 128,
            base_filters: 32,
            tta_rotation_degrees: 15.0,
            seed: 42,
            class_counts: KNOWN_CLASS_COUNTS,
            skip_corrupt: false,
            backbone_weights: None,
        }
    }
}

impl TrainingConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // The backbone halves the resolution four times
        if self.image_size < 16 {
            return Err(DuelError::Config(format!(
                "image_size must be at least 16, got {}",
                self.image_size
            )));
        }
        if self.norm_std.iter().any(|s| *s <= 0.0 || !s.is_finite()) {
            return Err(DuelError::Config(
                "norm_std values must be positive and finite".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(DuelError::Config("batch_size must be greater than 0".to_string()));
        }
        if self.num_workers == 0 {
            return Err(DuelError::Config("num_workers must be greater than 0".to_string()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(DuelError::Config("learning_rate must be positive".to_string()));
        }
        if self.weight_decay < 0.0 {
            return Err(DuelError::Config("weight_decay must be non-negative".to_string()));
        }
        if self.epochs == 0 {
            return Err(DuelError::Config("epochs must be greater than 0".to_string()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(DuelError::Config("dropout must be in range [0.0, 1.0)".to_string()));
        }
        if self.hidden_dim == 0 || self.base_filters == 0 {
            return Err(DuelError::Config(
                "hidden_dim and base_filters must be greater than 0".to_string(),
            ));
        }
        if self.class_counts.iter().any(|c| *c == 0) {
            return Err(DuelError::Config(format!(
                "class_counts must all be positive, got {:?}",
                self.class_counts
            )));
        }
        Ok(())
    }

    /// Architecture derived from this run's settings
    pub fn model_config(&self) -> DualHeadClassifierConfig {
        DualHeadClassifierConfig::new()
            .with_num_classes(NUM_DOMAIN_CLASSES)
            .with_base_filters(self.base_filters)
            .with_hidden_dim(self.hidden_dim)
            .with_dropout(self.dropout)
    }

    pub fn preprocessor(&self) -> Preprocessor {
        Preprocessor::new(self.image_size, self.norm_mean, self.norm_std)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file; missing fields take defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DuelError::MissingPath(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
