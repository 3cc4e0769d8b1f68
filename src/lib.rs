//! # Deepfake Duel
//!
//! Multi-task image authenticity classification on the ArtiFact dataset,
//! built with the Burn framework.
//!
//! One shared convolutional backbone feeds two heads: a binary real/fake
//! logit and a three-way domain classifier (human faces, animals, vehicles).
//! Both heads train jointly under a summed loss, the class term weighted
//! against the dataset's domain imbalance.
//!
//! ## Modules
//!
//! - `dataset`: Indexing, preprocessing, batching and test-time augmentation
//! - `model`: Backbone, dual-head classifier and run configuration
//! - `training`: Joint loss, epoch loop and checkpointing
//! - `inference`: TTA prediction over a test folder
//! - `explain`: Grad-CAM heatmaps for the real/fake head
//! - `utils`: Logging, metrics, CSV records and errors
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::path::Path;
//!
//! use deepfake_duel::backend::{default_device, TrainingBackend};
//! use deepfake_duel::model::TrainingConfig;
//! use deepfake_duel::training::{run_training, TrainOptions};
//!
//! let config = TrainingConfig::default();
//! let summary = run_training::<TrainingBackend>(
//!     &config,
//!     Path::new("data/artifact"),
//!     Path::new("output"),
//!     &TrainOptions::default(),
//!     default_device(),
//! )?;
//! println!("best val loss: {:.4}", summary.best_val_loss);
//! ```

pub mod backend;
pub mod dataset;
pub mod explain;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::{ArtifactIndex, Authenticity, DomainClass, Preprocessor, TestIndex};
pub use explain::{grad_cam, GradCamOutput};
pub use inference::{run_prediction, TtaPrediction, TtaPredictor};
pub use model::{DualHeadClassifier, DualHeadClassifierConfig, DualHeadOutput, TrainingConfig};
pub use training::{run_training, JointLoss, Trainer, TrainingSummary};
pub use utils::error::{DuelError, Result};

/// Number of domain classes predicted by the class head
pub const NUM_CLASSES: usize = dataset::NUM_DOMAIN_CLASSES;

/// Default working resolution (square)
pub const IMAGE_SIZE: usize = 224;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
