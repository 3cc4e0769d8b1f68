//! Model module for the dual-head classifier built with Burn
//!
//! This module provides:
//! - The shared convolutional feature extractor
//! - The dual-head (real/fake + domain) classifier
//! - Run configuration and hyperparameters

pub mod backbone;
pub mod config;
pub mod dual_head;

// Re-export main types for convenience
pub use backbone::{ConvBlock, FeatureExtractor};
pub use config::TrainingConfig;
pub use dual_head::{DualHeadClassifier, DualHeadClassifierConfig, DualHeadOutput, PredictionHead};
