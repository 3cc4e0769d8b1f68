//! Inference module: test-time augmentation and batch prediction
//!
//! The TTA set is fixed and deterministic: identity, horizontal flip,
//! rotation by the configured angle, vertical flip.

pub mod predictor;
pub mod tta;

// Re-export main types for convenience
pub use predictor::run_prediction;
pub use tta::{argmax, TtaPrediction, TtaPredictor};

/// Default prediction file name
pub const PREDICTIONS_FILE: &str = "test.csv";
