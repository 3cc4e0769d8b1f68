//! Training module: joint loss, epoch loop and checkpointing
//!
//! ## Objective
//!
//! `total = BCEWithLogits(binary) + weighted CE(class)`, with class weights
//! from the normalized inverse domain frequencies.
//!
//! ## Outputs
//!
//! - `training_log.csv`: one row per epoch
//! - `best_model.{mpk,json}`: lowest validation loss so far (strict)
//! - `final_model.{mpk,json}`: parameters after the last epoch

pub mod checkpoint;
pub mod loss;
pub mod trainer;

// Re-export main types for convenience
pub use checkpoint::{load_checkpoint, save_checkpoint, CheckpointMetadata};
pub use loss::{ClassWeights, JointLoss, LossBreakdown};
pub use trainer::{
    run_training, CheckpointWriter, TrainOptions, Trainer, TrainingState, TrainingSummary,
};
