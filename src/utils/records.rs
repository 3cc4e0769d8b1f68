//! CSV outputs: the per-epoch training log and the prediction file

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::Result;
use super::metrics::EpochMetrics;

pub const TRAINING_LOG_HEADER: [&str; 7] = [
    "epoch",
    "train_loss",
    "val_loss",
    "train_acc_bin",
    "val_acc_bin",
    "train_acc_cls",
    "val_acc_cls",
];

pub const PREDICTION_HEADER: [&str; 3] = ["image", "label", "class"];

/// One row of `training_log.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based epoch
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
    pub train_acc_bin: f64,
    pub val_acc_bin: f64,
    pub train_acc_cls: f64,
    pub val_acc_cls: f64,
}

impl EpochRecord {
    pub fn new(epoch: usize, train: &EpochMetrics, val: &EpochMetrics) -> Self {
        Self {
            epoch,
            train_loss: train.loss,
            val_loss: val.loss,
            train_acc_bin: train.acc_bin,
            val_acc_bin: val.acc_bin,
            train_acc_cls: train.acc_cls,
            val_acc_cls: val.acc_cls,
        }
    }
}

/// Append-only training log, truncated when opened
pub struct TrainingLogWriter {
    writer: csv::Writer<File>,
    path: PathBuf,
}

impl TrainingLogWriter {
    /// Create (or truncate) the log and write the header row
    pub fn create(path: &Path) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        writer.write_record(TRAINING_LOG_HEADER)?;
        writer.flush()?;

        Ok(Self {
            writer,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one epoch row and flush it to disk
    pub fn append(&mut self, record: &EpochRecord) -> Result<()> {
        self.writer.serialize(record)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// One row of the prediction file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Test image file name
    pub image: String,
    /// 1 = real, 0 = fake
    pub label: u8,
    /// Canonical domain class name
    pub class: String,
}

/// Write all predictions with the `image,label,class` header
pub fn write_predictions(path: &Path, records: &[PredictionRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(PREDICTION_HEADER)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}
