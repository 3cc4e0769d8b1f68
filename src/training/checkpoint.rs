//! Model checkpointing
//!
//! A checkpoint is a pair of files sharing one stem:
//!
//! - `<stem>.mpk`: the Burn module record (full precision)
//! - `<stem>.json`: metadata needed to rebuild the model and its preprocessing
//!
//! Loading validates both the recorded and the actually loaded parameter
//! shapes against the architecture the caller expects.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::Preprocessor;
use crate::model::{DualHeadClassifier, DualHeadClassifierConfig};
use crate::utils::error::{DuelError, Result};

/// Stem of the lowest-validation-loss checkpoint
pub const BEST_CHECKPOINT: &str = "best_model";
/// Stem of the unconditional end-of-run checkpoint
pub const FINAL_CHECKPOINT: &str = "final_model";

const RECORD_EXTENSION: &str = "mpk";
const METADATA_EXTENSION: &str = "json";

/// Sidecar stored next to every model record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub model: DualHeadClassifierConfig,
    pub preprocessor: Preprocessor,
    /// 1-based epoch the parameters were taken from
    pub epoch: usize,
    pub val_loss: f64,
    pub timestamp: String,
    pub parameter_shapes: Vec<(String, Vec<usize>)>,
}

impl CheckpointMetadata {
    pub fn new<B: Backend>(
        model: &DualHeadClassifier<B>,
        model_config: &DualHeadClassifierConfig,
        preprocessor: &Preprocessor,
        epoch: usize,
        val_loss: f64,
    ) -> Self {
        Self {
            model: model_config.clone(),
            preprocessor: preprocessor.clone(),
            epoch,
            val_loss,
            timestamp: chrono::Utc::now().to_rfc3339(),
            parameter_shapes: model.parameter_shapes(),
        }
    }
}

/// Strip a trailing `.mpk` so both `dir/best_model` and `dir/best_model.mpk` work
pub fn checkpoint_stem(path: &Path) -> PathBuf {
    match path.extension() {
        Some(ext) if ext == RECORD_EXTENSION => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

pub fn record_path(stem: &Path) -> PathBuf {
    stem.with_extension(RECORD_EXTENSION)
}

pub fn metadata_path(stem: &Path) -> PathBuf {
    stem.with_extension(METADATA_EXTENSION)
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// Save model record and metadata, returning the record path
pub fn save_checkpoint<B: Backend>(
    model: &DualHeadClassifier<B>,
    stem: &Path,
    metadata: &CheckpointMetadata,
) -> Result<PathBuf> {
    let stem = checkpoint_stem(stem);
    if let Some(parent) = stem.parent() {
        fs::create_dir_all(parent)?;
    }

    model
        .clone()
        .save_file(stem.clone(), &recorder())
        .map_err(|e| DuelError::Serialization(format!("Failed to save model: {:?}", e)))?;

    let json = serde_json::to_string_pretty(metadata)?;
    fs::write(metadata_path(&stem), json)?;

    let path = record_path(&stem);
    info!(
        "Checkpoint saved to {:?} (epoch {}, val loss {:.4})",
        path, metadata.epoch, metadata.val_loss
    );
    Ok(path)
}

/// Read only the metadata sidecar
pub fn load_metadata(stem: &Path) -> Result<CheckpointMetadata> {
    let stem = checkpoint_stem(stem);
    let path = metadata_path(&stem);

    let json = fs::read_to_string(&path).map_err(|e| DuelError::CheckpointIncompatible {
        path: path.clone(),
        reason: format!("cannot read metadata: {}", e),
    })?;

    serde_json::from_str(&json).map_err(|e| DuelError::CheckpointIncompatible {
        path,
        reason: format!("invalid metadata: {}", e),
    })
}

/// Compare named shapes, reporting the first difference
pub fn verify_shapes(
    expected: &[(String, Vec<usize>)],
    found: &[(String, Vec<usize>)],
) -> Result<()> {
    for (name, expected_shape) in expected {
        let found_shape = found
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.clone())
            .unwrap_or_default();

        if &found_shape != expected_shape {
            return Err(DuelError::ShapeMismatch {
                name: name.clone(),
                expected: expected_shape.clone(),
                found: found_shape,
            });
        }
    }
    Ok(())
}

/// Load a checkpoint into a freshly built model
///
/// The architecture comes from `expected` when given, otherwise from the
/// sidecar. Returns the model together with its metadata.
pub fn load_checkpoint<B: Backend>(
    path: &Path,
    expected: Option<&DualHeadClassifierConfig>,
    device: &B::Device,
) -> Result<(DualHeadClassifier<B>, CheckpointMetadata)> {
    let stem = checkpoint_stem(path);
    let record = record_path(&stem);
    info!("Loading checkpoint from {:?}", record);

    if !record.is_file() {
        return Err(DuelError::CheckpointMissing(record));
    }

    let metadata = load_metadata(&stem)?;
    let config = expected.cloned().unwrap_or_else(|| metadata.model.clone());

    let model: DualHeadClassifier<B> = config.init(device);
    let expected_shapes = model.parameter_shapes();
    verify_shapes(&expected_shapes, &metadata.parameter_shapes)?;

    let model = model
        .load_file(stem.clone(), &recorder(), device)
        .map_err(|e| DuelError::CheckpointIncompatible {
            path: record.clone(),
            reason: format!("{:?}", e),
        })?;

    verify_shapes(&expected_shapes, &model.parameter_shapes())?;

    info!(
        "Checkpoint loaded (epoch {}, val loss {:.4})",
        metadata.epoch, metadata.val_loss
    );
    Ok((model, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn small_config() -> DualHeadClassifierConfig {
        DualHeadClassifierConfig::new()
            .with_base_filters(4)
            .with_hidden_dim(8)
    }

    fn save_small(dir: &Path, config: &DualHeadClassifierConfig) -> DualHeadClassifier<TestBackend> {
        let device = Default::default();
        let model = config.init::<TestBackend>(&device);
        let pre = Preprocessor::new(32, [0.5; 3], [0.5; 3]);
        let metadata = CheckpointMetadata::new(&model, config, &pre, 1, 0.75);
        save_checkpoint(&model, &dir.join(BEST_CHECKPOINT), &metadata).unwrap();
        model
    }

    #[test]
    fn test_round_trip_reproduces_outputs() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = small_config();
        let model = save_small(dir.path(), &config);

        assert!(dir.path().join("best_model.mpk").is_file());
        assert!(dir.path().join("best_model.json").is_file());

        let (loaded, metadata) =
            load_checkpoint::<TestBackend>(&dir.path().join("best_model.mpk"), None, &device)
                .unwrap();
        assert_eq!(metadata.epoch, 1);
        assert_eq!(metadata.preprocessor.image_size, 32);

        let input = Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device) * 0.3;
        let before = model.forward(input.clone());
        let after = loaded.forward(input);

        let a: Vec<f32> = before.binary_logits.into_data().iter::<f32>().collect();
        let b: Vec<f32> = after.binary_logits.into_data().iter::<f32>().collect();
        assert_eq!(a, b);

        let a: Vec<f32> = before.class_logits.into_data().iter::<f32>().collect();
        let b: Vec<f32> = after.class_logits.into_data().iter::<f32>().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_checkpoint() {
        let dir = TempDir::new().unwrap();
        let err = load_checkpoint::<TestBackend>(&dir.path().join("best_model"), None, &Default::default())
            .unwrap_err();
        assert!(matches!(err, DuelError::CheckpointMissing(_)));
    }

    #[test]
    fn test_architecture_mismatch_reports_shapes() {
        let dir = TempDir::new().unwrap();
        save_small(dir.path(), &small_config());

        let wider = small_config().with_hidden_dim(16);
        let err = load_checkpoint::<TestBackend>(
            &dir.path().join(BEST_CHECKPOINT),
            Some(&wider),
            &Default::default(),
        )
        .unwrap_err();

        match err {
            DuelError::ShapeMismatch {
                name,
                expected,
                found,
            } => {
                assert_eq!(name, "binary_head.fc1.weight");
                assert_eq!(expected, vec![32, 16]);
                assert_eq!(found, vec![32, 8]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unreadable_metadata_is_incompatible() {
        let dir = TempDir::new().unwrap();
        save_small(dir.path(), &small_config());
        fs::write(dir.path().join("best_model.json"), "{ not json").unwrap();

        let err = load_checkpoint::<TestBackend>(
            &dir.path().join(BEST_CHECKPOINT),
            None,
            &Default::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DuelError::CheckpointIncompatible { .. }));
    }

    #[test]
    fn test_checkpoint_stem() {
        assert_eq!(
            checkpoint_stem(Path::new("out/best_model.mpk")),
            PathBuf::from("out/best_model")
        );
        assert_eq!(
            checkpoint_stem(Path::new("out/final_model")),
            PathBuf::from("out/final_model")
        );
    }
}
