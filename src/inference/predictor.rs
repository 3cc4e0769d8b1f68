//! Batch prediction over an unlabeled test folder
//!
//! Rebuilds the model and its preprocessing from a checkpoint, runs TTA over
//! the folder in file-name order and writes `image,label,class` rows.

use std::path::Path;

use burn::tensor::backend::Backend;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use super::tta::TtaPredictor;
use crate::dataset::{Augmentation, BatchLoader, TestIndex};
use crate::model::{DualHeadClassifierConfig, TrainingConfig};
use crate::training::checkpoint::load_checkpoint;
use crate::utils::error::Result;
use crate::utils::records::{write_predictions, PredictionRecord};

/// Predict every image in `test_dir` and write the result to `output`
///
/// Batch size, worker count, skip mode and the TTA rotation come from
/// `config`; image size and normalization come from the checkpoint.
pub fn run_prediction<B: Backend>(
    test_dir: &Path,
    checkpoint: &Path,
    output: &Path,
    config: &TrainingConfig,
    expected_model: Option<&DualHeadClassifierConfig>,
    device: B::Device,
) -> Result<Vec<PredictionRecord>> {
    config.validate()?;

    let (model, metadata) = load_checkpoint::<B>(checkpoint, expected_model, &device)?;
    let preprocessor = metadata.preprocessor;
    let image_size = preprocessor.image_size;

    let index = TestIndex::new(test_dir, preprocessor)?;
    let loader = BatchLoader::new(config.num_workers, config.skip_corrupt)?;
    let predictor = TtaPredictor::new(
        model,
        Augmentation::tta_set(config.tta_rotation_degrees),
        image_size,
        device,
    )?;

    info!(
        "Predicting {} images with {} TTA views",
        index.len(),
        predictor.augmentations().len()
    );

    let progress = ProgressBar::new(index.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("  predict [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let order: Vec<usize> = (0..index.len()).collect();
    let mut records = Vec::with_capacity(index.len());

    for chunk in order.chunks(config.batch_size) {
        let items = loader.load(chunk, |i| index.get(i))?;
        for prediction in predictor.predict(&items)? {
            records.push(prediction.to_record());
        }
        progress.inc(chunk.len() as u64);
    }
    progress.finish_and_clear();

    write_predictions(output, &records)?;
    info!("Wrote {} predictions to {:?}", records.len(), output);

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::loader::tests::create_test_image;
    use crate::dataset::Preprocessor;
    use crate::training::checkpoint::{save_checkpoint, CheckpointMetadata};
    use crate::utils::error::DuelError;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn save_tiny_checkpoint(dir: &Path) -> std::path::PathBuf {
        let device = Default::default();
        let config = DualHeadClassifierConfig::new()
            .with_base_filters(4)
            .with_hidden_dim(8);
        let model = config.init::<TestBackend>(&device);
        let pre = Preprocessor::new(16, [0.5; 3], [0.5; 3]);
        let metadata = CheckpointMetadata::new(&model, &config, &pre, 1, 1.0);
        save_checkpoint(&model, &dir.join("best_model"), &metadata).unwrap()
    }

    fn small_run_config() -> TrainingConfig {
        TrainingConfig {
            batch_size: 2,
            num_workers: 2,
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_prediction_file_order_and_values() {
        let work = TempDir::new().unwrap();
        let test_dir = work.path().join("test");
        std::fs::create_dir_all(&test_dir).unwrap();
        for (name, shade) in [("c.png", 200), ("a.png", 20), ("b.png", 110)] {
            create_test_image(&test_dir.join(name), shade);
        }

        let checkpoint = save_tiny_checkpoint(work.path());
        let output = work.path().join("test.csv");

        let records = run_prediction::<TestBackend>(
            &test_dir,
            &checkpoint,
            &output,
            &small_run_config(),
            None,
            Default::default(),
        )
        .unwrap();
        assert_eq!(records.len(), 3);

        let content = std::fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "image,label,class");

        let classes = ["human_faces", "animals", "vehicles"];
        for (line, expected) in lines[1..].iter().zip(["a.png", "b.png", "c.png"]) {
            let fields: Vec<&str> = line.split(',').collect();
            assert_eq!(fields.len(), 3);
            assert_eq!(fields[0], expected);
            assert!(fields[1] == "0" || fields[1] == "1");
            assert!(classes.contains(&fields[2]));
        }
    }

    #[test]
    fn test_missing_checkpoint_fails_before_output() {
        let work = TempDir::new().unwrap();
        let test_dir = work.path().join("test");
        std::fs::create_dir_all(&test_dir).unwrap();
        let output = work.path().join("test.csv");

        let err = run_prediction::<TestBackend>(
            &test_dir,
            &work.path().join("missing_model"),
            &output,
            &small_run_config(),
            None,
            Default::default(),
        )
        .unwrap_err();

        assert!(matches!(err, DuelError::CheckpointMissing(_)));
        assert!(!output.exists());
    }
}
