//! Training/Evaluation Loop
//!
//! Each epoch trains on a freshly shuffled traversal of the training index,
//! then evaluates the validation index in fixed order on an immutable
//! `valid()` snapshot of the parameters. The best checkpoint is replaced only
//! on a strictly lower validation loss; a final checkpoint is always written
//! after the last epoch.

use std::path::{Path, PathBuf};

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, backend::Backend, ElementConversion},
};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::checkpoint::{
    save_checkpoint, CheckpointMetadata, BEST_CHECKPOINT, FINAL_CHECKPOINT,
};
use super::loss::{ClassWeights, JointLoss};
use crate::dataset::burn_dataset::shuffled_indices;
use crate::dataset::{ArtifactBatch, ArtifactBatcher, ArtifactIndex, BatchLoader, Preprocessor};
use crate::explain::grad_cam;
use crate::model::{DualHeadClassifier, DualHeadClassifierConfig, TrainingConfig};
use crate::utils::error::{DuelError, Result};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::{binary_correct, class_correct, EpochMetrics, RunningMetrics};
use crate::utils::records::{EpochRecord, TrainingLogWriter};

/// File name of the per-epoch CSV log inside the output directory
pub const TRAINING_LOG_FILE: &str = "training_log.csv";
/// File name of the effective run configuration
pub const CONFIG_FILE: &str = "config.json";
/// Directory for Grad-CAM overlays rendered after training
pub const GRADCAM_DIR: &str = "gradcam_outputs";

/// Mutable bookkeeping of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingState {
    /// Completed epochs
    pub epoch: usize,
    pub best_val_loss: f64,
    /// 1-based epoch of the best checkpoint
    pub best_epoch: Option<usize>,
    pub history: Vec<EpochRecord>,
}

impl Default for TrainingState {
    fn default() -> Self {
        Self {
            epoch: 0,
            best_val_loss: f64::INFINITY,
            best_epoch: None,
            history: Vec::new(),
        }
    }
}

impl TrainingState {
    /// Record a finished epoch; returns true when it set a new best
    pub fn record(&mut self, record: EpochRecord) -> bool {
        self.epoch = record.epoch;
        let improved = record.val_loss < self.best_val_loss;
        if improved {
            self.best_val_loss = record.val_loss;
            self.best_epoch = Some(record.epoch);
        }
        self.history.push(record);
        improved
    }
}

/// Extra switches for a training run
#[derive(Debug, Clone, Default)]
pub struct TrainOptions {
    /// Render Grad-CAM for this validation sample after training
    pub gradcam_index: Option<usize>,
    /// Derive class weights from the training index instead of known totals
    pub weights_from_data: bool,
}

/// Outcome of a completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub history: Vec<EpochRecord>,
    pub best_epoch: Option<usize>,
    pub best_val_loss: f64,
    pub best_checkpoint: Option<PathBuf>,
    pub final_checkpoint: PathBuf,
    pub training_log: PathBuf,
    pub gradcam: Option<PathBuf>,
}

/// Writes the best and final checkpoints of a run into one directory
pub struct CheckpointWriter {
    best_stem: PathBuf,
    final_stem: PathBuf,
    model_config: DualHeadClassifierConfig,
    preprocessor: Preprocessor,
}

impl CheckpointWriter {
    pub fn new(
        output_dir: &Path,
        model_config: DualHeadClassifierConfig,
        preprocessor: Preprocessor,
    ) -> Self {
        Self {
            best_stem: output_dir.join(BEST_CHECKPOINT),
            final_stem: output_dir.join(FINAL_CHECKPOINT),
            model_config,
            preprocessor,
        }
    }

    /// Record a finished epoch, saving `model` as best on strict improvement
    pub fn end_epoch<B: Backend>(
        &self,
        state: &mut TrainingState,
        record: EpochRecord,
        model: &DualHeadClassifier<B>,
    ) -> Result<Option<PathBuf>> {
        let (epoch, val_loss) = (record.epoch, record.val_loss);
        if !state.record(record) {
            return Ok(None);
        }

        let metadata =
            CheckpointMetadata::new(model, &self.model_config, &self.preprocessor, epoch, val_loss);
        save_checkpoint(model, &self.best_stem, &metadata).map(Some)
    }

    /// Save `model` unconditionally as the final checkpoint
    pub fn save_final<B: Backend>(
        &self,
        state: &TrainingState,
        model: &DualHeadClassifier<B>,
    ) -> Result<PathBuf> {
        let val_loss = state.history.last().map(|r| r.val_loss).unwrap_or(f64::NAN);
        let metadata = CheckpointMetadata::new(
            model,
            &self.model_config,
            &self.preprocessor,
            state.epoch,
            val_loss,
        );
        save_checkpoint(model, &self.final_stem, &metadata)
    }
}

/// Owns the trainable parameters and the optimizer for one run
pub struct Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<DualHeadClassifier<B>, B>,
{
    model: DualHeadClassifier<B>,
    optimizer: O,
    loss: JointLoss,
    batcher: ArtifactBatcher,
    learning_rate: f64,
    batch_size: usize,
    rng: ChaCha8Rng,
    device: B::Device,
    state: TrainingState,
}

impl<B, O> Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<DualHeadClassifier<B>, B>,
{
    pub fn new(
        model: DualHeadClassifier<B>,
        optimizer: O,
        loss: JointLoss,
        config: &TrainingConfig,
        device: B::Device,
    ) -> Self {
        Self {
            model,
            optimizer,
            loss,
            batcher: ArtifactBatcher::new(config.image_size),
            learning_rate: config.learning_rate,
            batch_size: config.batch_size,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            device,
            state: TrainingState::default(),
        }
    }

    pub fn model(&self) -> &DualHeadClassifier<B> {
        &self.model
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// One pass over a shuffled traversal of `index`, one update per batch
    ///
    /// `epoch` is 1-based and only used for reporting.
    pub fn train_epoch(
        &mut self,
        index: &ArtifactIndex,
        loader: &BatchLoader,
        epoch: usize,
    ) -> Result<EpochMetrics> {
        let order = shuffled_indices(index.len(), &mut self.rng);
        let num_batches = order.len().div_ceil(self.batch_size);
        let progress = progress_bar(num_batches, "train");
        let mut metrics = RunningMetrics::new();

        for (batch_idx, chunk) in order.chunks(self.batch_size).enumerate() {
            let items = loader.load(chunk, |i| index.get(i))?;
            if items.is_empty() {
                progress.inc(1);
                continue;
            }

            let batch: ArtifactBatch<B> = self.batcher.batch(items, &self.device);
            let batch_size = batch.len();

            let output = self.model.forward(batch.images);
            let parts = self.loss.forward(
                &output,
                batch.binary_targets.clone(),
                batch.class_targets.clone(),
            );

            let loss_value: f64 = parts.total.clone().into_scalar().elem();
            if !loss_value.is_finite() {
                progress.abandon();
                return Err(DuelError::NonFiniteLoss {
                    epoch,
                    batch: batch_idx + 1,
                });
            }

            metrics.update(
                loss_value,
                binary_correct(output.binary_logits.clone(), batch.binary_targets),
                class_correct(output.class_logits.clone(), batch.class_targets),
                batch_size,
            );

            let grads = parts.total.backward();
            let grads = GradientsParams::from_grads(grads, &self.model);
            self.model = self
                .optimizer
                .step(self.learning_rate, self.model.clone(), grads);

            progress.set_message(format!("loss {:.4}", metrics.loss()));
            progress.inc(1);
        }

        progress.finish_and_clear();
        Ok(metrics.finish())
    }

    /// Evaluate the current parameters without gradient tracking
    pub fn evaluate(
        &self,
        index: &ArtifactIndex,
        loader: &BatchLoader,
        epoch: usize,
    ) -> Result<EpochMetrics> {
        let model = self.model.valid();
        evaluate_model(
            &model,
            &self.loss,
            &self.batcher,
            index,
            loader,
            self.batch_size,
            epoch,
            &self.device,
        )
    }
}

/// Fixed-order evaluation of `model` over `index`
#[allow(clippy::too_many_arguments)]
pub fn evaluate_model<B: Backend>(
    model: &DualHeadClassifier<B>,
    loss: &JointLoss,
    batcher: &ArtifactBatcher,
    index: &ArtifactIndex,
    loader: &BatchLoader,
    batch_size: usize,
    epoch: usize,
    device: &B::Device,
) -> Result<EpochMetrics> {
    let order: Vec<usize> = (0..index.len()).collect();
    let mut metrics = RunningMetrics::new();

    for (batch_idx, chunk) in order.chunks(batch_size).enumerate() {
        let items = loader.load(chunk, |i| index.get(i))?;
        if items.is_empty() {
            continue;
        }

        let batch: ArtifactBatch<B> = batcher.batch(items, device);
        let size = batch.len();
        let output = model.forward(batch.images);
        let parts = loss.forward(
            &output,
            batch.binary_targets.clone(),
            batch.class_targets.clone(),
        );

        let loss_value: f64 = parts.total.into_scalar().elem();
        if !loss_value.is_finite() {
            return Err(DuelError::NonFiniteLoss {
                epoch,
                batch: batch_idx + 1,
            });
        }

        metrics.update(
            loss_value,
            binary_correct(output.binary_logits, batch.binary_targets),
            class_correct(output.class_logits, batch.class_targets),
            size,
        );
    }

    Ok(metrics.finish())
}

fn progress_bar(len: usize, label: &str) -> ProgressBar {
    let progress = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("  {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.set_prefix(label.to_string());
    progress
}

/// Train on `data_root/train`, validate on `data_root/validation`
///
/// Writes `training_log.csv`, `best_model.*`, `final_model.*` and
/// `config.json` into `output_dir`.
pub fn run_training<B: AutodiffBackend>(
    config: &TrainingConfig,
    data_root: &Path,
    output_dir: &Path,
    options: &TrainOptions,
    device: B::Device,
) -> Result<TrainingSummary> {
    config.validate()?;
    println!("{}", "Initializing Training...".green().bold());

    // Index both splits before touching the model
    let preprocessor = config.preprocessor();
    let train_index = ArtifactIndex::new(data_root.join("train"), preprocessor.clone())?;
    let val_index = ArtifactIndex::new(data_root.join("validation"), preprocessor.clone())?;

    if train_index.is_empty() {
        return Err(DuelError::Config(format!(
            "no training images under {:?}",
            train_index.root_dir()
        )));
    }
    if val_index.is_empty() {
        return Err(DuelError::Config(format!(
            "no validation images under {:?}",
            val_index.root_dir()
        )));
    }

    let mut config = config.clone();
    if options.weights_from_data {
        config.class_counts = train_index.class_counts();
        info!("Class weights derived from training counts {:?}", config.class_counts);
    }
    let class_weights = ClassWeights::from_counts(&config.class_counts)?;
    info!("Class weights: {:?}", class_weights.as_array());

    std::fs::create_dir_all(output_dir)?;
    config.save(&output_dir.join(CONFIG_FILE))?;

    println!("  Training samples:   {}", train_index.len());
    println!("  Validation samples: {}", val_index.len());
    println!("  Epochs:             {}", config.epochs);
    println!("  Batch size:         {}", config.batch_size);
    println!("  Learning rate:      {}", config.learning_rate);
    println!();

    B::seed(&device, config.seed);
    let model_config = config.model_config();
    let mut model: DualHeadClassifier<B> = model_config.init(&device);
    if let Some(weights) = &config.backbone_weights {
        info!("Loading backbone weights from {:?}", weights);
        model.backbone = model.backbone.load_weights(weights, &device)?;
    }

    let optimizer = AdamWConfig::new()
        .with_weight_decay(config.weight_decay)
        .init();
    let loader = BatchLoader::new(config.num_workers, config.skip_corrupt)?;
    let mut trainer = Trainer::new(model, optimizer, JointLoss::new(class_weights), &config, device);

    let log_path = output_dir.join(TRAINING_LOG_FILE);
    let mut log = TrainingLogWriter::create(&log_path)?;
    let mut logger = TrainingLogger::new(config.epochs);
    let checkpoints = CheckpointWriter::new(output_dir, model_config, preprocessor.clone());
    let mut best_checkpoint = None;

    for epoch in 0..config.epochs {
        logger.start_epoch(epoch);

        let train = trainer.train_epoch(&train_index, &loader, epoch + 1)?;
        let val = trainer.evaluate(&val_index, &loader, epoch + 1)?;
        debug!("epoch {} train {:?} val {:?}", epoch + 1, train, val);

        let record = EpochRecord::new(epoch + 1, &train, &val);
        log.append(&record)?;
        logger.end_epoch(train.loss, val.loss, val.acc_bin, val.acc_cls);

        if let Some(path) = checkpoints.end_epoch(&mut trainer.state, record, &trainer.model)? {
            best_checkpoint = Some(path);
            logger.log_new_best(val.loss);
        }
    }

    let final_checkpoint = checkpoints.save_final(trainer.state(), trainer.model())?;

    logger.log_complete(trainer.state().best_val_loss);

    let gradcam = options.gradcam_index.and_then(|index| {
        let out_dir = output_dir.join(GRADCAM_DIR);
        let result = val_index
            .get(index)
            .and_then(|item| {
                grad_cam(
                    trainer.model(),
                    &item.image,
                    &preprocessor,
                    index,
                    &out_dir,
                    trainer.device(),
                )
            });

        match result {
            Ok(output) => {
                info!("Grad-CAM saved to {:?}", output.path);
                Some(output.path)
            }
            Err(e) => {
                warn!("Grad-CAM failed for validation sample {}: {}", index, e);
                None
            }
        }
    });

    println!("{}", "Training Complete!".green().bold());

    let state = trainer.state();
    Ok(TrainingSummary {
        history: state.history.clone(),
        best_epoch: state.best_epoch,
        best_val_loss: state.best_val_loss,
        best_checkpoint,
        final_checkpoint,
        training_log: log_path,
        gradcam,
    })
}
