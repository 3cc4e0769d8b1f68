//! Deepfake Duel CLI
//!
//! Entry point for training the dual-head real/fake and domain classifier,
//! predicting an unlabeled test folder, rendering Grad-CAM overlays and
//! inspecting dataset statistics.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use deepfake_duel::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use deepfake_duel::explain::grad_cam;
use deepfake_duel::inference::{run_prediction, PREDICTIONS_FILE};
use deepfake_duel::training::{load_checkpoint, run_training, TrainOptions};
use deepfake_duel::utils::format_duration;
use deepfake_duel::utils::logging::{init_logging, LogConfig, LogLevel};
use deepfake_duel::{ArtifactIndex, TrainingConfig};

/// Deepfake Duel: real/fake and domain classification
#[derive(Parser, Debug)]
#[command(name = "deepfake_duel")]
#[command(version = deepfake_duel::VERSION)]
#[command(about = "Multi-task deepfake classification with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error); overrides --verbose
    #[arg(long)]
    log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Overrides applied on top of the default or file configuration
#[derive(Args, Debug, Default)]
struct ConfigOverrides {
    /// JSON configuration file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Square input resolution
    #[arg(long)]
    image_size: Option<usize>,

    /// Batch size
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Decode worker threads
    #[arg(long)]
    num_workers: Option<usize>,

    /// Learning rate
    #[arg(short, long)]
    learning_rate: Option<f64>,

    /// AdamW weight decay
    #[arg(long)]
    weight_decay: Option<f32>,

    /// Number of training epochs
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Dropout rate inside both heads
    #[arg(long)]
    dropout: Option<f64>,

    /// Hidden width of both heads
    #[arg(long)]
    hidden_dim: Option<usize>,

    /// Width of the first backbone block
    #[arg(long)]
    base_filters: Option<usize>,

    /// Rotation of the third TTA view in degrees
    #[arg(long)]
    tta_rotation: Option<f32>,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Skip undecodable images instead of aborting
    #[arg(long, default_value = "false")]
    skip_corrupt: bool,

    /// Pretrained backbone record to start from
    #[arg(long)]
    backbone_weights: Option<PathBuf>,
}

impl ConfigOverrides {
    fn resolve(&self) -> Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)
                .with_context(|| format!("Failed to read config {:?}", path))?,
            None => TrainingConfig::default(),
        };

        if let Some(v) = self.image_size {
            config.image_size = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.num_workers {
            config.num_workers = v;
        }
        if let Some(v) = self.learning_rate {
            config.learning_rate = v;
        }
        if let Some(v) = self.weight_decay {
            config.weight_decay = v;
        }
        if let Some(v) = self.epochs {
            config.epochs = v;
        }
        if let Some(v) = self.dropout {
            config.dropout = v;
        }
        if let Some(v) = self.hidden_dim {
            config.hidden_dim = v;
        }
        if let Some(v) = self.base_filters {
            config.base_filters = v;
        }
        if let Some(v) = self.tta_rotation {
            config.tta_rotation_degrees = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if self.skip_corrupt {
            config.skip_corrupt = true;
        }
        if let Some(path) = &self.backbone_weights {
            config.backbone_weights = Some(path.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train on {data_dir}/train and validate on {data_dir}/validation
    Train {
        /// Dataset root containing train/ and validation/
        #[arg(short, long, default_value = "data/artifact")]
        data_dir: PathBuf,

        /// Output directory for checkpoints and logs
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        /// Render Grad-CAM for this validation sample after training
        #[arg(long)]
        gradcam_index: Option<usize>,

        /// Derive class weights from the training split instead of known totals
        #[arg(long, default_value = "false")]
        weights_from_data: bool,

        #[command(flatten)]
        overrides: ConfigOverrides,
    },

    /// Predict an unlabeled test folder with test-time augmentation
    Predict {
        /// Dataset root; images are read from {data_dir}/test
        #[arg(short, long, default_value = "data/artifact")]
        data_dir: PathBuf,

        /// Test folder, overrides {data_dir}/test
        #[arg(long)]
        test_dir: Option<PathBuf>,

        /// Checkpoint to load
        #[arg(short, long, default_value = "output/best_model.mpk")]
        checkpoint: PathBuf,

        /// Prediction CSV
        #[arg(long, default_value = PREDICTIONS_FILE)]
        output: PathBuf,

        #[command(flatten)]
        overrides: ConfigOverrides,
    },

    /// Render a Grad-CAM overlay for one labeled sample
    Gradcam {
        /// Dataset root
        #[arg(short, long, default_value = "data/artifact")]
        data_dir: PathBuf,

        /// Labeled split to draw the sample from
        #[arg(long, default_value = "validation")]
        split: String,

        /// Sample index within the split
        #[arg(short, long, default_value = "0")]
        index: usize,

        /// Checkpoint to load
        #[arg(short, long, default_value = "output/best_model.mpk")]
        checkpoint: PathBuf,

        /// Directory for overlay images
        #[arg(short, long, default_value = "gradcam_outputs")]
        output_dir: PathBuf,
    },

    /// Show per-split sample counts
    Stats {
        /// Dataset root
        #[arg(short, long, default_value = "data/artifact")]
        data_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    if let Some(level) = &cli.log_level {
        log_config.level = LogLevel::parse(level);
    }

    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Train {
            data_dir,
            output_dir,
            gradcam_index,
            weights_from_data,
            overrides,
        } => {
            let config = overrides.resolve()?;
            let options = TrainOptions {
                gradcam_index,
                weights_from_data,
            };
            cmd_train(&config, &data_dir, &output_dir, &options)?;
        }

        Commands::Predict {
            data_dir,
            test_dir,
            checkpoint,
            output,
            overrides,
        } => {
            let config = overrides.resolve()?;
            let test_dir = test_dir.unwrap_or_else(|| data_dir.join("test"));
            cmd_predict(&config, &test_dir, &checkpoint, &output)?;
        }

        Commands::Gradcam {
            data_dir,
            split,
            index,
            checkpoint,
            output_dir,
        } => {
            cmd_gradcam(&data_dir, &split, index, &checkpoint, &output_dir)?;
        }

        Commands::Stats { data_dir } => {
            cmd_stats(&data_dir)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +--------------------------------------------------+
 |   Deepfake Duel                                  |
 |   Real/fake and domain classification with Burn  |
 +--------------------------------------------------+
  "#
        .green()
    );
    println!("  Backend: {}", backend_name().cyan());
    println!();
}

fn cmd_train(
    config: &TrainingConfig,
    data_dir: &Path,
    output_dir: &Path,
    options: &TrainOptions,
) -> Result<()> {
    info!("Training from {:?} into {:?}", data_dir, output_dir);
    let start = std::time::Instant::now();

    let summary = run_training::<TrainingBackend>(
        config,
        data_dir,
        output_dir,
        options,
        default_device(),
    )?;

    println!();
    match summary.best_epoch {
        Some(epoch) => println!(
            "  Best epoch:       {} (val loss {:.4})",
            epoch.to_string().green(),
            summary.best_val_loss
        ),
        None => println!("  {}", "No finite validation loss was recorded".yellow()),
    }
    if let Some(path) = &summary.best_checkpoint {
        println!("  Best checkpoint:  {:?}", path);
    }
    println!("  Final checkpoint: {:?}", summary.final_checkpoint);
    println!("  Training log:     {:?}", summary.training_log);
    if let Some(path) = &summary.gradcam {
        println!("  Grad-CAM:         {:?}", path);
    }
    println!(
        "  Elapsed:          {}",
        format_duration(start.elapsed().as_secs_f64())
    );

    Ok(())
}

fn cmd_predict(
    config: &TrainingConfig,
    test_dir: &Path,
    checkpoint: &Path,
    output: &Path,
) -> Result<()> {
    info!("Predicting {:?} with {:?}", test_dir, checkpoint);

    let records = run_prediction::<DefaultBackend>(
        test_dir,
        checkpoint,
        output,
        config,
        None,
        default_device(),
    )?;

    let real = records.iter().filter(|r| r.label == 1).count();
    println!(
        "{} {} predictions written to {:?} ({} real, {} fake)",
        "Done:".green().bold(),
        records.len(),
        output,
        real,
        records.len() - real
    );

    Ok(())
}

fn cmd_gradcam(
    data_dir: &Path,
    split: &str,
    index: usize,
    checkpoint: &Path,
    output_dir: &Path,
) -> Result<()> {
    let device = default_device();
    let (model, metadata) = load_checkpoint::<TrainingBackend>(checkpoint, None, &device)?;

    let split_dir = data_dir.join(split);
    let dataset = ArtifactIndex::new(&split_dir, metadata.preprocessor.clone())?;
    if index >= dataset.len() {
        bail!(
            "Sample index {} out of range: {:?} has {} samples",
            index,
            split_dir,
            dataset.len()
        );
    }

    let item = dataset.get(index)?;
    let output = grad_cam(
        &model,
        &item.image,
        &metadata.preprocessor,
        index,
        output_dir,
        &device,
    )?;

    println!(
        "{} {:?} (predicted {}, p_real {:.3}, label {})",
        "Saved:".green().bold(),
        output.path,
        output.predicted,
        output.probability,
        item.authenticity
    );

    Ok(())
}

fn cmd_stats(data_dir: &Path) -> Result<()> {
    info!("Computing dataset statistics for: {:?}", data_dir);

    if !data_dir.exists() {
        println!(
            "{} Dataset directory not found: {:?}",
            "Error:".red(),
            data_dir
        );
        println!();
        println!("{}", "Expected structure:".yellow());
        println!("  {}/", data_dir.display());
        println!("  +-- train/{{real,fake}}/{{human_faces,animals,vehicles}}/");
        println!("  +-- validation/{{real,fake}}/{{human_faces,animals,vehicles}}/");
        println!("  +-- test/");
        return Ok(());
    }

    let config = TrainingConfig::default();
    for split in ["train", "validation"] {
        let split_dir = data_dir.join(split);
        if !split_dir.exists() {
            println!("{} {} split not found", "Warning:".yellow(), split);
            continue;
        }
        println!("{}", format!("[{}]", split).cyan().bold());
        ArtifactIndex::new(&split_dir, config.preprocessor())?
            .stats()
            .print();
        println!();
    }

    let test_dir = data_dir.join("test");
    if test_dir.exists() {
        let test = deepfake_duel::TestIndex::new(&test_dir, config.preprocessor())?;
        println!("{} {} unlabeled images", "[test]".cyan().bold(), test.len());
    }

    Ok(())
}
