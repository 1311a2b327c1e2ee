use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use deepfake_detector::{
    config::{AugmentationConfig, Config, DetectorConfig, ModelArchitecture, TrainingConfig},
    dataset::organize_speaker,
    web::serve,
    Detector, Prediction,
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "deepfake-detector")]
#[command(about = "Deepfake image detection with a fine-tuned MobileNetV2")]
struct Cli {
    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP prediction service
    Serve {
        /// Server bind address
        #[arg(long, default_value = "0.0.0.0:5000")]
        bind: String,

        /// Number of worker threads
        #[arg(long)]
        workers: Option<usize>,

        /// Directory for temporary uploads
        #[arg(long, default_value = "temp")]
        upload_dir: String,

        /// Enable development mode
        #[arg(long)]
        dev: bool,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Train on a real and a fake image directory, then save the model
    Train {
        real_dir: PathBuf,
        fake_dir: PathBuf,

        /// Where to save the trained model (defaults to --model-path)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write the training history as JSON
        #[arg(long)]
        history: Option<PathBuf>,

        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        training: TrainingArgs,
    },

    /// Classify images; prompts interactively when none are given
    Predict {
        images: Vec<PathBuf>,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Sort a DeepfakeTIMIT tree into real/fake folders for one speaker
    Organize {
        /// Directory holding one folder per speaker
        #[arg(long, default_value = "DeepfakeTIMIT/lower_quality")]
        base_dir: PathBuf,

        #[arg(long, default_value = "fadg0")]
        speaker: String,

        #[arg(long, default_value = "dataset/raw/real")]
        real_out: PathBuf,

        #[arg(long, default_value = "dataset/raw/fake")]
        fake_out: PathBuf,
    },
}

#[derive(Args)]
struct ModelArgs {
    /// Saved model, loaded when it exists
    #[arg(long, default_value = "models/deepfake_model.safetensors")]
    model_path: PathBuf,

    /// Pretrained MobileNetV2 weights for a fresh model
    #[arg(long)]
    backbone_weights: Option<PathBuf>,

    /// Decision threshold on the raw score
    #[arg(long, default_value_t = 0.5)]
    threshold: f32,

    /// Input resolution for a fresh model
    #[arg(long, default_value_t = 128)]
    input_size: usize,

    /// MobileNetV2 width multiplier for a fresh model
    #[arg(long, default_value_t = 1.0)]
    width_multiplier: f64,
}

impl ModelArgs {
    fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            model_path: self.model_path.clone(),
            backbone_weights: self.backbone_weights.clone(),
            threshold: self.threshold,
            architecture: ModelArchitecture {
                input_size: self.input_size,
                width_multiplier: self.width_multiplier,
                ..ModelArchitecture::default()
            },
        }
    }
}

#[derive(Args)]
struct TrainingArgs {
    #[arg(long, default_value_t = 10)]
    epochs: usize,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    #[arg(long, default_value_t = 0.2)]
    validation_split: f32,

    #[arg(long, default_value_t = 5)]
    fine_tune_epochs: usize,

    /// Trailing backbone layers unfrozen for fine-tuning
    #[arg(long, default_value_t = 20)]
    fine_tune_layers: usize,

    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f64,

    #[arg(long, default_value_t = 1e-5)]
    fine_tune_learning_rate: f64,

    #[arg(long, default_value_t = 3)]
    patience: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Plain random split instead of a stratified one
    #[arg(long)]
    no_stratify: bool,

    #[arg(long)]
    no_augmentation: bool,
}

impl From<&TrainingArgs> for TrainingConfig {
    fn from(args: &TrainingArgs) -> Self {
        TrainingConfig {
            epochs: args.epochs,
            batch_size: args.batch_size,
            validation_split: args.validation_split,
            fine_tune_epochs: args.fine_tune_epochs,
            fine_tune_layers: args.fine_tune_layers,
            learning_rate: args.learning_rate,
            fine_tune_learning_rate: args.fine_tune_learning_rate,
            patience: args.patience,
            seed: args.seed,
            stratify: !args.no_stratify,
            augmentation: if args.no_augmentation {
                AugmentationConfig::disabled()
            } else {
                AugmentationConfig::default()
            },
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Command::Serve {
            bind,
            workers,
            upload_dir,
            dev,
            model,
        } => {
            let config = Config::new(bind, upload_dir, workers, dev, model.detector_config())?;
            run_server(config)
        }
        Command::Train {
            real_dir,
            fake_dir,
            output,
            history,
            model,
            training,
        } => run_training(
            &real_dir,
            &fake_dir,
            output,
            history,
            &model,
            &TrainingConfig::from(&training),
        ),
        Command::Predict { images, model } => run_predict(&images, &model),
        Command::Organize {
            base_dir,
            speaker,
            real_out,
            fake_out,
        } => {
            let summary = organize_speaker(&base_dir, &speaker, &real_out, &fake_out)?;
            println!(
                "Copied {} real and {} fake videos for {}",
                summary.real_videos, summary.fake_videos, speaker
            );
            Ok(())
        }
    }
}

fn run_server(config: Config) -> Result<()> {
    tracing::info!("Starting deepfake detection service...");
    tracing::info!("Bind address: {}", config.bind_addr);
    tracing::info!("Model path: {}", config.detector.model_path.display());

    let detector = Detector::new(&config.detector).context("Failed to initialise detector")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()?;

    runtime.block_on(serve(config, Arc::new(detector)))?;
    Ok(())
}

fn run_training(
    real_dir: &Path,
    fake_dir: &Path,
    output: Option<PathBuf>,
    history_path: Option<PathBuf>,
    model: &ModelArgs,
    training: &TrainingConfig,
) -> Result<()> {
    let mut detector = Detector::new(&model.detector_config())?;
    let history = detector
        .train(real_dir, fake_dir, training)
        .context("Training failed")?;

    let output = output.unwrap_or_else(|| model.model_path.clone());
    detector.save_model(&output)?;

    if let Some(path) = history_path {
        std::fs::write(&path, serde_json::to_string_pretty(&history)?)
            .with_context(|| format!("Failed to write history to {}", path.display()))?;
        tracing::info!("Training history written to {}", path.display());
    }

    if let Some(best) = history
        .fine_tuning
        .best()
        .or_else(|| history.feature_extraction.best())
    {
        println!(
            "Best epoch {}: val_loss {:.4}, val_accuracy {:.4}",
            best.epoch + 1,
            best.val_loss,
            best.val_accuracy
        );
    }
    println!("Model saved to {}", output.display());
    Ok(())
}

fn run_predict(images: &[PathBuf], model: &ModelArgs) -> Result<()> {
    let detector = Detector::new(&model.detector_config())?;

    if !images.is_empty() {
        for path in images {
            print_prediction(path, detector.predict(path));
        }
        return Ok(());
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("Enter image path (or 'q' to quit): ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let input = line.trim();
        if input.eq_ignore_ascii_case("q") {
            break;
        }
        if input.is_empty() {
            continue;
        }

        let path = Path::new(input);
        print_prediction(path, detector.predict(path));
    }
    Ok(())
}

fn print_prediction(path: &Path, prediction: Option<Prediction>) {
    match prediction {
        Some(p) => println!(
            "{}: {} (confidence {:.2}%, raw score {:.4})",
            path.display(),
            p.label(),
            p.confidence * 100.0,
            p.raw_score
        ),
        None => println!("{}: could not process image", path.display()),
    }
}
