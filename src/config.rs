use crate::utils::error::DetectorError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub bind_addr: String,

    /// Directory for scoped upload files
    pub upload_dir: PathBuf,

    /// Number of worker threads
    pub workers: usize,

    /// Detector configuration
    pub detector: DetectorConfig,

    /// Server configuration
    pub server_config: ServerConfig,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Saved model; loaded instead of a fresh build when it exists
    pub model_path: PathBuf,

    /// Pretrained MobileNetV2 weights (torchvision parameter names)
    pub backbone_weights: Option<PathBuf>,

    /// Decision threshold applied to the raw score
    pub threshold: f32,

    /// Architecture used when building a fresh model
    pub architecture: ModelArchitecture,
}

/// Shape of the classifier. Stored alongside the weights so a saved model
/// is rebuilt exactly as it was trained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArchitecture {
    /// Square input resolution in pixels
    pub input_size: usize,

    /// MobileNetV2 width multiplier (alpha)
    pub width_multiplier: f64,

    pub hidden_units: usize,

    pub dropout: f32,

    /// L2 penalty on the hidden dense kernel
    pub l2_regularization: f64,
}

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Feature-extraction epochs
    pub epochs: usize,

    pub batch_size: usize,

    /// Fraction of the dataset held out for validation
    pub validation_split: f32,

    /// Fine-tuning epochs run after feature extraction
    pub fine_tune_epochs: usize,

    /// Number of trailing backbone layers unfrozen for fine-tuning
    pub fine_tune_layers: usize,

    pub learning_rate: f64,

    pub fine_tune_learning_rate: f64,

    /// Early stopping patience on validation loss
    pub patience: usize,

    /// Seed for the split, shuffling and augmentation
    pub seed: u64,

    /// Keep class proportions equal across the split
    pub stratify: bool,

    pub augmentation: AugmentationConfig,
}

#[derive(Debug, Clone)]
pub struct AugmentationConfig {
    pub horizontal_flip: bool,

    /// Max rotation as a fraction of a full turn
    pub rotation_factor: f32,

    /// Max zoom in or out as a fraction of the image size
    pub zoom_factor: f32,

    /// Contrast factor drawn from [1 - c, 1 + c]
    pub contrast_factor: f32,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Request timeout (seconds)
    pub request_timeout: u64,

    /// Maximum request body size (bytes)
    pub max_request_size: usize,
}

impl Default for ModelArchitecture {
    fn default() -> Self {
        Self {
            input_size: 128,
            width_multiplier: 1.0,
            hidden_units: 128,
            dropout: 0.5,
            l2_regularization: 0.01,
        }
    }
}

impl ModelArchitecture {
    pub fn validate(&self) -> Result<()> {
        if self.input_size < 32 {
            return Err(DetectorError::Config(format!(
                "Input size {} is too small, minimum 32",
                self.input_size
            )));
        }
        if self.width_multiplier <= 0.0 {
            return Err(DetectorError::Config(format!(
                "Width multiplier must be positive, got {}",
                self.width_multiplier
            )));
        }
        if self.hidden_units == 0 {
            return Err(DetectorError::Config("Hidden units must be non-zero".to_string()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(DetectorError::Config(format!(
                "Dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/deepfake_model.safetensors"),
            backbone_weights: None,
            threshold: 0.5,
            architecture: ModelArchitecture::default(),
        }
    }
}

impl DetectorConfig {
    /// Threshold in [0, 1] (NaN rejected) and a buildable architecture
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(DetectorError::Config(format!(
                "Threshold must be in [0, 1], got {}",
                self.threshold
            )));
        }
        self.architecture.validate()
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            validation_split: 0.2,
            fine_tune_epochs: 5,
            fine_tune_layers: 20,
            learning_rate: 1e-3,
            fine_tune_learning_rate: 1e-5,
            patience: 3,
            seed: 42,
            stratify: true,
            augmentation: AugmentationConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(DetectorError::Config("Batch size must be non-zero".to_string()));
        }
        if !(self.validation_split > 0.0 && self.validation_split < 1.0) {
            return Err(DetectorError::Config(format!(
                "Validation split must be in (0, 1), got {}",
                self.validation_split
            )));
        }
        Ok(())
    }
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip: true,
            rotation_factor: 0.2,
            zoom_factor: 0.2,
            contrast_factor: 0.2,
        }
    }
}

impl AugmentationConfig {
    /// Augmentation that leaves every image untouched
    pub fn disabled() -> Self {
        Self {
            horizontal_flip: false,
            rotation_factor: 0.0,
            zoom_factor: 0.0,
            contrast_factor: 0.0,
        }
    }
}

impl Config {
    pub fn new(
        bind_addr: String,
        upload_dir: String,
        workers: Option<usize>,
        dev_mode: bool,
        detector: DetectorConfig,
    ) -> Result<Self> {
        let workers = workers.unwrap_or_else(num_cpus::get).max(1);

        detector.validate()?;

        let server_config = ServerConfig {
            request_timeout: if dev_mode { 300 } else { 60 },
            max_request_size: 20 * 1024 * 1024, // 20MB
        };

        Ok(Self {
            bind_addr,
            upload_dir: PathBuf::from(upload_dir),
            workers,
            detector,
            server_config,
        })
    }
}
