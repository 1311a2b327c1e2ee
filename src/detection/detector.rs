use crate::config::{DetectorConfig, TrainingConfig};
use crate::dataset::Dataset;
use crate::detection::Prediction;
use crate::image::ImagePreprocessor;
use crate::models::{load_checkpoint, save_checkpoint, select_device, to_input_tensor, DeepfakeClassifier};
use crate::training::{Trainer, TrainingHistory};
use crate::utils::error::DetectorError;
use crate::Result;
use candle_core::Device;
use ndarray::Array4;
use std::path::Path;
use std::time::Instant;

/// Owns the classifier and turns image files into predictions
pub struct Detector {
    model: DeepfakeClassifier,
    preprocessor: ImagePreprocessor,
    threshold: f32,
}

impl Detector {
    /// Load the saved model at `config.model_path` if present, otherwise
    /// build a fresh one (with pretrained backbone weights when configured)
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        Self::with_device(config, &select_device())
    }

    pub fn with_device(config: &DetectorConfig, device: &Device) -> Result<Self> {
        config.validate()?;

        let model = if config.model_path.exists() {
            load_checkpoint(&config.model_path, device)?
        } else {
            tracing::info!(
                "No saved model at {}, building a new one",
                config.model_path.display()
            );
            let model = DeepfakeClassifier::new(&config.architecture, device)?;
            match &config.backbone_weights {
                Some(path) if path.exists() => model.load_backbone_weights(path)?,
                Some(path) => tracing::warn!(
                    "Backbone weights {} not found, backbone is randomly initialised",
                    path.display()
                ),
                None => tracing::warn!("No backbone weights configured, backbone is randomly initialised"),
            }
            model
        };

        Ok(Self {
            preprocessor: ImagePreprocessor::new(model.architecture().input_size),
            model,
            threshold: config.threshold,
        })
    }

    pub fn model(&self) -> &DeepfakeClassifier {
        &self.model
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Decode, resize and normalise one image into a [1, H, W, 3] batch.
    /// Any failure is logged and reported as `None`.
    pub fn preprocess(&self, image_path: &Path) -> Option<Array4<f32>> {
        match self.preprocessor.load_batch(image_path) {
            Ok(batch) => Some(batch),
            Err(e) => {
                tracing::warn!(
                    "Error processing image {} [{}]: {}",
                    image_path.display(),
                    e.error_code(),
                    e
                );
                None
            }
        }
    }

    /// Classify one image file
    pub fn predict(&self, image_path: &Path) -> Option<Prediction> {
        let start_time = Instant::now();
        let batch = self.preprocess(image_path)?;

        let raw_score = match self.raw_score(&batch) {
            Ok(score) => score,
            Err(e) => {
                tracing::error!(
                    "Inference failed for {} [{}]: {}",
                    image_path.display(),
                    e.error_code(),
                    e
                );
                return None;
            }
        };

        let prediction = Prediction::from_raw_score(raw_score, self.threshold);
        tracing::debug!(
            "{}: {} ({:.4}) in {:.3}s",
            image_path.display(),
            prediction.label(),
            prediction.raw_score,
            start_time.elapsed().as_secs_f32()
        );
        Some(prediction)
    }

    fn raw_score(&self, batch: &Array4<f32>) -> Result<f32> {
        let xs = to_input_tensor(batch, self.model.device())?;
        let probs = self.model.predict_proba(&xs)?.flatten_all()?.to_vec1::<f32>()?;
        probs
            .first()
            .copied()
            .ok_or_else(|| DetectorError::Internal("Model returned no score".to_string()))
    }

    /// Labelled images from a real and a fake directory tree, at the model's
    /// input resolution
    pub fn load_dataset(&self, real_dir: &Path, fake_dir: &Path) -> Result<Dataset> {
        Dataset::load(real_dir, fake_dir, self.preprocessor.input_size())
    }

    /// Feature extraction followed by fine-tuning. The model is left holding
    /// the trained weights; nothing is saved.
    pub fn train(
        &mut self,
        real_dir: &Path,
        fake_dir: &Path,
        config: &TrainingConfig,
    ) -> Result<TrainingHistory> {
        config.validate()?;

        let dataset = self.load_dataset(real_dir, fake_dir)?;
        if dataset.len() < 2 {
            return Err(DetectorError::Training(format!(
                "Need at least two images to train, found {}",
                dataset.len()
            )));
        }

        self.train_on(&dataset, config)
    }

    pub fn train_on(&mut self, dataset: &Dataset, config: &TrainingConfig) -> Result<TrainingHistory> {
        let start_time = Instant::now();
        let history = Trainer::new(&self.model, config).fit(dataset)?;

        tracing::info!(
            "Training finished in {:.1}s ({} + {} epochs)",
            start_time.elapsed().as_secs_f32(),
            history.feature_extraction.epochs_run(),
            history.fine_tuning.epochs_run()
        );
        Ok(history)
    }

    pub fn save_model(&self, path: &Path) -> Result<()> {
        save_checkpoint(&self.model, path)
    }
}
