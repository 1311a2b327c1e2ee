use crate::config::TrainingConfig;
use crate::dataset::{train_validation_split, Dataset};
use crate::image::ImageTransforms;
use crate::models::{to_input_tensor, DeepfakeClassifier};
use crate::training::early_stopping::EarlyStopping;
use crate::training::history::{EpochMetrics, PhaseHistory, TrainingHistory, TrainingPhase};
use crate::utils::error::DetectorError;
use crate::Result;
use candle_core::{DType, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use ndarray::{Array4, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::time::Instant;

/// Two-phase transfer-learning loop over one classifier.
///
/// Phase 1 trains the head on a frozen backbone; phase 2 unfreezes the last
/// `fine_tune_layers` backbone layers at a lower learning rate. Neither
/// phase saves the model.
pub struct Trainer<'a> {
    model: &'a DeepfakeClassifier,
    config: &'a TrainingConfig,
    transforms: ImageTransforms,
    rng: StdRng,
}

struct BatchOutcome {
    loss_sum: f32,
    correct: usize,
}

impl<'a> Trainer<'a> {
    pub fn new(model: &'a DeepfakeClassifier, config: &'a TrainingConfig) -> Self {
        Self {
            model,
            config,
            transforms: ImageTransforms::new(config.augmentation.clone(), config.seed.wrapping_add(1)),
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    /// Split, then feature extraction followed by fine-tuning
    pub fn fit(&mut self, dataset: &Dataset) -> Result<TrainingHistory> {
        self.config.validate()?;

        let (train_indices, val_indices) = train_validation_split(
            dataset.labels(),
            self.config.validation_split,
            self.config.seed,
            self.config.stratify,
        )?;
        let train = dataset.select(&train_indices);
        let validation = dataset.select(&val_indices);

        tracing::info!(
            "Training on {} images, validating on {} images",
            train.len(),
            validation.len()
        );

        let feature_extraction = self.feature_extraction(&train, &validation)?;

        tracing::info!("Starting fine-tuning phase...");
        let next_epoch = feature_extraction.next_epoch(0);
        let fine_tuning = self.fine_tune(&train, &validation, next_epoch)?;

        Ok(TrainingHistory {
            train_samples: train.len(),
            validation_samples: validation.len(),
            feature_extraction,
            fine_tuning,
        })
    }

    /// Phase 1: whole backbone frozen
    pub fn feature_extraction(&mut self, train: &Dataset, validation: &Dataset) -> Result<PhaseHistory> {
        self.run_phase(
            TrainingPhase::FeatureExtraction,
            train,
            validation,
            0,
            self.config.epochs,
            self.config.learning_rate,
            self.model.backbone_layers(),
        )
    }

    /// Phase 2: last `fine_tune_layers` backbone layers trainable, epoch
    /// numbering starting at `initial_epoch`
    pub fn fine_tune(
        &mut self,
        train: &Dataset,
        validation: &Dataset,
        initial_epoch: usize,
    ) -> Result<PhaseHistory> {
        let frozen_layers = self
            .model
            .backbone_layers()
            .saturating_sub(self.config.fine_tune_layers);

        tracing::info!(
            "Unfreezing backbone layers {}..{}",
            frozen_layers,
            self.model.backbone_layers()
        );

        self.run_phase(
            TrainingPhase::FineTuning,
            train,
            validation,
            initial_epoch,
            self.config.fine_tune_epochs,
            self.config.fine_tune_learning_rate,
            frozen_layers,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn run_phase(
        &mut self,
        phase: TrainingPhase,
        train: &Dataset,
        validation: &Dataset,
        initial_epoch: usize,
        epochs: usize,
        learning_rate: f64,
        frozen_layers: usize,
    ) -> Result<PhaseHistory> {
        let mut history = PhaseHistory::new(phase);
        if epochs == 0 {
            return Ok(history);
        }
        if train.is_empty() || validation.is_empty() {
            return Err(DetectorError::Training(format!(
                "Both partitions need images (train={}, validation={})",
                train.len(),
                validation.len()
            )));
        }

        let trainable = self.model.trainable_vars(frozen_layers)?;
        tracing::debug!("{:?}: {} trainable tensors", phase, trainable.len());

        let params = ParamsAdamW {
            lr: learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(trainable, params)?;

        // Snapshots cover every variable so batch-norm statistics roll back too
        let all_vars: Vec<_> = self
            .model
            .named_vars()?
            .into_iter()
            .map(|(_, var)| var)
            .collect();
        let mut early_stopping = EarlyStopping::new(self.config.patience);

        let mut order: Vec<usize> = (0..train.len()).collect();

        for epoch in initial_epoch..initial_epoch + epochs {
            let started = Instant::now();
            order.shuffle(&mut self.rng);

            let mut loss_sum = 0.0;
            let mut correct = 0;
            for batch in order.chunks(self.config.batch_size) {
                let outcome = self.train_step(&mut optimizer, train, batch, frozen_layers)?;
                loss_sum += outcome.loss_sum;
                correct += outcome.correct;
            }

            let (val_loss, val_accuracy) = self.evaluate(validation)?;
            let metrics = EpochMetrics {
                epoch,
                loss: loss_sum / train.len() as f32,
                accuracy: correct as f32 / train.len() as f32,
                val_loss,
                val_accuracy,
            };

            tracing::info!(
                "Epoch {}/{} - {:.1}s - loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4}",
                epoch + 1,
                initial_epoch + epochs,
                started.elapsed().as_secs_f32(),
                metrics.loss,
                metrics.accuracy,
                metrics.val_loss,
                metrics.val_accuracy
            );

            if !metrics.loss.is_finite() {
                return Err(DetectorError::Training(format!(
                    "Loss diverged at epoch {}",
                    epoch + 1
                )));
            }

            history.epochs.push(metrics);

            if early_stopping.on_epoch_end(epoch, val_loss, &all_vars)? {
                tracing::info!(
                    "Early stopping at epoch {}: val_loss has not improved on {:.4} since epoch {}",
                    epoch + 1,
                    early_stopping.best_loss(),
                    early_stopping.best_epoch().map(|e| e + 1).unwrap_or(0)
                );
                history.stopped_early = true;
                break;
            }
        }

        let last_epoch = history.epochs.last().map(|metrics| metrics.epoch);
        if early_stopping.best_epoch() != last_epoch {
            if let Some(best) = early_stopping.restore_best_weights()? {
                tracing::info!("Restored weights from epoch {}", best + 1);
            }
        }
        history.best_epoch = early_stopping.best_epoch();

        Ok(history)
    }

    fn train_step(
        &mut self,
        optimizer: &mut AdamW,
        train: &Dataset,
        batch: &[usize],
        frozen_layers: usize,
    ) -> Result<BatchOutcome> {
        let mut augmented = Vec::with_capacity(batch.len());
        for &index in batch {
            augmented.push(self.transforms.augment(train.image(index)));
        }
        let views: Vec<ArrayView3<f32>> = augmented.iter().map(|image| image.view()).collect();
        let images = ndarray::stack(Axis(0), &views)?;

        let xs = to_input_tensor(&images, self.model.device())?;
        let ys = self.label_tensor(train, batch)?;

        let logits = self.model.forward_t(&xs, true, frozen_layers)?;
        let loss = binary_cross_entropy_with_logits(&logits, &ys)?
            .add(&self.model.regularization_loss()?)?;
        optimizer.backward_step(&loss)?;

        Ok(BatchOutcome {
            loss_sum: loss.to_scalar::<f32>()? * batch.len() as f32,
            correct: count_correct(&logits, &ys)?,
        })
    }

    /// Validation loss (with L2 penalty) and accuracy, inference mode
    pub fn evaluate(&self, data: &Dataset) -> Result<(f32, f32)> {
        if data.is_empty() {
            return Err(DetectorError::Training("Cannot evaluate on no images".to_string()));
        }

        let frozen_layers = self.model.backbone_layers();
        let indices: Vec<usize> = (0..data.len()).collect();

        let mut loss_sum = 0.0;
        let mut correct = 0;
        for batch in indices.chunks(self.config.batch_size) {
            let images: Array4<f32> = data.images().select(Axis(0), batch);
            let xs = to_input_tensor(&images, self.model.device())?;
            let ys = self.label_tensor(data, batch)?;

            let logits = self.model.forward_t(&xs, false, frozen_layers)?;
            let loss = binary_cross_entropy_with_logits(&logits, &ys)?;
            loss_sum += loss.to_scalar::<f32>()? * batch.len() as f32;
            correct += count_correct(&logits, &ys)?;
        }

        let penalty = self.model.regularization_loss()?.to_scalar::<f32>()?;
        Ok((
            loss_sum / data.len() as f32 + penalty,
            correct as f32 / data.len() as f32,
        ))
    }

    fn label_tensor(&self, data: &Dataset, batch: &[usize]) -> Result<Tensor> {
        let labels: Vec<f32> = batch.iter().map(|&index| data.labels()[index]).collect();
        Ok(Tensor::from_vec(labels, (batch.len(), 1), self.model.device())?)
    }
}

/// Mean of `max(x, 0) - x * y + ln(1 + e^-|x|)`, the stable form of
/// binary cross-entropy on logits
pub fn binary_cross_entropy_with_logits(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let softplus = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    let loss = logits
        .relu()?
        .sub(&logits.mul(targets)?)?
        .add(&softplus)?
        .mean_all()?;
    Ok(loss)
}

fn count_correct(logits: &Tensor, targets: &Tensor) -> Result<usize> {
    let predicted = logits.gt(0f32)?.to_dtype(DType::F32)?;
    let correct = predicted
        .eq(targets)?
        .to_dtype(DType::F32)?
        .sum_all()?
        .to_scalar::<f32>()?;
    Ok(correct as usize)
}
