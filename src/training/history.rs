use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPhase {
    /// Backbone frozen, head only
    FeatureExtraction,
    /// Trailing backbone layers unfrozen at a reduced learning rate
    FineTuning,
}

/// Metrics for one epoch. Losses include the L2 penalty.
#[derive(Debug, Clone, Serialize)]
pub struct EpochMetrics {
    /// Zero-based, continuous across phases
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub val_loss: f32,
    pub val_accuracy: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseHistory {
    pub phase: TrainingPhase,
    pub epochs: Vec<EpochMetrics>,
    /// Epoch whose weights the model holds after the phase
    pub best_epoch: Option<usize>,
    pub stopped_early: bool,
}

impl PhaseHistory {
    pub fn new(phase: TrainingPhase) -> Self {
        Self {
            phase,
            epochs: Vec::new(),
            best_epoch: None,
            stopped_early: false,
        }
    }

    pub fn epochs_run(&self) -> usize {
        self.epochs.len()
    }

    /// Epoch number the next phase starts from: one past the last epoch
    /// actually run, so a phase cut short by early stopping leaves no gap.
    /// Keras-style `initial_epoch=epochs` would instead use the configured
    /// count.
    pub fn next_epoch(&self, initial_epoch: usize) -> usize {
        self.epochs
            .last()
            .map(|metrics| metrics.epoch + 1)
            .unwrap_or(initial_epoch)
    }

    pub fn best(&self) -> Option<&EpochMetrics> {
        let best = self.best_epoch?;
        self.epochs.iter().find(|metrics| metrics.epoch == best)
    }
}

/// Loss/accuracy curves of both phases
#[derive(Debug, Clone, Serialize)]
pub struct TrainingHistory {
    pub train_samples: usize,
    pub validation_samples: usize,
    pub feature_extraction: PhaseHistory,
    pub fine_tuning: PhaseHistory,
}

impl TrainingHistory {
    pub fn all_epochs(&self) -> impl Iterator<Item = &EpochMetrics> {
        self.feature_extraction
            .epochs
            .iter()
            .chain(self.fine_tuning.epochs.iter())
    }
}
