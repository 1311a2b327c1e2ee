pub mod early_stopping;
pub mod history;
pub mod trainer;

pub use early_stopping::EarlyStopping;
pub use history::{EpochMetrics, PhaseHistory, TrainingHistory, TrainingPhase};
pub use trainer::Trainer;
