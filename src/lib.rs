pub mod config;
pub mod dataset;
pub mod detection;
pub mod image;
pub mod models;
pub mod training;
pub mod utils;
pub mod web;

pub use config::{Config, DetectorConfig, TrainingConfig};
pub use detection::{Detector, Prediction, Predictor};
pub use training::TrainingHistory;
pub use utils::error::DetectorError;

pub type Result<T> = std::result::Result<T, DetectorError>;
