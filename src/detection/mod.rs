pub mod detector;
pub mod types;

pub use detector::Detector;
pub use types::Prediction;

use std::path::Path;

/// Anything that can score an image file. The web layer only sees this.
pub trait Predictor: Send + Sync {
    /// `None` when the image cannot be read or decoded
    fn predict(&self, image_path: &Path) -> Option<Prediction>;
}

impl Predictor for Detector {
    fn predict(&self, image_path: &Path) -> Option<Prediction> {
        Detector::predict(self, image_path)
    }
}
