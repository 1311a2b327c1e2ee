pub mod organize;
pub mod split;

pub use organize::{organize_speaker, OrganizeSummary};
pub use split::train_validation_split;

use crate::image::{ImageLoader, ImagePreprocessor};
use crate::utils::error::DetectorError;
use crate::Result;
use ndarray::{Array1, Array4, ArrayView3, Axis};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const REAL_LABEL: f32 = 0.0;
pub const FAKE_LABEL: f32 = 1.0;

/// Labelled images: `images` is [N, H, W, 3] in [0, 1], `labels` holds
/// 0.0 for real and 1.0 for fake.
#[derive(Debug, Clone)]
pub struct Dataset {
    images: Array4<f32>,
    labels: Array1<f32>,
}

impl Dataset {
    pub fn new(images: Array4<f32>, labels: Array1<f32>) -> Result<Self> {
        if images.len_of(Axis(0)) != labels.len() {
            return Err(DetectorError::InvalidInput(format!(
                "Image count {} does not match label count {}",
                images.len_of(Axis(0)),
                labels.len()
            )));
        }
        if images.len_of(Axis(3)) != 3 {
            return Err(DetectorError::InvalidInput(format!(
                "Expected 3 channels, got {}",
                images.len_of(Axis(3))
            )));
        }
        Ok(Self { images, labels })
    }

    /// Recursively load `real_dir` (label 0) and `fake_dir` (label 1).
    /// Files that fail to decode are logged and left out.
    pub fn load(real_dir: &Path, fake_dir: &Path, input_size: usize) -> Result<Self> {
        let preprocessor = ImagePreprocessor::new(input_size);

        let real_images = load_images(real_dir, &preprocessor);
        let fake_images = load_images(fake_dir, &preprocessor);

        tracing::info!(
            "Loaded {} real and {} fake images",
            real_images.len(),
            fake_images.len()
        );

        let total = real_images.len() + fake_images.len();
        let pixels_per_image = input_size * input_size * 3;

        let mut data = Vec::with_capacity(total * pixels_per_image);
        for image in real_images.iter().chain(fake_images.iter()) {
            data.extend(image.iter().copied());
        }

        let labels = std::iter::repeat(REAL_LABEL)
            .take(real_images.len())
            .chain(std::iter::repeat(FAKE_LABEL).take(fake_images.len()))
            .collect::<Array1<f32>>();

        let images = Array4::from_shape_vec((total, input_size, input_size, 3), data)?;
        Self::new(images, labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn images(&self) -> &Array4<f32> {
        &self.images
    }

    pub fn labels(&self) -> &Array1<f32> {
        &self.labels
    }

    pub fn image(&self, index: usize) -> ArrayView3<'_, f32> {
        self.images.index_axis(Axis(0), index)
    }

    pub fn count_label(&self, label: f32) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }

    /// Copy out the samples at `indices`, in that order
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            images: self.images.select(Axis(0), indices),
            labels: self.labels.select(Axis(0), indices),
        }
    }
}

/// Every supported image under `root`, sorted for a stable order
pub fn collect_image_paths(root: &Path) -> Vec<PathBuf> {
    if !root.exists() {
        tracing::warn!("Dataset directory does not exist: {}", root.display());
        return Vec::new();
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        match entry {
            Ok(entry) => {
                let path = entry.path();
                if entry.file_type().is_file() && ImageLoader::is_supported_image_file(path) {
                    paths.push(path.to_path_buf());
                }
            }
            Err(e) => {
                tracing::warn!("Error walking {}: {}", root.display(), e);
            }
        }
    }

    paths
}

fn load_images(root: &Path, preprocessor: &ImagePreprocessor) -> Vec<ndarray::Array3<f32>> {
    let mut images = Vec::new();

    for path in collect_image_paths(root) {
        match preprocessor.load(&path) {
            Ok(image) => images.push(image),
            Err(e) => {
                tracing::warn!("Error loading image {}: {}", path.display(), e);
            }
        }
    }

    images
}
