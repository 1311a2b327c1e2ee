use crate::image::ImageLoader;
use crate::Result;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array3, Array4, Axis};
use std::path::Path;

/// Per-image pipeline shared by dataset loading and inference:
/// decode, RGB, resize to a square input, scale to [0, 1].
pub struct ImagePreprocessor {
    input_size: usize,
}

impl ImagePreprocessor {
    pub fn new(input_size: usize) -> Self {
        Self { input_size }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Load a file into an HWC array normalized to [0, 1]
    pub fn load(&self, path: &Path) -> Result<Array3<f32>> {
        let image = ImageLoader::from_path(path)?;
        Ok(self.normalize(&ImageLoader::to_rgb(image)))
    }

    /// Load a file and add the leading batch dimension
    pub fn load_batch(&self, path: &Path) -> Result<Array4<f32>> {
        Ok(self.load(path)?.insert_axis(Axis(0)))
    }

    /// Resize (bilinear) and scale pixel values to [0, 1]
    pub fn normalize(&self, image: &RgbImage) -> Array3<f32> {
        let size = self.input_size as u32;
        let resized = if image.dimensions() == (size, size) {
            image.clone()
        } else {
            imageops::resize(image, size, size, FilterType::Triangle)
        };

        let raw_data = resized.into_raw();
        let mut array = Array3::<f32>::zeros((self.input_size, self.input_size, 3));

        for (value, pixel_value) in array.iter_mut().zip(raw_data.iter()) {
            *value = *pixel_value as f32 / 255.0;
        }

        array
    }
}
