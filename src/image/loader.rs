use crate::utils::error::DetectorError;
use crate::Result;
use image::{DynamicImage, GenericImageView, ImageReader, RgbImage};
use std::path::Path;

/// Extensions accepted for training data and uploads
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub struct ImageLoader;

impl ImageLoader {
    /// Decode an image file, sniffing the format from its content
    pub fn from_path(path: &Path) -> Result<DynamicImage> {
        if !path.exists() {
            return Err(DetectorError::InvalidInput(format!(
                "File not found at {}",
                path.display()
            )));
        }

        let image = ImageReader::open(path)?
            .with_guessed_format()?
            .decode()?;

        Self::validate_dimensions(&image)?;
        Ok(image)
    }

    /// Convert to 8-bit RGB regardless of the decoder's native layout
    pub fn to_rgb(image: DynamicImage) -> RgbImage {
        image.into_rgb8()
    }

    /// Check the extension against the supported set (case-insensitive)
    pub fn is_supported_image_file(path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| Self::is_supported_extension(&ext))
    }

    pub fn is_supported_extension(ext: &str) -> bool {
        SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str())
    }

    fn validate_dimensions(image: &DynamicImage) -> Result<()> {
        let (width, height) = image.dimensions();

        if width == 0 || height == 0 {
            return Err(DetectorError::ImageProcessing(format!(
                "Image has empty dimensions: {}x{}",
                width, height
            )));
        }

        Ok(())
    }
}
