use crate::config::AugmentationConfig;
use ndarray::{Array3, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;

/// Random training-time augmentation on HWC images in [0, 1].
/// Validation data never passes through here.
pub struct ImageTransforms {
    config: AugmentationConfig,
    rng: StdRng,
}

impl ImageTransforms {
    pub fn new(config: AugmentationConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Flip, rotate, zoom and contrast-jitter one image
    pub fn augment(&mut self, image: ArrayView3<f32>) -> Array3<f32> {
        let mut augmented = if self.config.horizontal_flip && self.rng.random_bool(0.5) {
            Self::flip_horizontal(image)
        } else {
            image.to_owned()
        };

        let angle = if self.config.rotation_factor > 0.0 {
            let factor = self.config.rotation_factor;
            self.rng.random_range(-factor..=factor) * 2.0 * PI
        } else {
            0.0
        };
        let zoom = if self.config.zoom_factor > 0.0 {
            let factor = self.config.zoom_factor;
            1.0 + self.rng.random_range(-factor..=factor)
        } else {
            1.0
        };
        if angle != 0.0 || zoom != 1.0 {
            augmented = Self::rotate_and_zoom(augmented.view(), angle, zoom);
        }

        if self.config.contrast_factor > 0.0 {
            let factor = self.config.contrast_factor;
            let contrast = 1.0 + self.rng.random_range(-factor..=factor);
            Self::adjust_contrast(&mut augmented, contrast);
        }

        augmented
    }

    pub fn flip_horizontal(image: ArrayView3<f32>) -> Array3<f32> {
        let mut flipped = image.to_owned();
        flipped.invert_axis(Axis(1));
        flipped.as_standard_layout().into_owned()
    }

    /// Inverse-mapped rotation about the centre combined with a zoom.
    /// `zoom` > 1 samples a wider area (zoom out). Out-of-bounds samples
    /// reflect back into the image.
    pub fn rotate_and_zoom(image: ArrayView3<f32>, angle: f32, zoom: f32) -> Array3<f32> {
        let (height, width, channels) = image.dim();
        let mut transformed = Array3::<f32>::zeros((height, width, channels));

        let center_y = (height as f32 - 1.0) / 2.0;
        let center_x = (width as f32 - 1.0) / 2.0;
        let (sin, cos) = angle.sin_cos();

        for y in 0..height {
            for x in 0..width {
                let dy = y as f32 - center_y;
                let dx = x as f32 - center_x;

                let src_x = (cos * dx + sin * dy) * zoom + center_x;
                let src_y = (-sin * dx + cos * dy) * zoom + center_y;

                let src_x = reflect(src_x, width);
                let src_y = reflect(src_y, height);

                let x1 = src_x.floor() as usize;
                let y1 = src_y.floor() as usize;
                let x2 = (x1 + 1).min(width - 1);
                let y2 = (y1 + 1).min(height - 1);
                let fx = src_x - x1 as f32;
                let fy = src_y - y1 as f32;

                for c in 0..channels {
                    let v11 = image[[y1, x1, c]];
                    let v12 = image[[y1, x2, c]];
                    let v21 = image[[y2, x1, c]];
                    let v22 = image[[y2, x2, c]];

                    transformed[[y, x, c]] = v11 * (1.0 - fy) * (1.0 - fx)
                        + v12 * (1.0 - fy) * fx
                        + v21 * fy * (1.0 - fx)
                        + v22 * fy * fx;
                }
            }
        }

        transformed
    }

    /// Scale each channel's deviation from its mean, clipped to [0, 1]
    pub fn adjust_contrast(image: &mut Array3<f32>, contrast: f32) {
        for mut channel in image.axis_iter_mut(Axis(2)) {
            let mean = channel.mean().unwrap_or(0.0);
            channel.mapv_inplace(|v| ((v - mean) * contrast + mean).clamp(0.0, 1.0));
        }
    }
}

/// Reflect a coordinate into [0, len - 1] (mirror without edge repeat)
fn reflect(coord: f32, len: usize) -> f32 {
    if len <= 1 {
        return 0.0;
    }
    let max = (len - 1) as f32;
    let period = 2.0 * max;
    let mut c = coord.rem_euclid(period);
    if c > max {
        c = period - c;
    }
    c.clamp(0.0, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image(size: usize) -> Array3<f32> {
        Array3::from_shape_fn((size, size, 3), |(y, x, c)| {
            ((y * size + x) as f32 / (size * size) as f32 + c as f32 * 0.1).min(1.0)
        })
    }

    #[test]
    fn test_flip_horizontal_mirrors_columns() {
        let image = gradient_image(8);
        let flipped = ImageTransforms::flip_horizontal(image.view());
        assert_eq!(flipped[[2, 0, 1]], image[[2, 7, 1]]);
        assert_eq!(flipped[[5, 7, 0]], image[[5, 0, 0]]);
    }

    #[test]
    fn test_identity_transform_is_lossless() {
        let image = gradient_image(16);
        let same = ImageTransforms::rotate_and_zoom(image.view(), 0.0, 1.0);
        for (a, b) in same.iter().zip(image.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_contrast_stays_in_range_and_keeps_mean() {
        let mut image = gradient_image(16);
        let mean_before = image.index_axis(Axis(2), 0).mean().unwrap();
        ImageTransforms::adjust_contrast(&mut image, 1.2);
        assert!(image.iter().all(|v| (0.0..=1.0).contains(v)));

        let mut flat = gradient_image(16);
        ImageTransforms::adjust_contrast(&mut flat, 0.0);
        let channel = flat.index_axis(Axis(2), 0);
        assert!(channel.iter().all(|v| (v - mean_before).abs() < 1e-4));
    }

    #[test]
    fn test_augment_is_seeded_and_shape_preserving() {
        let image = gradient_image(24);
        let mut first = ImageTransforms::new(AugmentationConfig::default(), 7);
        let mut second = ImageTransforms::new(AugmentationConfig::default(), 7);

        let a = first.augment(image.view());
        let b = second.augment(image.view());
        assert_eq!(a.dim(), (24, 24, 3));
        assert_eq!(a, b);
        assert!(a.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_disabled_augmentation_is_identity() {
        let image = gradient_image(12);
        let mut transforms = ImageTransforms::new(AugmentationConfig::disabled(), 1);
        assert_eq!(transforms.augment(image.view()), image);
    }

    #[test]
    fn test_reflect() {
        assert_eq!(reflect(-1.0, 10), 1.0);
        assert_eq!(reflect(10.0, 10), 8.0);
        assert_eq!(reflect(4.5, 10), 4.5);
    }
}
