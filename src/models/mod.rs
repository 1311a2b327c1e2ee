pub mod backbone;
pub mod checkpoint;
pub mod classifier;

pub use backbone::MobileNetV2;
pub use checkpoint::{load_checkpoint, save_checkpoint};
pub use classifier::DeepfakeClassifier;

use crate::Result;
use candle_core::{Device, Tensor};
use ndarray::Array4;

/// Compute device for the model: GPU when built with `cuda`/`metal` and one
/// is available, CPU otherwise.
pub fn select_device() -> Device {
    #[cfg(feature = "cuda")]
    let device = Device::new_cuda(0).unwrap_or(Device::Cpu);
    #[cfg(all(feature = "metal", not(feature = "cuda")))]
    let device = Device::new_metal(0).unwrap_or(Device::Cpu);
    #[cfg(not(any(feature = "cuda", feature = "metal")))]
    let device = Device::Cpu;

    tracing::info!("Using device {:?}", device);
    device
}

/// NHWC host batch to an NCHW tensor on `device`
pub fn to_input_tensor(batch: &Array4<f32>, device: &Device) -> Result<Tensor> {
    let (n, h, w, c) = batch.dim();
    let data: Vec<f32> = batch.iter().copied().collect();
    let tensor = Tensor::from_vec(data, (n, h, w, c), device)?
        .permute((0, 3, 1, 2))?
        .contiguous()?;
    Ok(tensor)
}
