use crate::config::ModelArchitecture;
use crate::models::DeepfakeClassifier;
use crate::utils::error::DetectorError;
use crate::Result;
use candle_core::{Device, Tensor};
use safetensors::SafeTensors;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const FORMAT_KEY: &str = "format";
const FORMAT_VERSION: &str = "deepfake-detector/1";
const ARCHITECTURE_KEY: &str = "architecture";

/// Write every model variable plus the architecture to one safetensors file
pub fn save_checkpoint(model: &DeepfakeClassifier, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tensors: Vec<(String, Tensor)> = model
        .named_vars()?
        .into_iter()
        .map(|(name, var)| (name, var.as_tensor().clone()))
        .collect();

    let metadata = HashMap::from([
        (FORMAT_KEY.to_string(), FORMAT_VERSION.to_string()),
        (
            ARCHITECTURE_KEY.to_string(),
            serde_json::to_string(model.architecture())?,
        ),
    ]);

    let count = tensors.len();
    safetensors::tensor::serialize_to_file(tensors, &Some(metadata), path).map_err(|e| {
        DetectorError::Internal(format!("Failed to write checkpoint {}: {}", path.display(), e))
    })?;

    tracing::info!("Model saved to {} ({} tensors)", path.display(), count);
    Ok(())
}

/// Rebuild the recorded architecture and restore every variable
pub fn load_checkpoint(path: &Path, device: &Device) -> Result<DeepfakeClassifier> {
    let buffer = fs::read(path)?;

    let architecture = read_architecture(&buffer).map_err(|e| match e {
        DetectorError::ModelLoad(msg) => {
            DetectorError::ModelLoad(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })?;

    let tensors = candle_core::safetensors::load_buffer(&buffer, device).map_err(|e| {
        DetectorError::ModelLoad(format!("Failed to read {}: {}", path.display(), e))
    })?;

    let model = DeepfakeClassifier::new(&architecture, device)?;
    model.assign_all(&tensors)?;

    tracing::info!(
        "Loaded model from {} (input {}x{}, width {})",
        path.display(),
        architecture.input_size,
        architecture.input_size,
        architecture.width_multiplier
    );
    Ok(model)
}

fn read_architecture(buffer: &[u8]) -> Result<ModelArchitecture> {
    let (_, header) = SafeTensors::read_metadata(buffer)
        .map_err(|e| DetectorError::ModelLoad(format!("Invalid safetensors header: {}", e)))?;

    let metadata = header
        .metadata()
        .as_ref()
        .ok_or_else(|| DetectorError::ModelLoad("Checkpoint has no metadata".to_string()))?;

    match metadata.get(FORMAT_KEY) {
        Some(format) if format == FORMAT_VERSION => {}
        other => {
            return Err(DetectorError::ModelLoad(format!(
                "Unsupported checkpoint format: {:?}",
                other
            )))
        }
    }

    let architecture = metadata
        .get(ARCHITECTURE_KEY)
        .ok_or_else(|| DetectorError::ModelLoad("Checkpoint has no architecture".to_string()))?;

    Ok(serde_json::from_str(architecture)?)
}
