use crate::config::ModelArchitecture;
use crate::models::backbone::MobileNetV2;
use crate::utils::error::DetectorError;
use crate::Result;
use candle_core::{DType, Device, Module, ModuleT, Tensor, Var, D};
use candle_nn::{linear, Dropout, Linear, VarBuilder, VarMap};
use std::collections::HashMap;
use std::path::Path;

pub const BACKBONE_PREFIX: &str = "backbone";
pub const HEAD_PREFIX: &str = "head";

/// Pretrained backbone, global average pooling, regularized dense layer,
/// dropout and a single sigmoid unit.
pub struct DeepfakeClassifier {
    backbone: MobileNetV2,
    dense: Linear,
    dropout: Dropout,
    output: Linear,
    varmap: VarMap,
    layer_index: HashMap<String, usize>,
    architecture: ModelArchitecture,
    device: Device,
}

impl DeepfakeClassifier {
    /// Build a freshly initialised model
    pub fn new(architecture: &ModelArchitecture, device: &Device) -> Result<Self> {
        architecture.validate()?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let backbone = MobileNetV2::new(architecture.width_multiplier, vb.pp(BACKBONE_PREFIX))?;
        let head = vb.pp(HEAD_PREFIX);
        let dense = linear(backbone.out_channels(), architecture.hidden_units, head.pp("dense"))?;
        let output = linear(architecture.hidden_units, 1, head.pp("output"))?;

        let layer_index = backbone
            .layer_prefixes()
            .iter()
            .enumerate()
            .map(|(index, prefix)| (prefix.clone(), index))
            .collect();

        tracing::debug!(
            "Built classifier: {} backbone layers, {} feature channels, {} hidden units",
            backbone.num_layers(),
            backbone.out_channels(),
            architecture.hidden_units
        );

        Ok(Self {
            backbone,
            dense,
            dropout: Dropout::new(architecture.dropout),
            output,
            varmap,
            layer_index,
            architecture: architecture.clone(),
            device: device.clone(),
        })
    }

    pub fn architecture(&self) -> &ModelArchitecture {
        &self.architecture
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Number of backbone layers; passing it as `frozen_layers` freezes the
    /// whole backbone.
    pub fn backbone_layers(&self) -> usize {
        self.backbone.num_layers()
    }

    /// Logits of shape [batch, 1] for an NCHW batch
    pub fn forward_t(&self, xs: &Tensor, train: bool, frozen_layers: usize) -> Result<Tensor> {
        let features = self.backbone.forward_t(xs, train, frozen_layers)?;
        // Global average pooling
        let pooled = features.mean(D::Minus1)?.mean(D::Minus1)?;
        let hidden = self.dense.forward(&pooled)?.relu()?;
        let hidden = self.dropout.forward_t(&hidden, train)?;
        Ok(self.output.forward(&hidden)?)
    }

    /// Probability of "fake" for each image, inference mode
    pub fn predict_proba(&self, xs: &Tensor) -> Result<Tensor> {
        let logits = self.forward_t(xs, false, self.backbone_layers())?;
        Ok(candle_nn::ops::sigmoid(&logits)?)
    }

    /// L2 penalty on the dense kernel
    pub fn regularization_loss(&self) -> Result<Tensor> {
        let penalty = self.dense.weight().sqr()?.sum_all()?;
        Ok(penalty.affine(self.architecture.l2_regularization, 0.0)?)
    }

    /// Every variable with its full name, sorted by name
    pub fn named_vars(&self) -> Result<Vec<(String, Var)>> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|e| DetectorError::Internal(format!("Variable map poisoned: {}", e)))?;
        let mut vars: Vec<(String, Var)> = data
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(vars)
    }

    /// Backbone layer a variable belongs to; `None` for head variables.
    /// Layer prefixes are registered with the `backbone.` path included.
    pub fn layer_of(&self, var_name: &str) -> Option<usize> {
        let (prefix, _) = var_name.rsplit_once('.')?;
        self.layer_index.get(prefix).copied()
    }

    /// Variables the optimizer may update when the first `frozen_layers`
    /// backbone layers are frozen. Batch-norm running statistics are never
    /// optimizer parameters.
    pub fn trainable_vars(&self, frozen_layers: usize) -> Result<Vec<Var>> {
        let head = format!("{}.", HEAD_PREFIX);
        let vars = self
            .named_vars()?
            .into_iter()
            .filter(|(name, _)| !is_running_stat(name))
            .filter(|(name, _)| {
                name.starts_with(&head)
                    || self.layer_of(name).is_some_and(|layer| layer >= frozen_layers)
            })
            .map(|(_, var)| var)
            .collect();
        Ok(vars)
    }

    /// Copy pretrained backbone weights from a safetensors file. Names may
    /// carry the `backbone.` prefix or be bare torchvision names.
    pub fn load_backbone_weights(&self, path: &Path) -> Result<()> {
        tracing::info!("Loading pretrained backbone from: {}", path.display());

        let tensors = candle_core::safetensors::load(path, &self.device).map_err(|e| {
            DetectorError::ModelLoad(format!(
                "Failed to read backbone weights {}: {}",
                path.display(),
                e
            ))
        })?;

        let backbone = format!("{}.", BACKBONE_PREFIX);
        let mut loaded = 0;
        for (name, var) in self.named_vars()? {
            let Some(bare) = name.strip_prefix(&backbone) else {
                continue;
            };
            let tensor = tensors.get(bare).or_else(|| tensors.get(&name)).ok_or_else(|| {
                DetectorError::ModelLoad(format!("Backbone weights missing '{}'", bare))
            })?;
            var.set(&tensor.to_dtype(DType::F32)?).map_err(|e| {
                DetectorError::ModelLoad(format!("Cannot load '{}': {}", bare, e))
            })?;
            loaded += 1;
        }

        tracing::info!("Loaded {} pretrained backbone tensors", loaded);
        Ok(())
    }

    /// Copy every variable from `tensors`, which must cover the whole model
    pub(crate) fn assign_all(&self, tensors: &HashMap<String, Tensor>) -> Result<()> {
        for (name, var) in self.named_vars()? {
            let tensor = tensors.get(&name).ok_or_else(|| {
                DetectorError::ModelLoad(format!("Checkpoint is missing '{}'", name))
            })?;
            var.set(&tensor.to_dtype(DType::F32)?).map_err(|e| {
                DetectorError::ModelLoad(format!("Cannot load '{}': {}", name, e))
            })?;
        }
        Ok(())
    }
}

fn is_running_stat(name: &str) -> bool {
    name.ends_with(".running_mean") || name.ends_with(".running_var")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::tiny_architecture;

    #[test]
    fn test_predict_proba_range() {
        let model = DeepfakeClassifier::new(&tiny_architecture(), &Device::Cpu).unwrap();
        let xs = Tensor::rand(0f32, 1f32, (3, 3, 32, 32), &Device::Cpu).unwrap();

        let probs = model.predict_proba(&xs).unwrap();
        assert_eq!(probs.dims(), &[3, 1]);
        let values = probs.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_layer_of() {
        let model = DeepfakeClassifier::new(&tiny_architecture(), &Device::Cpu).unwrap();
        assert_eq!(model.layer_of("backbone.features.0.0.weight"), Some(0));
        assert_eq!(model.layer_of("backbone.features.0.1.running_mean"), Some(1));
        assert_eq!(model.layer_of("backbone.features.18.1.bias"), Some(103));
        assert_eq!(model.layer_of("head.dense.weight"), None);
        assert_eq!(model.layer_of("features.0.0.weight"), None);
    }

    #[test]
    fn test_layer_of_covers_every_backbone_variable() {
        let model = DeepfakeClassifier::new(&tiny_architecture(), &Device::Cpu).unwrap();
        for (name, _) in model.named_vars().unwrap() {
            let in_backbone = name.starts_with("backbone.");
            assert_eq!(model.layer_of(&name).is_some(), in_backbone, "{}", name);
        }
    }

    #[test]
    fn test_trainable_vars_respect_freeze_boundary() {
        let model = DeepfakeClassifier::new(&tiny_architecture(), &Device::Cpu).unwrap();

        // Fully frozen backbone: dense + output weights and biases only
        let head_only = model.trainable_vars(model.backbone_layers()).unwrap();
        assert_eq!(head_only.len(), 4);

        // features.18 conv weight + bn weight/bias on top of the head
        let last_two = model.trainable_vars(model.backbone_layers() - 2).unwrap();
        assert_eq!(last_two.len(), 7);

        // Default fine-tune boundary: 10 convs + 10 batch norms
        let last_twenty = model.trainable_vars(model.backbone_layers() - 20).unwrap();
        assert_eq!(last_twenty.len(), 4 + 10 + 10 * 2);

        // 52 conv weights + 52 batch-norm weight/bias pairs
        let everything = model.trainable_vars(0).unwrap();
        assert_eq!(everything.len(), 4 + 52 + 52 * 2);
    }

    #[test]
    fn test_regularization_loss_is_positive() {
        let model = DeepfakeClassifier::new(&tiny_architecture(), &Device::Cpu).unwrap();
        let penalty = model.regularization_loss().unwrap().to_scalar::<f32>().unwrap();
        assert!(penalty > 0.0);
    }

    #[test]
    fn test_load_backbone_weights_from_bare_names() {
        let source = DeepfakeClassifier::new(&tiny_architecture(), &Device::Cpu).unwrap();
        let target = DeepfakeClassifier::new(&tiny_architecture(), &Device::Cpu).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mobilenet_v2.safetensors");
        let bare: HashMap<String, Tensor> = source
            .named_vars()
            .unwrap()
            .into_iter()
            .filter_map(|(name, var)| {
                name.strip_prefix("backbone.")
                    .map(|bare| (bare.to_string(), var.as_tensor().clone()))
            })
            .collect();
        candle_core::safetensors::save(&bare, &path).unwrap();

        target.load_backbone_weights(&path).unwrap();

        let name = "backbone.features.3.conv.1.0.weight";
        let read = |model: &DeepfakeClassifier| {
            model
                .named_vars()
                .unwrap()
                .into_iter()
                .find(|(n, _)| n == name)
                .unwrap()
                .1
                .as_tensor()
                .flatten_all()
                .unwrap()
                .to_vec1::<f32>()
                .unwrap()
        };
        assert_eq!(read(&source), read(&target));
    }
}
