use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{batch_norm, conv2d_no_bias, BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig, VarBuilder};

/// (expansion, output channels, repeats, first stride) per stage
const INVERTED_RESIDUAL_SETTINGS: [(usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

const INPUT_CHANNELS: usize = 32;
const LAST_CHANNELS: usize = 1280;

/// Round channels to a multiple of 8 without dropping more than 10%
fn make_divisible(value: f64, divisor: usize) -> usize {
    let divisor_f = divisor as f64;
    let mut rounded = (((value + divisor_f / 2.0) / divisor_f).floor() * divisor_f).max(divisor_f);
    if rounded < 0.9 * value {
        rounded += divisor_f;
    }
    rounded as usize
}

/// Flat, ordered list of parameterised layers. Each convolution and each
/// batch norm gets one slot; freezing is expressed as an index into it.
#[derive(Debug, Default)]
struct LayerRegistry {
    prefixes: Vec<String>,
}

impl LayerRegistry {
    fn register(&mut self, vb: &VarBuilder) -> usize {
        self.prefixes.push(vb.prefix());
        self.prefixes.len() - 1
    }
}

/// Convolution + batch norm (+ ReLU6)
#[derive(Debug)]
struct ConvBn {
    conv: Conv2d,
    bn: BatchNorm,
    relu6: bool,
    conv_layer: usize,
}

impl ConvBn {
    #[allow(clippy::too_many_arguments)]
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        groups: usize,
        relu6: bool,
        conv_vb: VarBuilder,
        bn_vb: VarBuilder,
        layers: &mut LayerRegistry,
    ) -> Result<Self> {
        let config = Conv2dConfig {
            padding: (kernel - 1) / 2,
            stride,
            dilation: 1,
            groups,
            ..Default::default()
        };
        let conv_layer = layers.register(&conv_vb);
        let conv = conv2d_no_bias(in_channels, out_channels, kernel, config, conv_vb)?;
        layers.register(&bn_vb);
        let bn = batch_norm(out_channels, BatchNormConfig::default(), bn_vb)?;

        Ok(Self {
            conv,
            bn,
            relu6,
            conv_layer,
        })
    }

    fn bn_layer(&self) -> usize {
        self.conv_layer + 1
    }

    /// Batch norm only switches to batch statistics when its layer is trainable
    fn forward_t(&self, xs: &Tensor, train: bool, frozen_layers: usize) -> Result<Tensor> {
        let xs = self.conv.forward(xs)?;
        let xs = self.bn.forward_t(&xs, train && self.bn_layer() >= frozen_layers)?;
        if self.relu6 {
            xs.clamp(0f32, 6f32)
        } else {
            Ok(xs)
        }
    }
}

#[derive(Debug)]
struct InvertedResidual {
    expand: Option<ConvBn>,
    depthwise: ConvBn,
    project: ConvBn,
    use_residual: bool,
}

impl InvertedResidual {
    fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        expansion: usize,
        vb: VarBuilder,
        layers: &mut LayerRegistry,
    ) -> Result<Self> {
        let hidden = in_channels * expansion;
        let vb = vb.pp("conv");
        let mut index = 0;

        let expand = if expansion != 1 {
            let block = vb.pp(index);
            index += 1;
            Some(ConvBn::new(
                in_channels,
                hidden,
                1,
                1,
                1,
                true,
                block.pp(0),
                block.pp(1),
                layers,
            )?)
        } else {
            None
        };

        let block = vb.pp(index);
        index += 1;
        let depthwise = ConvBn::new(
            hidden,
            hidden,
            3,
            stride,
            hidden,
            true,
            block.pp(0),
            block.pp(1),
            layers,
        )?;

        // Linear bottleneck: projection conv and its norm are siblings
        let project = ConvBn::new(
            hidden,
            out_channels,
            1,
            1,
            1,
            false,
            vb.pp(index),
            vb.pp(index + 1),
            layers,
        )?;

        Ok(Self {
            expand,
            depthwise,
            project,
            use_residual: stride == 1 && in_channels == out_channels,
        })
    }

    fn last_layer(&self) -> usize {
        self.project.bn_layer()
    }

    fn forward_t(&self, xs: &Tensor, train: bool, frozen_layers: usize) -> Result<Tensor> {
        let mut ys = match &self.expand {
            Some(expand) => expand.forward_t(xs, train, frozen_layers)?,
            None => xs.clone(),
        };
        ys = self.depthwise.forward_t(&ys, train, frozen_layers)?;
        ys = self.project.forward_t(&ys, train, frozen_layers)?;
        if self.use_residual {
            ys + xs
        } else {
            Ok(ys)
        }
    }
}

/// MobileNetV2 feature extractor without the classification top.
///
/// Parameter names follow torchvision (`features.{i}...`) so pretrained
/// weights exported from there load directly.
#[derive(Debug)]
pub struct MobileNetV2 {
    stem: ConvBn,
    blocks: Vec<InvertedResidual>,
    head: ConvBn,
    layer_prefixes: Vec<String>,
    out_channels: usize,
}

impl MobileNetV2 {
    pub fn new(width_multiplier: f64, vb: VarBuilder) -> Result<Self> {
        let features = vb.pp("features");
        let mut layers = LayerRegistry::default();

        let mut in_channels = make_divisible(INPUT_CHANNELS as f64 * width_multiplier, 8);
        let out_channels = make_divisible(
            LAST_CHANNELS as f64 * width_multiplier.max(1.0),
            8,
        );

        let stem_vb = features.pp(0);
        let stem = ConvBn::new(
            3,
            in_channels,
            3,
            2,
            1,
            true,
            stem_vb.pp(0),
            stem_vb.pp(1),
            &mut layers,
        )?;

        let mut blocks = Vec::new();
        let mut feature_index = 1;
        for (expansion, channels, repeats, first_stride) in INVERTED_RESIDUAL_SETTINGS {
            let block_out = make_divisible(channels as f64 * width_multiplier, 8);
            for repeat in 0..repeats {
                let stride = if repeat == 0 { first_stride } else { 1 };
                blocks.push(InvertedResidual::new(
                    in_channels,
                    block_out,
                    stride,
                    expansion,
                    features.pp(feature_index),
                    &mut layers,
                )?);
                in_channels = block_out;
                feature_index += 1;
            }
        }

        let head_vb = features.pp(feature_index);
        let head = ConvBn::new(
            in_channels,
            out_channels,
            1,
            1,
            1,
            true,
            head_vb.pp(0),
            head_vb.pp(1),
            &mut layers,
        )?;

        Ok(Self {
            stem,
            blocks,
            head,
            layer_prefixes: layers.prefixes,
            out_channels,
        })
    }

    /// Channels of the final feature map
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn num_layers(&self) -> usize {
        self.layer_prefixes.len()
    }

    /// Variable-path prefix of every layer, in forward order
    pub fn layer_prefixes(&self) -> &[String] {
        &self.layer_prefixes
    }

    /// Forward pass to the final feature map (NCHW).
    ///
    /// Layers with index below `frozen_layers` run in inference mode and the
    /// graph is cut before the first stage that holds a trainable layer, so
    /// no gradient is computed for the frozen prefix.
    pub fn forward_t(&self, xs: &Tensor, train: bool, frozen_layers: usize) -> Result<Tensor> {
        let mut cut = false;
        let mut gate = |xs: Tensor, last_layer: usize| -> Tensor {
            if train && !cut && last_layer >= frozen_layers {
                cut = true;
                xs.detach()
            } else {
                xs
            }
        };

        let mut xs = gate(xs.clone(), self.stem.bn_layer());
        xs = self.stem.forward_t(&xs, train, frozen_layers)?;
        for block in &self.blocks {
            xs = gate(xs, block.last_layer());
            xs = block.forward_t(&xs, train, frozen_layers)?;
        }
        xs = gate(xs, self.head.bn_layer());
        xs = self.head.forward_t(&xs, train, frozen_layers)?;

        if !cut {
            xs = xs.detach();
        }
        Ok(xs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_make_divisible() {
        assert_eq!(make_divisible(32.0, 8), 32);
        assert_eq!(make_divisible(32.0 * 0.35, 8), 16);
        assert_eq!(make_divisible(16.0 * 0.35, 8), 8);
        assert_eq!(make_divisible(1280.0, 8), 1280);
    }

    #[test]
    fn test_layer_layout_matches_torchvision() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = MobileNetV2::new(0.35, vb).unwrap();

        // stem (2) + first block (4) + 16 expanded blocks (6 each) + head (2)
        assert_eq!(model.num_layers(), 104);
        assert_eq!(model.out_channels(), 1280);

        let prefixes = model.layer_prefixes();
        assert_eq!(prefixes[0], "features.0.0");
        assert_eq!(prefixes[1], "features.0.1");
        assert_eq!(prefixes[2], "features.1.conv.0.0");
        assert_eq!(prefixes[4], "features.1.conv.1");
        assert_eq!(prefixes[5], "features.1.conv.2");
        assert_eq!(prefixes[6], "features.2.conv.0.0");
        assert_eq!(prefixes[11], "features.2.conv.3");
        assert_eq!(prefixes[103], "features.18.1");

        let names = varmap.data().lock().unwrap();
        assert!(names.contains_key("features.17.conv.1.0.weight"));
        assert!(names.contains_key("features.18.1.running_var"));
    }

    #[test]
    fn test_forward_shape() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = MobileNetV2::new(0.35, vb).unwrap();

        let xs = Tensor::zeros((2, 3, 32, 32), DType::F32, &Device::Cpu).unwrap();
        let ys = model.forward_t(&xs, false, model.num_layers()).unwrap();
        assert_eq!(ys.dims(), &[2, 1280, 1, 1]);
    }
}
