//! ResNet-18 / ResNet-50 feature extractors
//!
//! Field names mirror torchvision's state-dict keys (`conv1`, `bn1`,
//! `layer1.0.conv1`, ...) so pretrained weights map onto the modules with a
//! couple of key remaps. The classification layer is omitted: `forward`
//! returns the pooled feature vector.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Top-level children in forward order; freezing works on this granularity.
pub const RESNET_STAGES: [&str; 9] = [
    "conv1", "bn1", "relu", "maxpool", "layer1", "layer2", "layer3", "layer4", "avgpool",
];

fn conv3x3<B: Backend>(in_ch: usize, out_ch: usize, stride: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([in_ch, out_ch], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
        .init(device)
}

fn conv1x1<B: Backend>(in_ch: usize, out_ch: usize, stride: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([in_ch, out_ch], [1, 1])
        .with_stride([stride, stride])
        .with_bias(false)
        .init(device)
}

/// Projection shortcut (`downsample.0` / `downsample.1` in torchvision)
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_ch: usize, out_ch: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv: conv1x1(in_ch, out_ch, stride, device),
            bn: BatchNormConfig::new(out_ch).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Two 3x3 convolutions with identity shortcut (ResNet-18/34)
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
    relu: Relu,
}

impl<B: Backend> BasicBlock<B> {
    const EXPANSION: usize = 1;

    fn new(in_ch: usize, width: usize, stride: usize, device: &B::Device) -> Self {
        let out_ch = width * Self::EXPANSION;
        let downsample = (stride != 1 || in_ch != out_ch)
            .then(|| Downsample::new(in_ch, out_ch, stride, device));
        Self {
            conv1: conv3x3(in_ch, width, stride, device),
            bn1: BatchNormConfig::new(width).init(device),
            conv2: conv3x3(width, width, 1, device),
            bn2: BatchNormConfig::new(width).init(device),
            downsample,
            relu: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };
        let out = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let out = self.bn2.forward(self.conv2.forward(out));
        self.relu.forward(out + identity)
    }
}

/// 1x1 / 3x3 / 1x1 bottleneck, stride on the 3x3 (ResNet-50 v1.5)
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    conv3: Conv2d<B>,
    bn3: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
    relu: Relu,
}

impl<B: Backend> Bottleneck<B> {
    const EXPANSION: usize = 4;

    fn new(in_ch: usize, width: usize, stride: usize, device: &B::Device) -> Self {
        let out_ch = width * Self::EXPANSION;
        let downsample = (stride != 1 || in_ch != out_ch)
            .then(|| Downsample::new(in_ch, out_ch, stride, device));
        Self {
            conv1: conv1x1(in_ch, width, 1, device),
            bn1: BatchNormConfig::new(width).init(device),
            conv2: conv3x3(width, width, stride, device),
            bn2: BatchNormConfig::new(width).init(device),
            conv3: conv1x1(width, out_ch, 1, device),
            bn3: BatchNormConfig::new(out_ch).init(device),
            downsample,
            relu: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };
        let out = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let out = self.relu.forward(self.bn2.forward(self.conv2.forward(out)));
        let out = self.bn3.forward(self.conv3.forward(out));
        self.relu.forward(out + identity)
    }
}

/// Stage widths and strides shared by all ResNet depths
const WIDTHS: [usize; 4] = [64, 128, 256, 512];
const STRIDES: [usize; 4] = [1, 2, 2, 2];

fn stem<B: Backend>(device: &B::Device) -> (Conv2d<B>, BatchNorm<B, 2>, MaxPool2d) {
    let conv1 = Conv2dConfig::new([3, 64], [7, 7])
        .with_stride([2, 2])
        .with_padding(PaddingConfig2d::Explicit(3, 3))
        .with_bias(false)
        .init(device);
    let bn1 = BatchNormConfig::new(64).init(device);
    let maxpool = MaxPool2dConfig::new([3, 3])
        .with_strides([2, 2])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init();
    (conv1, bn1, maxpool)
}

macro_rules! resnet {
    ($name:ident, $block:ident, $depths:expr, $features:expr) => {
        #[derive(Module, Debug)]
        pub struct $name<B: Backend> {
            conv1: Conv2d<B>,
            bn1: BatchNorm<B, 2>,
            relu: Relu,
            maxpool: MaxPool2d,
            layer1: Vec<$block<B>>,
            layer2: Vec<$block<B>>,
            layer3: Vec<$block<B>>,
            layer4: Vec<$block<B>>,
            avgpool: AdaptiveAvgPool2d,
        }

        impl<B: Backend> $name<B> {
            /// Width of the pooled output
            pub const NUM_FEATURES: usize = $features;

            pub fn new(device: &B::Device) -> Self {
                let (conv1, bn1, maxpool) = stem(device);
                let mut in_ch = 64;
                let mut layers: Vec<Vec<$block<B>>> = Vec::with_capacity(4);
                for ((&width, &stride), &depth) in WIDTHS.iter().zip(STRIDES.iter()).zip($depths.iter()) {
                    let mut blocks = Vec::with_capacity(depth);
                    for i in 0..depth {
                        let block_stride = if i == 0 { stride } else { 1 };
                        blocks.push($block::new(in_ch, width, block_stride, device));
                        in_ch = width * $block::<B>::EXPANSION;
                    }
                    layers.push(blocks);
                }
                let mut layers = layers.into_iter();
                Self {
                    conv1,
                    bn1,
                    relu: Relu::new(),
                    maxpool,
                    layer1: layers.next().unwrap_or_default(),
                    layer2: layers.next().unwrap_or_default(),
                    layer3: layers.next().unwrap_or_default(),
                    layer4: layers.next().unwrap_or_default(),
                    avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
                }
            }

            /// `[batch, 3, H, W]` -> `[batch, NUM_FEATURES]`
            pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
                let x = self.conv1.forward(input);
                let x = self.relu.forward(self.bn1.forward(x));
                let mut x = self.maxpool.forward(x);
                for block in self
                    .layer1
                    .iter()
                    .chain(&self.layer2)
                    .chain(&self.layer3)
                    .chain(&self.layer4)
                {
                    x = block.forward(x);
                }
                self.avgpool.forward(x).flatten::<2>(1, 3)
            }

            /// Disable gradients for every stage whose flag in `frozen` is set
            pub fn freeze_stages(mut self, frozen: &[bool]) -> Self {
                for (stage, _) in frozen.iter().enumerate().filter(|(_, f)| **f) {
                    match stage {
                        0 => self.conv1 = self.conv1.no_grad(),
                        1 => self.bn1 = self.bn1.no_grad(),
                        4 => self.layer1 = self.layer1.no_grad(),
                        5 => self.layer2 = self.layer2.no_grad(),
                        6 => self.layer3 = self.layer3.no_grad(),
                        7 => self.layer4 = self.layer4.no_grad(),
                        // relu, maxpool, avgpool carry no parameters
                        _ => {}
                    }
                }
                self
            }

            /// Parameter count of each stage, in [`RESNET_STAGES`] order
            pub fn stage_param_counts(&self) -> Vec<usize> {
                vec![
                    self.conv1.num_params(),
                    self.bn1.num_params(),
                    0,
                    0,
                    self.layer1.num_params(),
                    self.layer2.num_params(),
                    self.layer3.num_params(),
                    self.layer4.num_params(),
                    0,
                ]
            }

            /// Visit the modules of one stage, in [`RESNET_STAGES`] order
            #[cfg(test)]
            pub(crate) fn visit_stage<V: burn::module::ModuleVisitor<B>>(&self, stage: usize, visitor: &mut V) {
                match stage {
                    0 => self.conv1.visit(visitor),
                    1 => self.bn1.visit(visitor),
                    4 => self.layer1.visit(visitor),
                    5 => self.layer2.visit(visitor),
                    6 => self.layer3.visit(visitor),
                    7 => self.layer4.visit(visitor),
                    _ => {}
                }
            }
        }
    };
}

resnet!(ResNet18, BasicBlock, [2usize, 2, 2, 2], 512);
resnet!(ResNet50, Bottleneck, [3usize, 4, 6, 3], 2048);

/// Key remaps from a torchvision `resnet*.pth` state dict
pub fn torchvision_key_remaps() -> Vec<(String, String)> {
    vec![
        (r"downsample\.0\.".to_string(), "downsample.conv.".to_string()),
        (r"downsample\.1\.".to_string(), "downsample.bn.".to_string()),
    ]
}

/// Key remaps from a RadImageNet checkpoint, which stores the headless
/// network as a `backbone` sequential (`backbone.0` = conv1, `backbone.4` = layer1).
pub fn radimagenet_key_remaps() -> Vec<(String, String)> {
    let mut remaps = vec![(r"^module\.".to_string(), String::new())];
    for (index, name) in [(0, "conv1"), (1, "bn1"), (4, "layer1"), (5, "layer2"), (6, "layer3"), (7, "layer4")] {
        remaps.push((format!(r"^backbone\.{index}\."), format!("{name}.")));
    }
    remaps.extend(torchvision_key_remaps());
    remaps
}
