//! DenseNet-121 feature extractor
//!
//! Mirrors torchvision's `densenet121().features` (growth rate 32, blocks
//! 6/12/24/16, bottleneck width 4 x growth). The torchvision checkpoint nests
//! everything under `features.` and numbers dense layers from 1; the key
//! remaps below translate both.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{
            AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig, MaxPool2d,
            MaxPool2dConfig,
        },
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

const GROWTH_RATE: usize = 32;
const BN_SIZE: usize = 4;
const BLOCK_CONFIG: [usize; 4] = [6, 12, 24, 16];
const NUM_INIT_FEATURES: usize = 64;

/// Top-level children of `features`, in forward order
pub const DENSENET_STAGES: [&str; 12] = [
    "conv0",
    "norm0",
    "relu0",
    "pool0",
    "denseblock1",
    "transition1",
    "denseblock2",
    "transition2",
    "denseblock3",
    "transition3",
    "denseblock4",
    "norm5",
];

#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    norm1: BatchNorm<B, 2>,
    conv1: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    relu: Relu,
}

impl<B: Backend> DenseLayer<B> {
    fn new(in_ch: usize, device: &B::Device) -> Self {
        let width = BN_SIZE * GROWTH_RATE;
        Self {
            norm1: BatchNormConfig::new(in_ch).init(device),
            conv1: Conv2dConfig::new([in_ch, width], [1, 1])
                .with_bias(false)
                .init(device),
            norm2: BatchNormConfig::new(width).init(device),
            conv2: Conv2dConfig::new([width, GROWTH_RATE], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            relu: Relu::new(),
        }
    }

    /// Returns only the new feature maps; the block concatenates them.
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv1.forward(self.relu.forward(self.norm1.forward(x)));
        self.conv2.forward(self.relu.forward(self.norm2.forward(out)))
    }
}

#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    layers: Vec<DenseLayer<B>>,
}

impl<B: Backend> DenseBlock<B> {
    fn new(num_layers: usize, in_ch: usize, device: &B::Device) -> Self {
        let layers = (0..num_layers)
            .map(|i| DenseLayer::new(in_ch + i * GROWTH_RATE, device))
            .collect();
        Self { layers }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.layers.iter().fold(x, |features, layer| {
            let new = layer.forward(features.clone());
            Tensor::cat(vec![features, new], 1)
        })
    }
}

#[derive(Module, Debug)]
pub struct Transition<B: Backend> {
    norm: BatchNorm<B, 2>,
    conv: Conv2d<B>,
    pool: AvgPool2d,
    relu: Relu,
}

impl<B: Backend> Transition<B> {
    fn new(in_ch: usize, out_ch: usize, device: &B::Device) -> Self {
        Self {
            norm: BatchNormConfig::new(in_ch).init(device),
            conv: Conv2dConfig::new([in_ch, out_ch], [1, 1])
                .with_bias(false)
                .init(device),
            pool: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            relu: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(self.relu.forward(self.norm.forward(x)));
        self.pool.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct DenseNet121<B: Backend> {
    conv0: Conv2d<B>,
    norm0: BatchNorm<B, 2>,
    relu0: Relu,
    pool0: MaxPool2d,
    denseblock1: DenseBlock<B>,
    transition1: Transition<B>,
    denseblock2: DenseBlock<B>,
    transition2: Transition<B>,
    denseblock3: DenseBlock<B>,
    transition3: Transition<B>,
    denseblock4: DenseBlock<B>,
    norm5: BatchNorm<B, 2>,
    relu: Relu,
    avgpool: AdaptiveAvgPool2d,
}

impl<B: Backend> DenseNet121<B> {
    pub const NUM_FEATURES: usize = 1024;

    pub fn new(device: &B::Device) -> Self {
        let dense = |num_layers: usize, channels: &mut usize| {
            let block = DenseBlock::new(num_layers, *channels, device);
            *channels += num_layers * GROWTH_RATE;
            block
        };
        let transition = |channels: &mut usize| {
            let transition = Transition::new(*channels, *channels / 2, device);
            *channels /= 2;
            transition
        };

        let mut channels = NUM_INIT_FEATURES;
        let denseblock1 = dense(BLOCK_CONFIG[0], &mut channels);
        let transition1 = transition(&mut channels);
        let denseblock2 = dense(BLOCK_CONFIG[1], &mut channels);
        let transition2 = transition(&mut channels);
        let denseblock3 = dense(BLOCK_CONFIG[2], &mut channels);
        let transition3 = transition(&mut channels);
        let denseblock4 = dense(BLOCK_CONFIG[3], &mut channels);

        Self {
            conv0: Conv2dConfig::new([3, NUM_INIT_FEATURES], [7, 7])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_bias(false)
                .init(device),
            norm0: BatchNormConfig::new(NUM_INIT_FEATURES).init(device),
            relu0: Relu::new(),
            pool0: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            denseblock1,
            transition1,
            denseblock2,
            transition2,
            denseblock3,
            transition3,
            denseblock4,
            norm5: BatchNormConfig::new(channels).init(device),
            relu: Relu::new(),
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }

    /// `[batch, 3, H, W]` -> `[batch, 1024]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv0.forward(input);
        let x = self.relu0.forward(self.norm0.forward(x));
        let x = self.pool0.forward(x);
        let x = self.transition1.forward(self.denseblock1.forward(x));
        let x = self.transition2.forward(self.denseblock2.forward(x));
        let x = self.transition3.forward(self.denseblock3.forward(x));
        let x = self.norm5.forward(self.denseblock4.forward(x));
        // torchvision applies the final ReLU outside `features`
        let x = self.relu.forward(x);
        self.avgpool.forward(x).flatten::<2>(1, 3)
    }

    /// Disable gradients for every stage whose flag in `frozen` is set
    pub fn freeze_stages(mut self, frozen: &[bool]) -> Self {
        for (stage, _) in frozen.iter().enumerate().filter(|(_, f)| **f) {
            match stage {
                0 => self.conv0 = self.conv0.no_grad(),
                1 => self.norm0 = self.norm0.no_grad(),
                4 => self.denseblock1 = self.denseblock1.no_grad(),
                5 => self.transition1 = self.transition1.no_grad(),
                6 => self.denseblock2 = self.denseblock2.no_grad(),
                7 => self.transition2 = self.transition2.no_grad(),
                8 => self.denseblock3 = self.denseblock3.no_grad(),
                9 => self.transition3 = self.transition3.no_grad(),
                10 => self.denseblock4 = self.denseblock4.no_grad(),
                11 => self.norm5 = self.norm5.no_grad(),
                _ => {}
            }
        }
        self
    }

    /// Parameter count of each stage, in [`DENSENET_STAGES`] order
    pub fn stage_param_counts(&self) -> Vec<usize> {
        vec![
            self.conv0.num_params(),
            self.norm0.num_params(),
            0,
            0,
            self.denseblock1.num_params(),
            self.transition1.num_params(),
            self.denseblock2.num_params(),
            self.transition2.num_params(),
            self.denseblock3.num_params(),
            self.transition3.num_params(),
            self.denseblock4.num_params(),
            self.norm5.num_params(),
        ]
    }
}

/// Largest dense-layer index across all blocks
fn max_dense_layers() -> usize {
    BLOCK_CONFIG.iter().copied().max().unwrap_or(0)
}

/// Key remaps shared by torchvision and RadImageNet DenseNet checkpoints,
/// applied after the source-specific prefix has been stripped.
fn feature_key_remaps() -> Vec<(String, String)> {
    // Legacy checkpoints spell `norm1` as `norm.1`.
    let mut remaps = vec![(
        r"(denselayer\d+)\.(norm|relu|conv)\.(\d+)\.".to_string(),
        "$1.$2$3.".to_string(),
    )];
    // torchvision numbers dense layers from 1, Vec indices start at 0.
    for i in 1..=max_dense_layers() {
        remaps.push((format!(r"\.denselayer{i}\."), format!(".layers.{}.", i - 1)));
    }
    remaps
}

/// Key remaps from a torchvision `densenet121-*.pth` state dict
pub fn torchvision_key_remaps() -> Vec<(String, String)> {
    let mut remaps = vec![(r"^features\.".to_string(), String::new())];
    remaps.extend(feature_key_remaps());
    remaps
}

/// Key remaps from a RadImageNet checkpoint (`backbone.0` = `features`)
pub fn radimagenet_key_remaps() -> Vec<(String, String)> {
    let mut remaps = vec![
        (r"^module\.".to_string(), String::new()),
        (r"^backbone\.0\.".to_string(), String::new()),
    ];
    remaps.extend(feature_key_remaps());
    remaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_channel_progression() {
        let device = Default::default();
        let model = DenseNet121::<TestBackend>::new(&device);
        assert_eq!(model.denseblock1.layers.len(), 6);
        assert_eq!(model.denseblock4.layers.len(), 16);
        assert_eq!(model.stage_param_counts().len(), DENSENET_STAGES.len());
    }

    #[test]
    fn test_output_shape() {
        let device = Default::default();
        let model = DenseNet121::<TestBackend>::new(&device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);
        assert_eq!(model.forward(input).dims(), [1, DenseNet121::<TestBackend>::NUM_FEATURES]);
    }

    #[test]
    fn test_remaps_cover_every_dense_layer() {
        let remaps = torchvision_key_remaps();
        assert!(remaps.iter().any(|(p, r)| p == r"\.denselayer24\." && r == ".layers.23."));
        assert!(!remaps.iter().any(|(p, _)| p == r"\.denselayer25\."));
    }
}
