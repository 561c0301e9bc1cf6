//! Classifier heads
//!
//! Every head maps `[batch, in_features]` backbone features to
//! `[batch, num_classes]` logits and is built through the same constructor,
//! [`ClassifierHead::new`], from a [`HeadParams`] bundle. Weights use
//! Kaiming-normal initialisation (ReLU gain) and biases start at zero.

use burn::{
    module::{Module, Param},
    nn::{
        conv::{Conv1d, Conv1dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer, LeakyRelu,
        LeakyReluConfig, Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::config::{ClassifierKind, ExperimentConfig};
use crate::utils::error::{ExperimentError, Result};

const LEAKY_SLOPE: f64 = 0.01;

fn kaiming() -> Initializer {
    Initializer::KaimingNormal {
        gain: std::f64::consts::SQRT_2,
        fan_out_only: false,
    }
}

/// Hyperparameters consumed by the heads
#[derive(Debug, Clone, PartialEq)]
pub struct HeadParams {
    pub dropout_prob: f64,
    pub fc_hidden_size_ratio: f64,
    pub num_filters: usize,
    pub kernel_size: usize,
}

impl From<&ExperimentConfig> for HeadParams {
    fn from(config: &ExperimentConfig) -> Self {
        Self {
            dropout_prob: config.dropout_prob,
            fc_hidden_size_ratio: config.fc_hidden_size_ratio,
            num_filters: config.num_filters,
            kernel_size: config.kernel_size,
        }
    }
}

impl HeadParams {
    /// Width of the hidden layer fed by `fc_input` features
    fn hidden_size(&self, fc_input: usize) -> usize {
        ((fc_input as f64) * self.fc_hidden_size_ratio).floor().max(1.0) as usize
    }
}

fn linear<B: Backend>(d_in: usize, d_out: usize, bias: bool, device: &B::Device) -> Linear<B> {
    let mut layer = LinearConfig::new(d_in, d_out)
        .with_bias(bias)
        .with_initializer(kaiming())
        .init(device);
    if bias {
        layer.bias = Some(Param::from_tensor(Tensor::zeros([d_out], device)));
    }
    layer
}

/// Batch norm over a `[batch, features]` tensor
fn norm_features<B: Backend>(bn: &BatchNorm<B, 1>, x: Tensor<B, 2>) -> Tensor<B, 2> {
    let [batch, features] = x.dims();
    bn.forward(x.reshape([batch, features, 1])).reshape([batch, features])
}

/// Single affine layer
#[derive(Module, Debug)]
pub struct LinearHead<B: Backend> {
    fc: Linear<B>,
}

impl<B: Backend> LinearHead<B> {
    pub fn new(in_features: usize, num_classes: usize, device: &B::Device) -> Self {
        Self {
            fc: linear(in_features, num_classes, true, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.fc.forward(x)
    }
}

/// Hidden layer with batch norm, LeakyReLU and dropout
#[derive(Module, Debug)]
pub struct NonLinearHead<B: Backend> {
    fc1: Linear<B>,
    bn1: BatchNorm<B, 1>,
    activation: LeakyRelu,
    dropout: Dropout,
    fc2: Linear<B>,
}

impl<B: Backend> NonLinearHead<B> {
    pub fn new(in_features: usize, num_classes: usize, params: &HeadParams, device: &B::Device) -> Self {
        let hidden = params.hidden_size(in_features);
        Self {
            fc1: linear(in_features, hidden, false, device),
            bn1: BatchNormConfig::new(hidden).init(device),
            activation: LeakyReluConfig::new().with_negative_slope(LEAKY_SLOPE).init(),
            dropout: DropoutConfig::new(params.dropout_prob).init(),
            fc2: linear(hidden, num_classes, true, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = norm_features(&self.bn1, self.fc1.forward(x));
        let x = self.dropout.forward(self.activation.forward(x));
        self.fc2.forward(x)
    }
}

/// Residual projection from the raw features onto the flattened conv output
#[derive(Module, Debug)]
pub struct SkipPath<B: Backend> {
    fc: Linear<B>,
    bn: BatchNorm<B, 1>,
    activation: Relu,
}

impl<B: Backend> SkipPath<B> {
    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.activation.forward(norm_features(&self.bn, self.fc.forward(x)))
    }
}

/// 1-D convolution over the feature vector followed by a hidden layer.
/// With `skip` present this is the ConvSkip head.
#[derive(Module, Debug)]
pub struct ConvHead<B: Backend> {
    conv: Conv1d<B>,
    conv_bn: BatchNorm<B, 1>,
    fc1: Linear<B>,
    fc1_bn: BatchNorm<B, 1>,
    fc2: Linear<B>,
    skip: Option<SkipPath<B>>,
    activation: LeakyRelu,
    dropout: Dropout,
}

impl<B: Backend> ConvHead<B> {
    pub fn new(
        in_features: usize,
        num_classes: usize,
        params: &HeadParams,
        with_skip: bool,
        device: &B::Device,
    ) -> Result<Self> {
        if params.kernel_size == 0 || params.kernel_size > in_features {
            return Err(ExperimentError::invalid_param(
                "kernelsize",
                format!("{} does not fit {} input features", params.kernel_size, in_features),
            ));
        }
        let conv_len = in_features - params.kernel_size + 1;
        let flat = params.num_filters * conv_len;
        let hidden = params.hidden_size(flat);

        let skip = with_skip.then(|| SkipPath {
            fc: linear(in_features, flat, false, device),
            bn: BatchNormConfig::new(flat).init(device),
            activation: Relu::new(),
        });

        Ok(Self {
            conv: Conv1dConfig::new(1, params.num_filters, params.kernel_size)
                .with_bias(false)
                .with_initializer(kaiming())
                .init(device),
            conv_bn: BatchNormConfig::new(params.num_filters).init(device),
            fc1: linear(flat, hidden, false, device),
            fc1_bn: BatchNormConfig::new(hidden).init(device),
            fc2: linear(hidden, num_classes, true, device),
            skip,
            activation: LeakyReluConfig::new().with_negative_slope(LEAKY_SLOPE).init(),
            dropout: DropoutConfig::new(params.dropout_prob).init(),
        })
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let residual = self.skip.as_ref().map(|skip| skip.forward(x.clone()));

        // [batch, features] -> [batch, 1, features] -> [batch, filters, len]
        let h = self.conv.forward(x.unsqueeze_dim::<3>(1));
        let h = self.activation.forward(self.conv_bn.forward(h));
        let h = self.dropout.forward(h).flatten::<2>(1, 2);
        let h = match residual {
            Some(residual) => h + residual,
            None => h,
        };

        let h = norm_features(&self.fc1_bn, self.fc1.forward(h));
        let h = self.dropout.forward(self.activation.forward(h));
        self.fc2.forward(h)
    }
}

/// Tagged classifier head
#[derive(Module, Debug)]
pub enum ClassifierHead<B: Backend> {
    Linear(LinearHead<B>),
    NonLinear(NonLinearHead<B>),
    Conv(ConvHead<B>),
}

impl<B: Backend> ClassifierHead<B> {
    /// Uniform constructor for every head kind
    pub fn new(
        kind: ClassifierKind,
        in_features: usize,
        num_classes: usize,
        params: &HeadParams,
        device: &B::Device,
    ) -> Result<Self> {
        Ok(match kind {
            ClassifierKind::Linear => ClassifierHead::Linear(LinearHead::new(in_features, num_classes, device)),
            ClassifierKind::NonLinear => {
                ClassifierHead::NonLinear(NonLinearHead::new(in_features, num_classes, params, device))
            }
            ClassifierKind::Conv => {
                ClassifierHead::Conv(ConvHead::new(in_features, num_classes, params, false, device)?)
            }
            ClassifierKind::ConvSkip => {
                ClassifierHead::Conv(ConvHead::new(in_features, num_classes, params, true, device)?)
            }
        })
    }

    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        match self {
            ClassifierHead::Linear(head) => head.forward(features),
            ClassifierHead::NonLinear(head) => head.forward(features),
            ClassifierHead::Conv(head) => head.forward(features),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn params() -> HeadParams {
        HeadParams {
            dropout_prob: 0.5,
            fc_hidden_size_ratio: 0.5,
            num_filters: 4,
            kernel_size: 2,
        }
    }

    #[test]
    fn test_every_head_produces_logits() {
        let device = Default::default();
        for kind in ClassifierKind::ALL {
            let head = ClassifierHead::<TestBackend>::new(kind, 16, 2, &params(), &device).unwrap();
            let logits = head.forward(Tensor::random(
                [3, 16],
                burn::tensor::Distribution::Normal(0.0, 1.0),
                &device,
            ));
            assert_eq!(logits.dims(), [3, 2], "{kind}");
        }
    }

    #[test]
    fn test_linear_bias_starts_at_zero() {
        let device = Default::default();
        let head = LinearHead::<TestBackend>::new(8, 2, &device);
        let bias = head.fc.bias.as_ref().unwrap().val();
        let values = bias.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![0.0, 0.0]);
    }

    #[test]
    fn test_conv_head_dimensions() {
        let device = Default::default();
        let head = ConvHead::<TestBackend>::new(16, 2, &params(), false, &device).unwrap();
        // 4 filters over 16 - 2 + 1 = 15 positions give 60 features, halved to 30.
        assert_eq!(head.fc1.weight.val().dims(), [60, 30]);
        assert_eq!(head.fc2.weight.val().dims(), [30, 2]);
        assert!(head.skip.is_none());

        let skip = ConvHead::<TestBackend>::new(16, 2, &params(), true, &device).unwrap();
        let skip_fc = &skip.skip.as_ref().unwrap().fc;
        assert_eq!(skip_fc.weight.val().dims(), [16, 60]);
        assert!(skip_fc.bias.is_none());
    }

    #[test]
    fn test_hidden_width_follows_each_heads_input() {
        let device = Default::default();
        let nonlinear = NonLinearHead::<TestBackend>::new(16, 2, &params(), &device);
        assert_eq!(nonlinear.fc1.weight.val().dims(), [16, 8]);

        let wide = HeadParams {
            fc_hidden_size_ratio: 2.0,
            num_filters: 3,
            kernel_size: 4,
            ..params()
        };
        // 3 filters x 13 positions = 39 features, doubled
        let conv = ConvHead::<TestBackend>::new(16, 2, &wide, true, &device).unwrap();
        assert_eq!(conv.fc1.weight.val().dims(), [39, 78]);
    }

    #[test]
    fn test_oversized_kernel_is_rejected() {
        let device = Default::default();
        let params = HeadParams {
            kernel_size: 17,
            ..params()
        };
        assert!(ConvHead::<TestBackend>::new(16, 2, &params, false, &device).is_err());
    }

    #[test]
    fn test_heads_train_in_autodiff() {
        type AdBackend = Autodiff<TestBackend>;
        let device = Default::default();
        let head = ClassifierHead::<AdBackend>::new(ClassifierKind::ConvSkip, 8, 2, &params(), &device).unwrap();
        let x = Tensor::<AdBackend, 2>::ones([4, 8], &device);
        let grads = head.forward(x).sum().backward();
        let grads = burn::optim::GradientsParams::from_grads(grads, &head);
        assert!(!grads.is_empty());
    }
}
