//! Backbone selection
//!
//! Wraps the three supported feature extractors behind one module type so
//! the rest of the crate can hold a `FullModel<B>` without generics over the
//! architecture.

use burn::{
    module::Module,
    tensor::{backend::Backend, Tensor},
};

use super::densenet::{DenseNet121, DENSENET_STAGES};
use super::resnet::{ResNet18, ResNet50, RESNET_STAGES};
use crate::config::Backbone;

#[derive(Module, Debug)]
pub enum BackboneNet<B: Backend> {
    ResNet18(ResNet18<B>),
    ResNet50(ResNet50<B>),
    DenseNet121(DenseNet121<B>),
}

impl<B: Backend> BackboneNet<B> {
    /// Randomly initialised backbone of the given kind
    pub fn new(kind: Backbone, device: &B::Device) -> Self {
        match kind {
            Backbone::ResNet18 => BackboneNet::ResNet18(ResNet18::new(device)),
            Backbone::ResNet50 => BackboneNet::ResNet50(ResNet50::new(device)),
            Backbone::DenseNet121 => BackboneNet::DenseNet121(DenseNet121::new(device)),
        }
    }

    pub fn kind(&self) -> Backbone {
        match self {
            BackboneNet::ResNet18(_) => Backbone::ResNet18,
            BackboneNet::ResNet50(_) => Backbone::ResNet50,
            BackboneNet::DenseNet121(_) => Backbone::DenseNet121,
        }
    }

    /// `[batch, 3, H, W]` images -> `[batch, num_features]` pooled features
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            BackboneNet::ResNet18(net) => net.forward(images),
            BackboneNet::ResNet50(net) => net.forward(images),
            BackboneNet::DenseNet121(net) => net.forward(images),
        }
    }

    pub fn num_features(&self) -> usize {
        self.kind().num_features()
    }

    /// Ordered structural sublayers; the unit `unfreezetop<N>` counts in
    pub fn stage_names(&self) -> &'static [&'static str] {
        match self {
            BackboneNet::ResNet18(_) | BackboneNet::ResNet50(_) => &RESNET_STAGES,
            BackboneNet::DenseNet121(_) => &DENSENET_STAGES,
        }
    }

    pub fn stage_param_counts(&self) -> Vec<usize> {
        match self {
            BackboneNet::ResNet18(net) => net.stage_param_counts(),
            BackboneNet::ResNet50(net) => net.stage_param_counts(),
            BackboneNet::DenseNet121(net) => net.stage_param_counts(),
        }
    }

    /// Disable gradients for the stages flagged in `frozen`
    pub fn freeze_stages(self, frozen: &[bool]) -> Self {
        match self {
            BackboneNet::ResNet18(net) => BackboneNet::ResNet18(net.freeze_stages(frozen)),
            BackboneNet::ResNet50(net) => BackboneNet::ResNet50(net.freeze_stages(frozen)),
            BackboneNet::DenseNet121(net) => BackboneNet::DenseNet121(net.freeze_stages(frozen)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_stage_tables_match_counts() {
        let device = Default::default();
        for kind in [Backbone::ResNet18, Backbone::DenseNet121] {
            let net = BackboneNet::<TestBackend>::new(kind, &device);
            assert_eq!(net.kind(), kind);
            assert_eq!(net.stage_names().len(), net.stage_param_counts().len());
            assert_eq!(net.stage_param_counts().iter().sum::<usize>(), net.num_params());
        }
    }

    #[test]
    fn test_feature_width_follows_kind() {
        let device = Default::default();
        let net = BackboneNet::<TestBackend>::new(Backbone::ResNet18, &device);
        let features = net.forward(Tensor::zeros([1, 3, 32, 32], &device));
        assert_eq!(features.dims(), [1, 512]);
    }
}
