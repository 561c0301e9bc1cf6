//! Model assembly
//!
//! A [`FullModel`] is a backbone (ResNet / DenseNet feature extractor with
//! its ImageNet head removed) followed by one of the classifier heads.

pub mod backbone;
pub mod classifier;
pub mod densenet;
pub mod freeze;
pub mod pretrained;
pub mod resnet;

use std::path::Path;

use burn::{
    module::Module,
    tensor::{backend::Backend, Tensor},
};

use crate::config::{ExperimentConfig, PretrainSource};
use crate::utils::error::Result;

pub use backbone::BackboneNet;
pub use classifier::{ClassifierHead, HeadParams};
pub use freeze::{apply_structure, FreezePlan, FreezeReport};

/// Backbone + classifier head
#[derive(Module, Debug)]
pub struct FullModel<B: Backend> {
    pub backbone: BackboneNet<B>,
    pub head: ClassifierHead<B>,
}

impl<B: Backend> FullModel<B> {
    /// `[batch, 3, H, W]` images -> `[batch, num_classes]` logits
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(images))
    }
}

/// Assemble the model for `config`.
///
/// With `load_pretrained` unset the backbone is randomly initialised
/// regardless of the configured source; callers that restore a checkpoint
/// afterwards use this to skip the weight download. The freeze structure is
/// applied after any weights are loaded.
pub fn build_model<B: Backend>(
    config: &ExperimentConfig,
    weights_dir: &Path,
    load_pretrained: bool,
    device: &B::Device,
) -> Result<(FullModel<B>, FreezeReport)> {
    let source = if load_pretrained {
        config.pretrain
    } else {
        PretrainSource::None
    };
    let backbone = pretrained::load_backbone(config.backbone, source, weights_dir, device)?;
    let (backbone, report) = apply_structure(backbone, config.structure);

    let head = ClassifierHead::new(
        config.classifier,
        backbone.num_features(),
        config.task.num_classes(),
        &HeadParams::from(config),
        device,
    )?;
    tracing::info!(
        "Model: {} backbone ({} features) + {} head",
        config.backbone,
        backbone.num_features(),
        config.classifier
    );

    Ok((FullModel { backbone, head }, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Backbone, ClassifierKind, Structure};
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    #[test]
    fn test_build_scratch_model() {
        let temp = TempDir::new().unwrap();
        let config = ExperimentConfig {
            backbone: Backbone::ResNet18,
            pretrain: PretrainSource::None,
            classifier: ClassifierKind::NonLinear,
            structure: Structure::UnfreezeTop(3),
            ..ExperimentConfig::default()
        };
        let device = Default::default();
        let (model, report) = build_model::<TestBackend>(&config, temp.path(), true, &device).unwrap();
        assert!(report.trainable_params > 0);
        let logits = model.forward(Tensor::zeros([2, 3, 32, 32], &device));
        assert_eq!(logits.dims(), [2, 2]);
    }

    #[test]
    fn test_skipping_pretrained_ignores_missing_weights() {
        let temp = TempDir::new().unwrap();
        let config = ExperimentConfig {
            backbone: Backbone::ResNet18,
            pretrain: PretrainSource::RadImageNet,
            ..ExperimentConfig::default()
        };
        let device = Default::default();
        assert!(build_model::<TestBackend>(&config, temp.path(), true, &device).is_err());
        assert!(build_model::<TestBackend>(&config, temp.path(), false, &device).is_ok());
    }
}
