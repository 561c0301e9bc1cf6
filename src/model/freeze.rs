//! Fine-tuning structure
//!
//! Turns a [`Structure`] into a per-stage frozen mask over the backbone's
//! structural sublayers and applies it. The classifier head is never frozen.

use burn::{module::Module, tensor::backend::Backend};

use super::backbone::BackboneNet;
use crate::config::Structure;

/// Frozen flag per backbone stage, in stage order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreezePlan {
    frozen: Vec<bool>,
}

impl FreezePlan {
    /// `unfreezetop0` freezes everything; a count beyond the stage total
    /// unfreezes everything.
    pub fn new(structure: Structure, num_stages: usize) -> Self {
        let trainable_from = match structure {
            Structure::FreezeAll => num_stages,
            Structure::UnfreezeAll => 0,
            Structure::UnfreezeTop(n) => num_stages.saturating_sub(n),
        };
        Self {
            frozen: (0..num_stages).map(|stage| stage < trainable_from).collect(),
        }
    }

    pub fn frozen(&self) -> &[bool] {
        &self.frozen
    }

    pub fn is_frozen(&self, stage: usize) -> bool {
        self.frozen.get(stage).copied().unwrap_or(false)
    }
}

/// What a freeze pass left trainable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreezeReport {
    pub trainable_stages: Vec<&'static str>,
    pub trainable_params: usize,
    pub total_params: usize,
}

/// Freeze the backbone according to `structure`
pub fn apply_structure<B: Backend>(
    backbone: BackboneNet<B>,
    structure: Structure,
) -> (BackboneNet<B>, FreezeReport) {
    let names = backbone.stage_names();
    let counts = backbone.stage_param_counts();
    let plan = FreezePlan::new(structure, names.len());

    let trainable_stages = names
        .iter()
        .enumerate()
        .filter(|(stage, _)| !plan.is_frozen(*stage))
        .map(|(_, name)| *name)
        .collect();
    let trainable_params = counts
        .iter()
        .enumerate()
        .filter(|(stage, _)| !plan.is_frozen(*stage))
        .map(|(_, count)| count)
        .sum();
    let report = FreezeReport {
        trainable_stages,
        trainable_params,
        total_params: backbone.num_params(),
    };

    tracing::info!(
        "Structure {structure}: {} / {} backbone parameters trainable",
        report.trainable_params,
        report.total_params
    );
    tracing::debug!("Trainable stages: {:?}", report.trainable_stages);

    (backbone.freeze_stages(plan.frozen()), report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backbone;
    use crate::model::classifier::{ClassifierHead, LinearHead};
    use crate::model::resnet::RESNET_STAGES;
    use crate::model::FullModel;
    use burn::backend::Autodiff;
    use burn::module::{ModuleVisitor, ParamId};
    use burn::optim::GradientsParams;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_plan_masks() {
        assert_eq!(FreezePlan::new(Structure::FreezeAll, 3).frozen(), &[true, true, true]);
        assert_eq!(FreezePlan::new(Structure::UnfreezeAll, 3).frozen(), &[false, false, false]);
        assert_eq!(FreezePlan::new(Structure::UnfreezeTop(1), 3).frozen(), &[true, true, false]);
        assert_eq!(FreezePlan::new(Structure::UnfreezeTop(0), 3).frozen(), &[true, true, true]);
        assert_eq!(FreezePlan::new(Structure::UnfreezeTop(9), 3).frozen(), &[false, false, false]);
    }

    fn grad_count(backbone: &BackboneNet<TestBackend>) -> usize {
        let device = Default::default();
        // Input tracks gradients so the graph exists even with a frozen backbone.
        let input = Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device).require_grad();
        let grads = backbone.forward(input).sum().backward();
        GradientsParams::from_grads(grads, backbone).len()
    }

    #[test]
    fn test_freeze_all_leaves_no_backbone_gradients() {
        let device = Default::default();
        let backbone = BackboneNet::<TestBackend>::new(Backbone::ResNet18, &device);
        let (backbone, report) = apply_structure(backbone, Structure::FreezeAll);
        assert_eq!(report.trainable_params, 0);
        assert!(report.trainable_stages.is_empty());
        assert_eq!(grad_count(&backbone), 0);
    }

    /// Counts the visited tensors that received a gradient
    struct GradCounter<'a> {
        grads: &'a GradientsParams,
        with_grad: usize,
    }

    impl ModuleVisitor<TestBackend> for GradCounter<'_> {
        fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<TestBackend, D>) {
            if self.grads.get::<NdArray, D>(id).is_some() {
                self.with_grad += 1;
            }
        }
    }

    #[test]
    fn test_unfreeze_top_two_trains_last_block_only() {
        let device = Default::default();
        let backbone = BackboneNet::<TestBackend>::new(Backbone::ResNet18, &device);
        let (backbone, report) = apply_structure(backbone, Structure::UnfreezeTop(2));
        // Top two stages of a ResNet are layer4 and the parameterless avgpool.
        assert_eq!(report.trainable_stages, vec!["layer4", "avgpool"]);

        let model = FullModel {
            backbone,
            head: ClassifierHead::Linear(LinearHead::new(512, 2, &device)),
        };
        let input = Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device);
        let grads = GradientsParams::from_grads(model.forward(input).sum().backward(), &model);

        let BackboneNet::ResNet18(net) = &model.backbone else {
            panic!("expected a ResNet18 backbone");
        };
        let mut per_stage = Vec::new();
        for (stage, name) in RESNET_STAGES.iter().enumerate() {
            let mut counter = GradCounter {
                grads: &grads,
                with_grad: 0,
            };
            net.visit_stage(stage, &mut counter);
            per_stage.push((*name, counter.with_grad));
        }
        for (name, with_grad) in &per_stage {
            if *name != "layer4" {
                assert_eq!(*with_grad, 0, "{name} should be frozen");
            }
        }

        // layer4: two basic blocks (conv weights plus batch-norm gamma/beta)
        // and the first block's projection shortcut.
        let layer4 = per_stage[7].1;
        assert_eq!(layer4, 15);
        // Linear head: weight and bias.
        assert_eq!(grads.len(), layer4 + 2);
    }

    #[test]
    fn test_unfreeze_all_keeps_every_parameter() {
        let device = Default::default();
        let backbone = BackboneNet::<TestBackend>::new(Backbone::ResNet18, &device);
        let (_, report) = apply_structure(backbone, Structure::UnfreezeAll);
        assert_eq!(report.trainable_params, report.total_params);
        assert_eq!(report.trainable_stages.len(), 9);
    }
}
