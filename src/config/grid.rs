//! Hyperparameter grid for `runall`
//!
//! Every field is one axis of the grid. Expansion takes the cartesian product
//! in declaration order (task outermost, kernel size innermost) and yields a
//! fresh, validated [`ExperimentConfig`] per grid point.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::{
    Backbone, ClassifierKind, ExperimentConfig, LrDecay, PretrainSource, RunOptions, Structure,
    Task,
};
use crate::utils::error::{ExperimentError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSpec {
    pub tasks: Vec<Task>,
    pub databases: Vec<PretrainSource>,
    pub backbones: Vec<Backbone>,
    pub classifiers: Vec<ClassifierKind>,
    pub learning_rates: Vec<f64>,
    pub batch_sizes: Vec<usize>,
    pub image_sizes: Vec<usize>,
    pub epochs: Vec<usize>,
    pub structures: Vec<Structure>,
    pub lr_decay_methods: Vec<LrDecay>,
    pub lr_decay_betas: Vec<f64>,
    pub dropout_probs: Vec<f64>,
    pub fc_hidden_size_ratios: Vec<f64>,
    pub num_filters: Vec<usize>,
    pub kernel_sizes: Vec<usize>,
    /// Options applied to every run of the grid
    pub run: RunOptions,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            tasks: vec![Task::Breast, Task::Acl],
            databases: vec![PretrainSource::ImageNet, PretrainSource::RadImageNet],
            backbones: vec![Backbone::ResNet50, Backbone::DenseNet121],
            classifiers: ClassifierKind::ALL.to_vec(),
            learning_rates: vec![1e-4],
            batch_sizes: vec![128],
            image_sizes: vec![256],
            epochs: vec![5],
            structures: vec![Structure::FreezeAll],
            lr_decay_methods: vec![LrDecay::Beta, LrDecay::Cosine],
            lr_decay_betas: vec![0.8],
            dropout_probs: vec![0.5],
            fc_hidden_size_ratios: vec![0.5, 2.0],
            num_filters: vec![16],
            kernel_sizes: vec![2],
            run: RunOptions::default(),
        }
    }
}

/// Multiply every config by the values of one axis
fn axis<T: Clone>(
    configs: Vec<ExperimentConfig>,
    values: &[T],
    set: impl Fn(&mut ExperimentConfig, T),
) -> Vec<ExperimentConfig> {
    let set = &set;
    configs
        .into_iter()
        .flat_map(|config| {
            values.iter().cloned().map(move |value| {
                let mut next = config.clone();
                set(&mut next, value);
                next
            })
        })
        .collect()
}

impl GridSpec {
    /// Number of grid points before de-duplication and fold expansion
    pub fn size(&self) -> usize {
        [
            self.tasks.len(),
            self.databases.len(),
            self.backbones.len(),
            self.classifiers.len(),
            self.learning_rates.len(),
            self.batch_sizes.len(),
            self.image_sizes.len(),
            self.epochs.len(),
            self.structures.len(),
            self.lr_decay_methods.len(),
            self.lr_decay_betas.len(),
            self.dropout_probs.len(),
            self.fc_hidden_size_ratios.len(),
            self.num_filters.len(),
            self.kernel_sizes.len(),
        ]
        .iter()
        .product()
    }

    /// Expand the grid into validated, unique run configs.
    ///
    /// Grid points that encode to an already-seen parameter string are dropped
    /// with a warning, so no two runs of one grid share a checkpoint path.
    pub fn expand(&self) -> Result<Vec<ExperimentConfig>> {
        if self.size() == 0 {
            return Err(ExperimentError::Config(
                "grid has an empty axis; nothing to run".to_string(),
            ));
        }
        self.run.validate()?;

        let mut configs = vec![ExperimentConfig::default()];
        configs = axis(configs, &self.tasks, |c, v| c.task = v);
        configs = axis(configs, &self.databases, |c, v| c.pretrain = v);
        configs = axis(configs, &self.backbones, |c, v| c.backbone = v);
        configs = axis(configs, &self.classifiers, |c, v| c.classifier = v);
        configs = axis(configs, &self.learning_rates, |c, v| c.learning_rate = v);
        configs = axis(configs, &self.batch_sizes, |c, v| c.batch_size = v);
        configs = axis(configs, &self.image_sizes, |c, v| c.image_size = v);
        configs = axis(configs, &self.epochs, |c, v| c.epochs = v);
        configs = axis(configs, &self.structures, |c, v| c.structure = v);
        configs = axis(configs, &self.lr_decay_methods, |c, v| c.lr_decay = v);
        configs = axis(configs, &self.lr_decay_betas, |c, v| c.lr_decay_beta = v);
        configs = axis(configs, &self.dropout_probs, |c, v| c.dropout_prob = v);
        configs = axis(configs, &self.fc_hidden_size_ratios, |c, v| c.fc_hidden_size_ratio = v);
        configs = axis(configs, &self.num_filters, |c, v| c.num_filters = v);
        configs = axis(configs, &self.kernel_sizes, |c, v| c.kernel_size = v);

        if self.run.use_folds {
            configs = configs
                .iter()
                .flat_map(|config| config.fold_variants(self.run.num_folds))
                .collect();
        }

        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(configs.len());
        for config in configs {
            config.validate()?;
            let param_str = config.param_str()?;
            if seen.insert(param_str.clone()) {
                unique.push(config);
            } else {
                tracing::warn!("Skipping duplicate grid point {}", param_str);
            }
        }
        Ok(unique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grid_size() {
        let grid = GridSpec::default();
        // 2 tasks x 2 databases x 2 backbones x 4 heads x 2 decays x 2 ratios
        assert_eq!(grid.size(), 128);
        assert_eq!(grid.expand().unwrap().len(), 128);
    }

    #[test]
    fn test_outer_axis_varies_slowest() {
        let configs = GridSpec::default().expand().unwrap();
        assert_eq!(configs[0].task, Task::Breast);
        assert_eq!(configs[63].task, Task::Breast);
        assert_eq!(configs[64].task, Task::Acl);
        assert_eq!(configs[0].fc_hidden_size_ratio, 0.5);
        assert_eq!(configs[1].fc_hidden_size_ratio, 2.0);
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let grid = GridSpec {
            tasks: vec![Task::Acl, Task::Acl],
            databases: vec![PretrainSource::ImageNet],
            backbones: vec![Backbone::ResNet18],
            classifiers: vec![ClassifierKind::Linear],
            lr_decay_methods: vec![LrDecay::None],
            fc_hidden_size_ratios: vec![1.0],
            ..GridSpec::default()
        };
        assert_eq!(grid.size(), 2);
        assert_eq!(grid.expand().unwrap().len(), 1);
    }

    #[test]
    fn test_folds_multiply_runs() {
        let grid = GridSpec {
            tasks: vec![Task::Acl],
            databases: vec![PretrainSource::ImageNet],
            backbones: vec![Backbone::ResNet18],
            classifiers: vec![ClassifierKind::Linear],
            lr_decay_methods: vec![LrDecay::Beta],
            fc_hidden_size_ratios: vec![1.0],
            run: RunOptions {
                use_folds: true,
                num_folds: 3,
                ..RunOptions::default()
            },
            ..GridSpec::default()
        };
        let configs = grid.expand().unwrap();
        assert_eq!(configs.len(), 3);
        assert!(configs.iter().all(|c| c.fold.is_some()));
    }

    #[test]
    fn test_bundled_grid_file_parses() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("configs/grid.toml");
        let grid: GridSpec = crate::config::settings::load_toml_config(&path).unwrap();
        assert_eq!(grid.structures, vec![Structure::FreezeAll, Structure::UnfreezeTop(2)]);
        assert_eq!(grid.expand().unwrap().len(), 256);
    }

    #[test]
    fn test_empty_axis_is_rejected() {
        let grid = GridSpec {
            backbones: vec![],
            ..GridSpec::default()
        };
        assert!(grid.expand().is_err());
    }

    #[test]
    fn test_invalid_point_is_rejected() {
        let grid = GridSpec {
            dropout_probs: vec![1.5],
            ..GridSpec::default()
        };
        assert!(grid.expand().is_err());
    }
}
