//! Command-line flags shared by the `medxfer train` subcommand and the
//! `predictions` binary

use clap::{ArgAction, Args};

use crate::config::{
    Backbone, ClassifierKind, ExperimentConfig, LrDecay, PretrainSource, RunOptions, Structure, Task,
};
use crate::utils::error::Result;

/// Flags describing a single run
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Task / data directory (acl, breast, hemorrhage, thyroid)
    #[arg(long, default_value = "breast")]
    pub data_dir: Task,

    /// Pretraining source (ImageNet, RadImageNet, none)
    #[arg(long, default_value = "ImageNet")]
    pub database: PretrainSource,

    /// Backbone network (ResNet18, ResNet50, DenseNet121)
    #[arg(long, default_value = "ResNet50")]
    pub backbone_model_name: Backbone,

    /// Classifier head (Linear, NonLinear, Conv, ConvSkip)
    #[arg(long, default_value = "Linear")]
    pub clf: ClassifierKind,

    #[arg(long, default_value = "128")]
    pub batch_size: usize,

    #[arg(long, default_value = "256")]
    pub image_size: usize,

    /// Number of training epochs
    #[arg(long, default_value = "5")]
    pub epoch: usize,

    /// Backbone freezing: freezeall, unfreezeall or unfreezetop<N>
    #[arg(long, default_value = "freezeall")]
    pub structure: Structure,

    #[arg(long, default_value = "0.0001")]
    pub lr: f64,

    /// beta (exponential), cosine or none
    #[arg(long, default_value = "beta")]
    pub lr_decay_method: LrDecay,

    /// Per-epoch decay factor for the beta schedule
    #[arg(long, default_value = "0.8")]
    pub lr_decay_beta: f64,

    #[arg(long, default_value = "0.5")]
    pub dropout_prob: f64,

    /// Hidden width of the head as a fraction of the backbone feature width
    #[arg(long, default_value = "0.5")]
    pub fc_hidden_size_ratio: f64,

    /// Filters of the convolutional heads
    #[arg(long, default_value = "16")]
    pub num_filters: usize,

    /// Kernel size of the convolutional heads
    #[arg(long, default_value = "2")]
    pub kernel_size: usize,

    /// Log the training loss every N iterations
    #[arg(long, default_value = "100")]
    pub log_every: usize,

    /// Mixed precision (`--amp false` to disable)
    #[arg(long, default_value = "true", action = ArgAction::Set)]
    pub amp: bool,

    /// Repeat the run over cross-validation folds
    #[arg(long, default_value = "false")]
    pub use_folds: bool,

    #[arg(long, default_value = "5")]
    pub num_folds: usize,

    /// Random seed for splits, shuffling and augmentation
    #[arg(long, default_value = "42")]
    pub seed: u64,
}

impl RunArgs {
    /// Build and validate the run configuration
    pub fn to_config(&self) -> Result<ExperimentConfig> {
        let config = ExperimentConfig {
            task: self.data_dir,
            backbone: self.backbone_model_name,
            pretrain: self.database,
            classifier: self.clf,
            structure: self.structure,
            learning_rate: self.lr,
            batch_size: self.batch_size,
            dropout_prob: self.dropout_prob,
            fc_hidden_size_ratio: self.fc_hidden_size_ratio,
            num_filters: self.num_filters,
            kernel_size: self.kernel_size,
            epochs: self.epoch,
            image_size: self.image_size,
            lr_decay: self.lr_decay_method,
            lr_decay_beta: self.lr_decay_beta,
            fold: None,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_options(&self) -> Result<RunOptions> {
        let options = RunOptions {
            amp: self.amp,
            log_every: self.log_every,
            seed: self.seed,
            use_folds: self.use_folds,
            num_folds: self.num_folds,
        };
        options.validate()?;
        Ok(options)
    }

    /// The configs this invocation runs: one, or one per fold
    pub fn configs(&self) -> Result<Vec<ExperimentConfig>> {
        let config = self.to_config()?;
        let options = self.to_options()?;
        Ok(if options.use_folds {
            config.fold_variants(options.num_folds)
        } else {
            vec![config]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        run: RunArgs,
    }

    #[test]
    fn test_defaults_match_config_defaults() {
        let cli = TestCli::parse_from(["test"]);
        assert_eq!(cli.run.to_config().unwrap(), ExperimentConfig::default());
        assert_eq!(cli.run.to_options().unwrap(), RunOptions::default());
    }

    #[test]
    fn test_flags_build_config() {
        let cli = TestCli::parse_from([
            "test",
            "--data-dir",
            "acl",
            "--backbone-model-name",
            "DenseNet121",
            "--clf",
            "ConvSkip",
            "--structure",
            "unfreezetop2",
            "--lr",
            "0.001",
            "--amp",
            "false",
            "--use-folds",
            "--num-folds",
            "3",
        ]);
        let config = cli.run.to_config().unwrap();
        assert_eq!(config.task, Task::Acl);
        assert_eq!(config.backbone, Backbone::DenseNet121);
        assert_eq!(config.classifier, ClassifierKind::ConvSkip);
        assert_eq!(config.structure, Structure::UnfreezeTop(2));
        assert!(!cli.run.to_options().unwrap().amp);
        assert_eq!(cli.run.configs().unwrap().len(), 3);
    }

    #[test]
    fn test_bad_structure_is_rejected() {
        assert!(TestCli::try_parse_from(["test", "--structure", "freezesome"]).is_err());
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let cli = TestCli::parse_from(["test", "--dropout-prob", "1.5"]);
        assert!(cli.run.to_config().is_err());
    }
}
