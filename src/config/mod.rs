//! Experiment configuration
//!
//! An [`ExperimentConfig`] is the identity of one run: everything that ends up
//! in the run's parameter string and therefore in every file name the run
//! produces. Options that do not change *what* is trained (AMP, logging
//! interval, seed) live in [`RunOptions`] instead.
//!
//! Configs are built once, validated, and then passed around by reference.
//! The grid driver constructs a fresh one per grid point.

pub mod grid;
pub mod param_str;
pub mod settings;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::error::{ExperimentError, Result};

pub use grid::GridSpec;
pub use param_str::{ParamKey, ParamSet};
pub use settings::{ProjectPaths, Settings};

/// Number of output classes for every supported task (binary diagnosis).
pub const NUM_CLASSES: usize = 2;

/// Classification task; doubles as the data directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Acl,
    Breast,
    Hemorrhage,
    Thyroid,
}

impl Task {
    pub const ALL: [Task; 4] = [Task::Acl, Task::Breast, Task::Hemorrhage, Task::Thyroid];

    /// Name of the label column in the task's split tables
    pub fn target_column(&self) -> &'static str {
        match self {
            Task::Acl => "acl_label",
            Task::Breast | Task::Hemorrhage | Task::Thyroid => "label",
        }
    }

    pub fn num_classes(&self) -> usize {
        NUM_CLASSES
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Task::Acl => "acl",
            Task::Breast => "breast",
            Task::Hemorrhage => "hemorrhage",
            Task::Thyroid => "thyroid",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Task {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self> {
        Task::ALL
            .into_iter()
            .find(|task| task.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| ExperimentError::Config(format!("Invalid data dir '{s}'")))
    }
}

/// Feature-extraction network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backbone {
    ResNet18,
    ResNet50,
    DenseNet121,
}

impl Backbone {
    pub const ALL: [Backbone; 3] = [Backbone::ResNet18, Backbone::ResNet50, Backbone::DenseNet121];

    /// Width of the pooled feature vector fed to the classifier head
    pub fn num_features(&self) -> usize {
        match self {
            Backbone::ResNet18 => 512,
            Backbone::ResNet50 => 2048,
            Backbone::DenseNet121 => 1024,
        }
    }
}

impl fmt::Display for Backbone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backbone::ResNet18 => "ResNet18",
            Backbone::ResNet50 => "ResNet50",
            Backbone::DenseNet121 => "DenseNet121",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Backbone {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self> {
        Backbone::ALL
            .into_iter()
            .find(|b| b.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| ExperimentError::Config(format!("Unsupported backbone '{s}'")))
    }
}

/// Where the backbone's initial weights come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PretrainSource {
    ImageNet,
    RadImageNet,
    /// Random initialisation
    #[serde(rename = "none")]
    None,
}

impl fmt::Display for PretrainSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PretrainSource::ImageNet => "ImageNet",
            PretrainSource::RadImageNet => "RadImageNet",
            PretrainSource::None => "none",
        };
        write!(f, "{name}")
    }
}

impl FromStr for PretrainSource {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "imagenet" => Ok(PretrainSource::ImageNet),
            "radimagenet" => Ok(PretrainSource::RadImageNet),
            "none" | "scratch" => Ok(PretrainSource::None),
            _ => Err(ExperimentError::Config(format!("Unsupported database '{s}'"))),
        }
    }
}

/// Classifier head placed on top of the backbone features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassifierKind {
    Linear,
    NonLinear,
    Conv,
    ConvSkip,
}

impl ClassifierKind {
    pub const ALL: [ClassifierKind; 4] = [
        ClassifierKind::Linear,
        ClassifierKind::NonLinear,
        ClassifierKind::Conv,
        ClassifierKind::ConvSkip,
    ];
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClassifierKind::Linear => "Linear",
            ClassifierKind::NonLinear => "NonLinear",
            ClassifierKind::Conv => "Conv",
            ClassifierKind::ConvSkip => "ConvSkip",
        };
        write!(f, "{name}")
    }
}

impl FromStr for ClassifierKind {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self> {
        ClassifierKind::ALL
            .into_iter()
            .find(|kind| kind.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| ExperimentError::UnsupportedClassifier(s.to_string()))
    }
}

/// Which backbone parameters stay trainable.
///
/// Grammar: `freezeall | unfreezeall | unfreezetop<N>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Structure {
    FreezeAll,
    UnfreezeAll,
    /// Unfreeze the last N structural sublayers of the backbone
    UnfreezeTop(usize),
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Structure::FreezeAll => write!(f, "freezeall"),
            Structure::UnfreezeAll => write!(f, "unfreezeall"),
            Structure::UnfreezeTop(n) => write!(f, "unfreezetop{n}"),
        }
    }
}

impl FromStr for Structure {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "freezeall" => Ok(Structure::FreezeAll),
            "unfreezeall" => Ok(Structure::UnfreezeAll),
            _ => s
                .strip_prefix("unfreezetop")
                .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|digits| digits.parse::<usize>().ok())
                .map(Structure::UnfreezeTop)
                .ok_or_else(|| ExperimentError::InvalidStructure(s.to_string())),
        }
    }
}

impl TryFrom<String> for Structure {
    type Error = ExperimentError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Structure> for String {
    fn from(value: Structure) -> Self {
        value.to_string()
    }
}

/// Learning-rate decay method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LrDecay {
    /// Exponential decay by `lr_decay_beta` per epoch
    Beta,
    /// Cosine annealing over the run to a fifth of the initial rate
    Cosine,
    /// Constant learning rate
    None,
}

impl fmt::Display for LrDecay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LrDecay::Beta => "beta",
            LrDecay::Cosine => "cosine",
            LrDecay::None => "none",
        };
        write!(f, "{name}")
    }
}

impl FromStr for LrDecay {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "beta" => Ok(LrDecay::Beta),
            "cosine" => Ok(LrDecay::Cosine),
            "none" | "constant" => Ok(LrDecay::None),
            _ => Err(ExperimentError::Config(format!("Unsupported lr decay method '{s}'"))),
        }
    }
}

/// Identity of a single experiment run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub task: Task,
    pub backbone: Backbone,
    pub pretrain: PretrainSource,
    pub classifier: ClassifierKind,
    pub structure: Structure,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub dropout_prob: f64,
    pub fc_hidden_size_ratio: f64,
    pub num_filters: usize,
    pub kernel_size: usize,
    pub epochs: usize,
    pub image_size: usize,
    pub lr_decay: LrDecay,
    pub lr_decay_beta: f64,
    /// Cross-validation fold held out for validation, when folds are used
    #[serde(default)]
    pub fold: Option<usize>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            task: Task::Breast,
            backbone: Backbone::ResNet50,
            pretrain: PretrainSource::ImageNet,
            classifier: ClassifierKind::Linear,
            structure: Structure::FreezeAll,
            learning_rate: 1e-4,
            batch_size: 128,
            dropout_prob: 0.5,
            fc_hidden_size_ratio: 0.5,
            num_filters: 16,
            kernel_size: 2,
            epochs: 5,
            image_size: 256,
            lr_decay: LrDecay::Beta,
            lr_decay_beta: 0.8,
            fold: None,
        }
    }
}

impl ExperimentConfig {
    /// Check value ranges. Called once after construction; afterwards the
    /// config is treated as immutable.
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ExperimentError::invalid_param("lr", "must be a positive finite number"));
        }
        if self.batch_size == 0 {
            return Err(ExperimentError::invalid_param("batchsize", "must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.dropout_prob) {
            return Err(ExperimentError::invalid_param("dropprob", "must be in [0, 1)"));
        }
        if !(self.fc_hidden_size_ratio.is_finite() && self.fc_hidden_size_ratio > 0.0) {
            return Err(ExperimentError::invalid_param("fcsizeratio", "must be positive"));
        }
        if self.num_filters == 0 {
            return Err(ExperimentError::invalid_param("numfilters", "must be at least 1"));
        }
        if self.kernel_size == 0 || self.kernel_size > self.backbone.num_features() {
            return Err(ExperimentError::invalid_param(
                "kernelsize",
                format!("must be in 1..={}", self.backbone.num_features()),
            ));
        }
        if self.epochs == 0 {
            return Err(ExperimentError::invalid_param("epochs", "must be at least 1"));
        }
        if self.image_size < 32 {
            return Err(ExperimentError::invalid_param("imagesize", "must be at least 32"));
        }
        if !(self.lr_decay_beta.is_finite() && self.lr_decay_beta > 0.0) {
            return Err(ExperimentError::invalid_param("lrbeta", "must be positive"));
        }
        Ok(())
    }

    /// The canonical parameter set of this config
    pub fn param_set(&self) -> ParamSet {
        let mut set = ParamSet::new();
        set.insert(ParamKey::Data, self.task.to_string());
        set.insert(ParamKey::Backbone, self.backbone.to_string());
        set.insert(ParamKey::Pretrain, self.pretrain.to_string());
        set.insert(ParamKey::Clf, self.classifier.to_string());
        set.insert(ParamKey::Structure, self.structure.to_string());
        set.insert(ParamKey::Lr, self.learning_rate.to_string());
        set.insert(ParamKey::BatchSize, self.batch_size.to_string());
        set.insert(ParamKey::DropProb, self.dropout_prob.to_string());
        set.insert(ParamKey::FcSizeRatio, self.fc_hidden_size_ratio.to_string());
        set.insert(ParamKey::NumFilters, self.num_filters.to_string());
        set.insert(ParamKey::KernelSize, self.kernel_size.to_string());
        set.insert(ParamKey::Epochs, self.epochs.to_string());
        set.insert(ParamKey::ImageSize, self.image_size.to_string());
        set.insert(ParamKey::LrDecay, self.lr_decay.to_string());
        set.insert(ParamKey::LrBeta, self.lr_decay_beta.to_string());
        if let Some(fold) = self.fold {
            set.insert(ParamKey::Fold, fold.to_string());
        }
        set
    }

    /// Filename-safe identifier shared by every artifact of this run
    pub fn param_str(&self) -> Result<String> {
        self.param_set().encode()
    }

    /// Rebuild a config from a decoded parameter set. Every identity key
    /// except `fold` must be present.
    pub fn from_param_set(set: &ParamSet) -> Result<Self> {
        fn field<T: FromStr>(set: &ParamSet, key: ParamKey) -> Result<T> {
            let raw = set
                .get(key)
                .ok_or_else(|| ExperimentError::invalid_param(key.as_str(), "missing"))?;
            raw.parse::<T>()
                .map_err(|_| ExperimentError::invalid_param(key.as_str(), format!("cannot parse '{raw}'")))
        }

        let fold = match set.get(ParamKey::Fold) {
            Some(_) => Some(field::<usize>(set, ParamKey::Fold)?),
            None => None,
        };

        let config = Self {
            task: field(set, ParamKey::Data)?,
            backbone: field(set, ParamKey::Backbone)?,
            pretrain: field(set, ParamKey::Pretrain)?,
            classifier: field(set, ParamKey::Clf)?,
            structure: field(set, ParamKey::Structure)?,
            learning_rate: field(set, ParamKey::Lr)?,
            batch_size: field(set, ParamKey::BatchSize)?,
            dropout_prob: field(set, ParamKey::DropProb)?,
            fc_hidden_size_ratio: field(set, ParamKey::FcSizeRatio)?,
            num_filters: field(set, ParamKey::NumFilters)?,
            kernel_size: field(set, ParamKey::KernelSize)?,
            epochs: field(set, ParamKey::Epochs)?,
            image_size: field(set, ParamKey::ImageSize)?,
            lr_decay: field(set, ParamKey::LrDecay)?,
            lr_decay_beta: field(set, ParamKey::LrBeta)?,
            fold,
        };
        config.validate()?;
        Ok(config)
    }

    /// One copy of this config per cross-validation fold
    pub fn fold_variants(&self, num_folds: usize) -> Vec<ExperimentConfig> {
        (0..num_folds)
            .map(|fold| ExperimentConfig {
                fold: Some(fold),
                ..self.clone()
            })
            .collect()
    }
}

/// Options that affect how a run executes but not its identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Request mixed precision (ignored with a warning on CPU backends)
    pub amp: bool,
    /// Log the training loss every N iterations
    pub log_every: usize,
    /// Seed for splits, shuffling and augmentation
    pub seed: u64,
    /// Repeat the run over cross-validation folds
    pub use_folds: bool,
    pub num_folds: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            amp: true,
            log_every: 100,
            seed: 42,
            use_folds: false,
            num_folds: 5,
        }
    }
}

impl RunOptions {
    pub fn validate(&self) -> Result<()> {
        if self.log_every == 0 {
            return Err(ExperimentError::Config("log_every must be at least 1".to_string()));
        }
        if self.use_folds && self.num_folds < 2 {
            return Err(ExperimentError::Config("num_folds must be at least 2".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_grammar() {
        assert_eq!("freezeall".parse::<Structure>().unwrap(), Structure::FreezeAll);
        assert_eq!("unfreezeall".parse::<Structure>().unwrap(), Structure::UnfreezeAll);
        assert_eq!("unfreezetop3".parse::<Structure>().unwrap(), Structure::UnfreezeTop(3));
        assert_eq!("unfreezetop0".parse::<Structure>().unwrap(), Structure::UnfreezeTop(0));

        for bad in ["unfreezetop", "unfreezetop-1", "unfreezetopX", "freeze", "FREEZEALL", ""] {
            assert!(
                matches!(bad.parse::<Structure>(), Err(ExperimentError::InvalidStructure(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_unknown_classifier_is_unsupported() {
        let err = "Transformer".parse::<ClassifierKind>().unwrap_err();
        assert!(matches!(err, ExperimentError::UnsupportedClassifier(name) if name == "Transformer"));
    }

    #[test]
    fn test_enum_names_round_trip() {
        for backbone in Backbone::ALL {
            assert_eq!(backbone.to_string().parse::<Backbone>().unwrap(), backbone);
        }
        for kind in ClassifierKind::ALL {
            assert_eq!(kind.to_string().parse::<ClassifierKind>().unwrap(), kind);
        }
        for task in Task::ALL {
            assert_eq!(task.to_string().parse::<Task>().unwrap(), task);
        }
    }

    #[test]
    fn test_task_target_columns() {
        assert_eq!(Task::Acl.target_column(), "acl_label");
        assert_eq!(Task::Breast.target_column(), "label");
        assert!("knee".parse::<Task>().is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        ExperimentConfig::default().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_oversized_kernel() {
        let config = ExperimentConfig {
            backbone: Backbone::ResNet18,
            kernel_size: 513,
            ..ExperimentConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_param_set_round_trips_through_config() {
        let config = ExperimentConfig {
            task: Task::Acl,
            backbone: Backbone::DenseNet121,
            pretrain: PretrainSource::RadImageNet,
            classifier: ClassifierKind::ConvSkip,
            structure: Structure::UnfreezeTop(2),
            fc_hidden_size_ratio: 2.0,
            lr_decay: LrDecay::Cosine,
            fold: Some(3),
            ..ExperimentConfig::default()
        };
        let encoded = config.param_str().unwrap();
        let decoded = ParamSet::decode(&encoded);
        assert_eq!(ExperimentConfig::from_param_set(&decoded).unwrap(), config);
    }

    #[test]
    fn test_fold_variants() {
        let folds = ExperimentConfig::default().fold_variants(3);
        assert_eq!(folds.len(), 3);
        assert_eq!(folds[2].fold, Some(2));
        assert_ne!(folds[0].param_str().unwrap(), folds[1].param_str().unwrap());
    }
}
