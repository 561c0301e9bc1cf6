//! Best-model checkpoints
//!
//! A checkpoint is three files sharing the run's parameter string:
//! the model record (`best_model_<P>.mpk`), the optimizer record
//! (`best_optim_<P>.mpk`) and a JSON metadata sidecar (`best_model_<P>.json`).

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    optim::Optimizer,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::{AutodiffBackend, Backend},
};
use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::config::{ExperimentConfig, ProjectPaths};
use crate::model::FullModel;
use crate::utils::error::{ExperimentError, Result};

/// Recorder used for every checkpoint file
pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Metadata stored next to the model record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// 1-based epoch that produced the checkpoint
    pub epoch: usize,
    pub best_val_auc: f64,
    pub learning_rate: f64,
    pub saved_at: String,
    pub param_str: String,
    pub config: ExperimentConfig,
}

impl CheckpointMeta {
    pub fn new(config: &ExperimentConfig, epoch: usize, best_val_auc: f64, learning_rate: f64) -> Result<Self> {
        Ok(Self {
            epoch,
            best_val_auc,
            learning_rate,
            saved_at: Local::now().to_rfc3339(),
            param_str: config.param_str()?,
            config: config.clone(),
        })
    }
}

/// Tracks the best validation AUC seen so far.
///
/// Starts at negative infinity; only a strictly larger, non-NaN AUC counts
/// as an improvement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestTracker {
    best: f64,
    best_epoch: Option<usize>,
}

impl Default for BestTracker {
    fn default() -> Self {
        Self {
            best: f64::NEG_INFINITY,
            best_epoch: None,
        }
    }
}

impl BestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an epoch's validation AUC; returns true when it is a new best
    pub fn update(&mut self, epoch: usize, val_auc: f64) -> bool {
        if val_auc > self.best {
            self.best = val_auc;
            self.best_epoch = Some(epoch);
            true
        } else {
            false
        }
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}

/// File locations of one run's checkpoint.
///
/// Parameter strings contain dots, and the recorder replaces everything after
/// the last dot with its own extension, so full file names are kept here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    pub model: PathBuf,
    pub optimizer: PathBuf,
    pub meta: PathBuf,
}

impl CheckpointPaths {
    pub fn for_config(paths: &ProjectPaths, config: &ExperimentConfig) -> Result<Self> {
        let model_stem = paths.checkpoint_stem(config)?;
        Ok(Self {
            model: with_suffix(&model_stem, ".mpk"),
            optimizer: with_suffix(&paths.optimizer_stem(config)?, ".mpk"),
            meta: with_suffix(&model_stem, ".json"),
        })
    }

    pub fn exists(&self) -> bool {
        self.model.exists()
    }
}

fn with_suffix(stem: &Path, suffix: &str) -> PathBuf {
    let mut name = stem.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Overwrite the run's checkpoint with the current model and optimizer
pub fn save_checkpoint<B, O>(
    files: &CheckpointPaths,
    model: &FullModel<B>,
    optimizer: &O,
    meta: &CheckpointMeta,
) -> Result<()>
where
    B: AutodiffBackend,
    O: Optimizer<FullModel<B>, B>,
{
    if let Some(parent) = files.model.parent() {
        fs::create_dir_all(parent)?;
    }
    let recorder = CheckpointRecorder::new();
    model.clone().save_file(files.model.clone(), &recorder)?;
    recorder.record(optimizer.to_record(), files.optimizer.clone())?;
    fs::write(&files.meta, serde_json::to_string_pretty(meta)?)?;

    tracing::debug!("Checkpoint written to {:?}", files.model);
    Ok(())
}

/// Restore model weights from a checkpoint into `model`
pub fn load_model<B: Backend>(files: &CheckpointPaths, model: FullModel<B>, device: &B::Device) -> Result<FullModel<B>> {
    if !files.exists() {
        return Err(ExperimentError::CheckpointMissing(files.model.clone()));
    }
    let model = model.load_file(files.model.clone(), &CheckpointRecorder::new(), device)?;
    Ok(model)
}

pub fn load_meta(files: &CheckpointPaths) -> Result<CheckpointMeta> {
    if !files.meta.exists() {
        return Err(ExperimentError::CheckpointMissing(files.meta.clone()));
    }
    let meta = serde_json::from_str(&fs::read_to_string(&files.meta)?)?;
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Backbone, PretrainSource, Task};
    use crate::model::build_model;
    use burn::optim::SgdConfig;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_tracker_requires_strict_improvement() {
        let mut tracker = BestTracker::new();
        let improved: Vec<bool> = [0.60, 0.55, 0.70, 0.65, 0.70]
            .iter()
            .enumerate()
            .map(|(epoch, &auc)| tracker.update(epoch + 1, auc))
            .collect();
        assert_eq!(improved, vec![true, false, true, false, false]);
        assert_eq!(tracker.best(), 0.70);
        assert_eq!(tracker.best_epoch(), Some(3));
    }

    #[test]
    fn test_tracker_ignores_nan() {
        let mut tracker = BestTracker::new();
        assert!(!tracker.update(1, f64::NAN));
        assert_eq!(tracker.best_epoch(), None);
        assert!(tracker.update(2, 0.1));
        assert!(!tracker.update(3, f64::NAN));
    }

    #[test]
    fn test_checkpoint_files_follow_param_str() {
        let paths = ProjectPaths {
            data_root: PathBuf::from("data"),
            ..ProjectPaths::default()
        };
        let config = ExperimentConfig {
            task: Task::Thyroid,
            ..ExperimentConfig::default()
        };
        let files = CheckpointPaths::for_config(&paths, &config).unwrap();
        let p = config.param_str().unwrap();
        assert!(p.contains("lr_0.0001"));
        assert_eq!(files.model, PathBuf::from(format!("data/thyroid/models/best_model_{p}.mpk")));
        assert_eq!(files.meta, PathBuf::from(format!("data/thyroid/models/best_model_{p}.json")));
        assert_eq!(files.optimizer, PathBuf::from(format!("data/thyroid/models/best_optim_{p}.mpk")));
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let paths = ProjectPaths {
            data_root: temp.path().to_path_buf(),
            ..ProjectPaths::default()
        };
        let config = ExperimentConfig {
            backbone: Backbone::ResNet18,
            pretrain: PretrainSource::None,
            ..ExperimentConfig::default()
        };
        let device = Default::default();
        let (model, _) = build_model::<TestBackend>(&config, temp.path(), false, &device).unwrap();
        let optimizer = SgdConfig::new().init::<TestBackend, FullModel<TestBackend>>();

        let files = CheckpointPaths::for_config(&paths, &config).unwrap();
        let missing = load_model(&files, model.clone(), &device);
        assert!(matches!(missing, Err(ExperimentError::CheckpointMissing(_))));

        let meta = CheckpointMeta::new(&config, 2, 0.75, 1e-4).unwrap();
        save_checkpoint(&files, &model, &optimizer, &meta).unwrap();
        assert!(files.model.exists());
        assert!(files.optimizer.exists());

        let (fresh, _) = build_model::<TestBackend>(&config, temp.path(), false, &device).unwrap();
        assert!(load_model(&files, fresh, &device).is_ok());
        let loaded = load_meta(&files).unwrap();
        assert_eq!(loaded.epoch, 2);
        assert_eq!(loaded.config, config);
    }
}
