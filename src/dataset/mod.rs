//! Dataset module: split management, image decoding and batching
//!
//! - [`loader`]: reads per-task split tables (or builds them from class folders)
//! - [`split`]: stratified hold-out and k-fold splitting
//! - [`augmentation`]: seeded flip / brightness jitter for training passes
//! - [`burn_dataset`]: Burn `Dataset` impl, batcher and split loaders

pub mod augmentation;
pub mod burn_dataset;
pub mod loader;
pub mod split;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{ExperimentConfig, ProjectPaths, RunOptions};
use crate::utils::error::Result;

pub use augmentation::Augmenter;
pub use burn_dataset::{BatchOrder, ImageBatch, ImageBatcher, ImageDataset, ImageItem, SplitLoader};
pub use loader::TaskDataLoader;
pub use split::{DatasetSplits, SplitConfig};

/// One labeled image on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub path: PathBuf,
    pub label: usize,
}

/// Batch iterators for the three splits of a run
#[derive(Debug, Clone)]
pub struct SplitLoaders {
    pub train: SplitLoader,
    pub val: SplitLoader,
    pub test: SplitLoader,
}

impl SplitLoaders {
    /// Load the task's splits (selecting the configured fold, if any) and wrap
    /// them in loaders. Only the training split is augmented.
    pub fn for_experiment(
        paths: &ProjectPaths,
        config: &ExperimentConfig,
        options: &RunOptions,
    ) -> Result<Self> {
        let splits = TaskDataLoader::new(config.task, paths.task_dir(config.task), options.seed).load()?;
        let splits = match config.fold {
            Some(fold) => splits.into_fold(options.num_folds, fold, options.seed)?,
            None => splits,
        };

        tracing::info!(
            "Data {}: train {} | val {} | test {}",
            config.task,
            splits.train.len(),
            splits.val.len(),
            splits.test.len()
        );

        let make = |samples: Vec<Sample>| ImageDataset::new(samples, config.image_size);

        Ok(Self {
            train: SplitLoader::new(
                make(splits.train).with_augmentation(Augmenter::default()),
                config.batch_size,
            ),
            val: SplitLoader::new(make(splits.val), config.batch_size),
            test: SplitLoader::new(make(splits.test), config.batch_size),
        })
    }
}
