//! Stratified dataset splits
//!
//! Two strategies, both deterministic for a given seed:
//!
//! - **Hold-out**: every class is shuffled independently and cut into
//!   train / validation / test by fraction, so each split keeps the class
//!   balance of the full set.
//! - **K-fold**: the pooled train + validation samples are dealt round-robin
//!   into `k` folds per class; fold `i` becomes the validation set.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::dataset::Sample;
use crate::utils::error::{ExperimentError, Result};

/// Fractions for a hold-out split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction of each class held out for testing
    pub test_fraction: f64,
    /// Fraction of each class used for validation
    pub validation_fraction: f64,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.15,
            validation_fraction: 0.15,
            seed: 42,
        }
    }
}

impl SplitConfig {
    pub fn new(test_fraction: f64, validation_fraction: f64, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&test_fraction) {
            return Err(ExperimentError::Config(
                "Test fraction must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&validation_fraction) {
            return Err(ExperimentError::Config(
                "Validation fraction must be between 0.0 and 1.0".to_string(),
            ));
        }
        if test_fraction + validation_fraction >= 1.0 {
            return Err(ExperimentError::Config(
                "Test + validation fractions must be less than 1.0".to_string(),
            ));
        }
        Ok(Self {
            test_fraction,
            validation_fraction,
            seed,
        })
    }
}

/// The three splits every run trains, selects and reports on
#[derive(Debug, Clone, Default)]
pub struct DatasetSplits {
    pub train: Vec<Sample>,
    pub val: Vec<Sample>,
    pub test: Vec<Sample>,
}

impl DatasetSplits {
    pub fn total(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    /// Samples per class for a split, indexed by label
    pub fn class_distribution(samples: &[Sample], num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0usize; num_classes];
        for sample in samples {
            if sample.label < num_classes {
                counts[sample.label] += 1;
            }
        }
        counts
    }

    /// Replace train/val with fold `fold` of a stratified k-fold partition of
    /// their union. The test split is left untouched.
    pub fn into_fold(self, num_folds: usize, fold: usize, seed: u64) -> Result<Self> {
        if num_folds < 2 || fold >= num_folds {
            return Err(ExperimentError::Config(format!(
                "fold {fold} is out of range for {num_folds} folds"
            )));
        }

        let mut pooled = self.train;
        pooled.extend(self.val);

        let mut train = Vec::new();
        let mut val = Vec::new();
        for (_, mut members) in group_by_class(pooled) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            members.shuffle(&mut rng);
            for (i, sample) in members.into_iter().enumerate() {
                if i % num_folds == fold {
                    val.push(sample);
                } else {
                    train.push(sample);
                }
            }
        }

        Ok(Self {
            train,
            val,
            test: self.test,
        })
    }
}

fn group_by_class(samples: Vec<Sample>) -> BTreeMap<usize, Vec<Sample>> {
    let mut by_class: BTreeMap<usize, Vec<Sample>> = BTreeMap::new();
    for sample in samples {
        by_class.entry(sample.label).or_default().push(sample);
    }
    by_class
}

/// Stratified hold-out split
pub fn stratified_split(samples: Vec<Sample>, config: &SplitConfig) -> DatasetSplits {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut splits = DatasetSplits::default();

    for (_, mut members) in group_by_class(samples) {
        members.shuffle(&mut rng);
        let n = members.len();
        let n_test = (n as f64 * config.test_fraction).round() as usize;
        let n_val = (n as f64 * config.validation_fraction).round() as usize;
        let n_val = n_val.min(n - n_test);

        let mut rest = members.into_iter();
        splits.test.extend(rest.by_ref().take(n_test));
        splits.val.extend(rest.by_ref().take(n_val));
        splits.train.extend(rest);
    }

    splits
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn samples(per_class: usize) -> Vec<Sample> {
        (0..per_class * 2)
            .map(|i| Sample {
                path: PathBuf::from(format!("img_{i}.png")),
                label: i % 2,
            })
            .collect()
    }

    #[test]
    fn test_split_config_validation() {
        assert!(SplitConfig::new(0.2, 0.2, 1).is_ok());
        assert!(SplitConfig::new(0.6, 0.5, 1).is_err());
        assert!(SplitConfig::new(-0.1, 0.2, 1).is_err());
    }

    #[test]
    fn test_stratified_split_keeps_balance() {
        let splits = stratified_split(samples(100), &SplitConfig::default());
        assert_eq!(splits.total(), 200);
        assert_eq!(DatasetSplits::class_distribution(&splits.test, 2), vec![15, 15]);
        assert_eq!(DatasetSplits::class_distribution(&splits.val, 2), vec![15, 15]);
        assert_eq!(DatasetSplits::class_distribution(&splits.train, 2), vec![70, 70]);
    }

    #[test]
    fn test_split_is_deterministic() {
        let a = stratified_split(samples(20), &SplitConfig::default());
        let b = stratified_split(samples(20), &SplitConfig::default());
        assert_eq!(a.test, b.test);
        assert_eq!(a.train, b.train);
    }

    #[test]
    fn test_folds_partition_pooled_samples() {
        let base = stratified_split(samples(50), &SplitConfig::default());
        let pooled = base.train.len() + base.val.len();
        let test = base.test.clone();

        let mut seen_val = 0;
        for fold in 0..5 {
            let split = base.clone().into_fold(5, fold, 7).unwrap();
            assert_eq!(split.train.len() + split.val.len(), pooled);
            assert_eq!(split.test, test);
            seen_val += split.val.len();
        }
        assert_eq!(seen_val, pooled);
    }

    #[test]
    fn test_fold_out_of_range() {
        let base = stratified_split(samples(10), &SplitConfig::default());
        assert!(base.into_fold(3, 3, 0).is_err());
    }
}
