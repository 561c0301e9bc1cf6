//! Per-epoch training history, persisted as one CSV per run

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{ExperimentError, Result};
use crate::utils::metrics::PhaseMetrics;

/// One history row. Test metrics are repeated on every row of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based epoch number
    pub epoch: usize,
    pub lr: f64,
    pub train_loss: f64,
    pub train_auc: f64,
    pub train_f1: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_auc: f64,
    pub val_f1: f64,
    pub val_accuracy: f64,
    pub test_loss: f64,
    pub test_auc: f64,
    pub test_f1: f64,
    pub test_accuracy: f64,
}

impl EpochRecord {
    pub fn new(epoch: usize, lr: f64, train: PhaseMetrics, val: PhaseMetrics) -> Self {
        Self {
            epoch,
            lr,
            train_loss: train.loss,
            train_auc: train.auc,
            train_f1: train.f1,
            train_accuracy: train.accuracy,
            val_loss: val.loss,
            val_auc: val.auc,
            val_f1: val.f1,
            val_accuracy: val.accuracy,
            test_loss: f64::NAN,
            test_auc: f64::NAN,
            test_f1: f64::NAN,
            test_accuracy: f64::NAN,
        }
    }

    pub fn test(&self) -> PhaseMetrics {
        PhaseMetrics {
            loss: self.test_loss,
            auc: self.test_auc,
            f1: self.test_f1,
            accuracy: self.test_accuracy,
        }
    }
}

/// Ordered epoch records of a single run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    records: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EpochRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[EpochRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Attach the final test metrics to every row
    pub fn set_test(&mut self, test: PhaseMetrics) {
        for record in &mut self.records {
            record.test_loss = test.loss;
            record.test_auc = test.auc;
            record.test_f1 = test.f1;
            record.test_accuracy = test.accuracy;
        }
    }

    /// Row with the highest validation AUC; first on ties, NaN rows skipped
    pub fn best(&self) -> Option<&EpochRecord> {
        self.records
            .iter()
            .filter(|r| !r.val_auc.is_nan())
            .fold(None, |best: Option<&EpochRecord>, record| match best {
                Some(b) if b.val_auc >= record.val_auc => Some(b),
                _ => Some(record),
            })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        tracing::debug!("Saved {} history rows to {:?}", self.records.len(), path);
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ExperimentError::PathNotFound(path.to_path_buf()));
        }
        let mut reader = csv::Reader::from_path(path)?;
        let records = reader
            .deserialize()
            .collect::<std::result::Result<Vec<EpochRecord>, _>>()?;
        Ok(Self { records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn metrics(auc: f64) -> PhaseMetrics {
        PhaseMetrics {
            loss: 0.5,
            auc,
            f1: 0.4,
            accuracy: 0.7,
        }
    }

    fn history(val_aucs: &[f64]) -> TrainingHistory {
        let mut history = TrainingHistory::new();
        for (i, &auc) in val_aucs.iter().enumerate() {
            history.push(EpochRecord::new(i + 1, 1e-3, metrics(0.6), metrics(auc)));
        }
        history
    }

    #[test]
    fn test_best_skips_nan_and_keeps_first_tie() {
        let history = history(&[f64::NAN, 0.7, 0.65, 0.7]);
        assert_eq!(history.best().unwrap().epoch, 2);
        assert!(TrainingHistory::new().best().is_none());
        assert!(self::history(&[f64::NAN]).best().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("models").join("training_history_x.csv");

        let mut history = history(&[0.6, f64::NAN]);
        history.set_test(metrics(0.8));
        history.save(&path).unwrap();

        let header = std::fs::read_to_string(&path).unwrap();
        assert!(header.starts_with("epoch,lr,train_loss,train_auc,train_f1,train_accuracy,val_loss,"));

        let loaded = TrainingHistory::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.records()[1].val_auc.is_nan());
        assert!(loaded.records().iter().all(|r| r.test_auc == 0.8));
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            TrainingHistory::load(&temp.path().join("nope.csv")),
            Err(ExperimentError::PathNotFound(_))
        ));
    }
}
