//! Aggregation of finished runs into one results table
//!
//! Every `training_history_<P>.csv` under a task's `models/` directory
//! contributes its best-validation-AUC row, widened with the hyperparameters
//! decoded from `<P>` and the task the run belongs to.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::settings::HISTORY_PREFIX;
use crate::config::{ParamKey, ParamSet, ProjectPaths};
use crate::training::history::{EpochRecord, TrainingHistory};
use crate::utils::error::{ExperimentError, Result};

/// History columns, in the order they appear in the summary
pub const HISTORY_COLUMNS: [&str; 14] = [
    "epoch",
    "lr",
    "train_loss",
    "train_auc",
    "train_f1",
    "train_accuracy",
    "val_loss",
    "val_auc",
    "val_f1",
    "val_accuracy",
    "test_loss",
    "test_auc",
    "test_f1",
    "test_accuracy",
];

pub const TASK_COLUMN: &str = "task";

/// Hyperparameter columns of the summary. `data` is left out since the task
/// column carries the same information.
pub fn param_columns() -> impl Iterator<Item = ParamKey> {
    ParamKey::ALL.into_iter().filter(|key| *key != ParamKey::Data)
}

/// Best epoch of one run
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub record: EpochRecord,
    pub params: ParamSet,
    pub task: String,
}

impl SummaryRow {
    fn values(&self) -> Vec<String> {
        let r = &self.record;
        let mut values: Vec<String> = vec![r.epoch.to_string()];
        values.extend(
            [
                r.lr,
                r.train_loss,
                r.train_auc,
                r.train_f1,
                r.train_accuracy,
                r.val_loss,
                r.val_auc,
                r.val_f1,
                r.val_accuracy,
                r.test_loss,
                r.test_auc,
                r.test_f1,
                r.test_accuracy,
            ]
            .iter()
            .map(f64::to_string),
        );
        values.extend(param_columns().map(|key| self.params.get(key).unwrap_or_default().to_string()));
        values.push(self.task.clone());
        values
    }
}

/// History files of one results directory, sorted by name
fn history_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with(HISTORY_PREFIX) && name.ends_with(".csv"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Parameter string embedded in a history file name
fn param_str_of(path: &Path) -> Option<&str> {
    path.file_name()?
        .to_str()?
        .strip_prefix(HISTORY_PREFIX)?
        .strip_suffix(".csv")
}

/// Name of the task directory that owns a `models/` directory
fn task_of(results_dir: &Path) -> String {
    results_dir
        .parent()
        .and_then(|task_dir| task_dir.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Collect the best row of every history found in `dirs`. Missing
/// directories are skipped, unreadable or empty histories are skipped with a
/// warning.
pub fn collect_rows(dirs: &[PathBuf]) -> Result<Vec<SummaryRow>> {
    let mut rows = Vec::new();
    for dir in dirs {
        if !dir.is_dir() {
            tracing::info!("Skipping {:?}: no results yet", dir);
            continue;
        }
        let task = task_of(dir);
        for path in history_files(dir)? {
            let Some(param_str) = param_str_of(&path) else {
                continue;
            };
            let history = match TrainingHistory::load(&path) {
                Ok(history) => history,
                Err(e) => {
                    tracing::warn!("Skipping unreadable history {:?}: {}", path, e);
                    continue;
                }
            };
            match history.best() {
                Some(best) => rows.push(SummaryRow {
                    record: *best,
                    params: ParamSet::decode(param_str),
                    task: task.clone(),
                }),
                None => tracing::warn!("Skipping {:?}: no epoch with a validation AUC", path),
            }
        }
    }
    Ok(rows)
}

/// Write the summary table, creating its directory
pub fn write_summary(rows: &[SummaryRow], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    let mut header: Vec<&str> = HISTORY_COLUMNS.to_vec();
    header.extend(param_columns().map(|key| key.as_str()));
    header.push(TASK_COLUMN);
    writer.write_record(&header)?;
    for row in rows {
        writer.write_record(row.values())?;
    }
    writer.flush()?;
    Ok(())
}

/// Summarize every task's results into `results/results.csv`
pub fn summarize(paths: &ProjectPaths) -> Result<Vec<SummaryRow>> {
    let rows = collect_rows(&paths.result_dirs())?;
    let output = paths.summary_path();
    write_summary(&rows, &output)?;
    tracing::info!("Wrote {} runs to {:?}", rows.len(), output);
    Ok(rows)
}

/// A results table read back by column name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SummaryTable {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ExperimentError::PathNotFound(path.to_path_buf()));
        }
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let rows = reader
            .records()
            .map(|record| record.map(|r| r.iter().map(str::to_string).collect()))
            .collect::<std::result::Result<Vec<Vec<String>>, _>>()?;
        Ok(Self { headers, rows })
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct values of a column in order of first appearance
    pub fn distinct(&self, name: &str) -> Vec<String> {
        let Some(index) = self.column(name) else {
            return Vec::new();
        };
        let mut seen = Vec::new();
        for row in &self.rows {
            if let Some(value) = row.get(index) {
                if !seen.contains(value) {
                    seen.push(value.clone());
                }
            }
        }
        seen
    }
}
