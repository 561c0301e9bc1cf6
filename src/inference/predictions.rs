//! Per-sample predictions of a trained run
//!
//! Rebuilds the model for a configuration, restores its best checkpoint and
//! writes one CSV per split with the predicted class, the true label, the raw
//! scores and the softmax probabilities of every sample.

use std::fs;
use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;

use crate::config::{ExperimentConfig, ProjectPaths, RunOptions};
use crate::dataset::{SplitLoader, SplitLoaders};
use crate::model::build_model;
use crate::training::checkpoint::{self, CheckpointPaths};
use crate::training::trainer::{evaluate, finish_phase, PredictionRow};
use crate::utils::error::{ExperimentError, Result};
use crate::utils::format_metric;

/// `<predictions_dir>/<split>_preds_<P>.csv`
pub fn predictions_path(paths: &ProjectPaths, split: &str, param_str: &str) -> PathBuf {
    paths
        .predictions_dir
        .join(format!("{split}_preds_{param_str}.csv"))
}

/// Write prediction rows with columns
/// `prediction,label,score_0..score_{C-1},prob_0..prob_{C-1}`
pub fn write_predictions(rows: &[PredictionRow], num_classes: usize, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["prediction".to_string(), "label".to_string()];
    header.extend((0..num_classes).map(|c| format!("score_{c}")));
    header.extend((0..num_classes).map(|c| format!("prob_{c}")));
    writer.write_record(&header)?;

    for row in rows {
        if row.scores.len() != num_classes || row.probs.len() != num_classes {
            return Err(ExperimentError::Dataset(format!(
                "prediction row has {} scores for {} classes",
                row.scores.len(),
                num_classes
            )));
        }
        let mut record = vec![row.prediction.to_string(), row.label.to_string()];
        record.extend(row.scores.iter().map(f32::to_string));
        record.extend(row.probs.iter().map(f32::to_string));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Evaluate the best checkpoint of `config` on every split and write the
/// prediction tables. Fails with [`ExperimentError::CheckpointMissing`] when
/// the run has not been trained.
pub fn run_predictions<B: Backend>(
    paths: &ProjectPaths,
    config: &ExperimentConfig,
    options: &RunOptions,
    device: &B::Device,
) -> Result<Vec<PathBuf>> {
    config.validate()?;
    let param_str = config.param_str()?;
    let files = CheckpointPaths::for_config(paths, config)?;
    if !files.exists() {
        return Err(ExperimentError::CheckpointMissing(files.model));
    }

    let (model, _) = build_model::<B>(config, &paths.weights_dir, false, device)?;
    let model = checkpoint::load_model(&files, model, device)?;
    if let Ok(meta) = checkpoint::load_meta(&files) {
        tracing::info!("Loaded checkpoint from epoch {} ({})", meta.epoch, meta.saved_at);
    }

    let loaders = SplitLoaders::for_experiment(paths, config, options)?;
    let num_classes = config.task.num_classes();
    let splits: [(&str, &SplitLoader); 3] = [
        ("train", &loaders.train),
        ("val", &loaders.val),
        ("test", &loaders.test),
    ];

    let mut written = Vec::with_capacity(splits.len());
    for (split, loader) in splits {
        let evaluation = evaluate(&model, loader, device)?;
        let metrics = finish_phase(split, &evaluation.accumulator, num_classes);
        tracing::info!(
            "{split}: AUC {} | F1 {} | Acc {}",
            format_metric(metrics.auc),
            format_metric(metrics.f1),
            format_metric(metrics.accuracy)
        );

        let path = predictions_path(paths, split, &param_str);
        write_predictions(&evaluation.rows, num_classes, &path)?;
        tracing::info!("Wrote {} predictions to {:?}", evaluation.rows.len(), path);
        written.push(path);
    }
    Ok(written)
}
