//! One experiment run, end to end
//!
//! Loads the task's splits, assembles and freezes the model, trains with SGD
//! (Nesterov momentum) under the configured LR schedule, tests the best
//! checkpoint and writes the training history. The float precision is a
//! property of the backend `B`; [`run_on_selected_backend`] picks it from the
//! `amp` option.

use std::time::Instant;

use burn::{
    optim::{decay::WeightDecayConfig, momentum::MomentumConfig, SgdConfig},
    tensor::backend::AutodiffBackend,
};

use super::checkpoint::CheckpointPaths;
use super::scalars::ScalarWriter;
use super::scheduler::LRScheduler;
use super::trainer::{run_schedule, BurnPhases, RunOutcome};
use crate::backend;
use crate::config::{ExperimentConfig, ProjectPaths, RunOptions};
use crate::dataset::SplitLoaders;
use crate::model::{build_model, FullModel};
use crate::utils::error::{ExperimentError, Result};
use crate::utils::format_duration;

pub const MOMENTUM: f64 = 0.9;
pub const WEIGHT_DECAY: f32 = 0.4;

/// Decide whether mixed precision is used for this process
pub fn resolve_amp(requested: bool) -> bool {
    if requested && !backend::supports_mixed_precision() {
        tracing::warn!(
            "Mixed precision is not supported on {}; running in full precision",
            backend::backend_name()
        );
        return false;
    }
    requested
}

/// Run on the default device, in half precision when `amp` is on and the
/// backend supports it
pub fn run_on_selected_backend(
    paths: &ProjectPaths,
    config: &ExperimentConfig,
    options: &RunOptions,
) -> Result<RunOutcome> {
    let device = backend::default_device();
    if resolve_amp(options.amp) {
        run_half_precision(paths, config, options, &device)
    } else {
        run_experiment::<backend::TrainingBackend>(paths, config, options, &device)
    }
}

#[cfg(feature = "cuda")]
fn run_half_precision(
    paths: &ProjectPaths,
    config: &ExperimentConfig,
    options: &RunOptions,
    device: &backend::Device,
) -> Result<RunOutcome> {
    tracing::info!("Mixed precision: training on {} with f16 floats", backend::backend_name());
    run_experiment::<backend::HalfTrainingBackend>(paths, config, options, device)
}

#[cfg(not(feature = "cuda"))]
fn run_half_precision(
    _paths: &ProjectPaths,
    _config: &ExperimentConfig,
    _options: &RunOptions,
    _device: &backend::Device,
) -> Result<RunOutcome> {
    Err(ExperimentError::Training(format!(
        "no half-precision backend for {}",
        backend::backend_name()
    )))
}

/// Train, checkpoint and test one configuration
pub fn run_experiment<B: AutodiffBackend>(
    paths: &ProjectPaths,
    config: &ExperimentConfig,
    options: &RunOptions,
    device: &B::Device,
) -> Result<RunOutcome> {
    config.validate()?;
    options.validate()?;
    let param_str = config.param_str()?;
    let started = Instant::now();
    tracing::info!("Running {param_str}");

    let loaders = SplitLoaders::for_experiment(paths, config, options)?;
    for (name, loader) in [("train", &loaders.train), ("val", &loaders.val)] {
        if loader.is_empty() {
            return Err(ExperimentError::Dataset(format!("{} split of {} is empty", name, config.task)));
        }
    }

    let (model, _) = build_model::<B>(config, &paths.weights_dir, true, device)?;
    let optimizer = SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(MOMENTUM)
                .with_dampening(0.0)
                .with_nesterov(true),
        ))
        .with_weight_decay(Some(WeightDecayConfig::new(WEIGHT_DECAY)))
        .init::<B, FullModel<B>>();

    let scheduler = LRScheduler::from_config(config);
    tracing::info!("{}", scheduler.description());

    let files = CheckpointPaths::for_config(paths, config)?;
    let scalars = ScalarWriter::for_run(&paths.logs_dir, &param_str)?;
    tracing::debug!("Scalar log: {:?}", scalars.dir());

    let mut phases = BurnPhases::new(
        model,
        optimizer,
        loaders,
        files,
        config.clone(),
        scalars,
        device.clone(),
        options.seed,
        options.log_every,
    );
    let outcome = run_schedule(&mut phases, &scheduler, config.epochs)?;

    let history_path = paths.history_path(config)?;
    outcome.history.save(&history_path)?;
    tracing::info!(
        "Finished {param_str} in {} (history: {:?})",
        format_duration(started.elapsed().as_secs_f64()),
        history_path
    );
    Ok(outcome)
}
