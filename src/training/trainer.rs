//! Epoch loop
//!
//! [`run_schedule`] drives the per-epoch state machine
//! `train -> validate -> checkpoint on improvement -> lr step` and finishes
//! with a test pass over the best checkpoint. The phases themselves sit
//! behind [`EpochPhases`]; [`BurnPhases`] is the real implementation.

use burn::{
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor,
    },
};

use super::checkpoint::{self, BestTracker, CheckpointMeta, CheckpointPaths};
use super::history::{EpochRecord, TrainingHistory};
use super::scalars::ScalarWriter;
use super::scheduler::LRScheduler;
use crate::config::ExperimentConfig;
use crate::dataset::{BatchOrder, SplitLoader, SplitLoaders};
use crate::model::FullModel;
use crate::utils::error::{ExperimentError, Result};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::{argmax, softmax, PhaseAccumulator, PhaseMetrics};

/// The phases of one training run
pub trait EpochPhases {
    /// One optimisation pass over the training split
    fn train_epoch(&mut self, epoch: usize, lr: f64) -> Result<PhaseMetrics>;

    fn validate(&mut self, epoch: usize) -> Result<PhaseMetrics>;

    /// Persist the current weights as the best model so far
    fn save_checkpoint(&mut self, epoch: usize, val_auc: f64, lr: f64) -> Result<()>;

    /// Evaluate the test split with the weights restored from the checkpoint
    fn test_best(&mut self) -> Result<PhaseMetrics>;

    /// Record an epoch's metrics; `next_lr` is the rate after the scheduler step
    fn log_epoch(&mut self, _epoch: usize, _train: &PhaseMetrics, _val: &PhaseMetrics, _next_lr: f64) -> Result<()> {
        Ok(())
    }
}

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub history: TrainingHistory,
    pub best_val_auc: f64,
    /// 1-based epoch of the best checkpoint
    pub best_epoch: usize,
    pub test: PhaseMetrics,
}

/// Run `epochs` epochs, then test the best checkpoint.
///
/// Fails when no epoch produced a checkpoint (every validation AUC NaN).
pub fn run_schedule<P: EpochPhases>(phases: &mut P, scheduler: &LRScheduler, epochs: usize) -> Result<RunOutcome> {
    let mut history = TrainingHistory::new();
    let mut tracker = BestTracker::new();
    let mut logger = TrainingLogger::new(epochs);

    for epoch in 0..epochs {
        logger.start_epoch(epoch);
        let lr = scheduler.get_lr(epoch);

        let train = phases.train_epoch(epoch, lr)?;
        let val = phases.validate(epoch)?;

        if tracker.update(epoch + 1, val.auc) {
            phases.save_checkpoint(epoch + 1, val.auc, lr)?;
            logger.log_new_best(val.auc);
        }

        phases.log_epoch(epoch, &train, &val, scheduler.get_lr(epoch + 1))?;
        logger.end_epoch(train.loss, val.loss, val.auc, lr);
        history.push(EpochRecord::new(epoch + 1, lr, train, val));
    }

    let best_epoch = tracker.best_epoch().ok_or_else(|| {
        ExperimentError::Training("no epoch produced a finite validation AUC, nothing was checkpointed".to_string())
    })?;

    let test = phases.test_best()?;
    history.set_test(test);
    logger.log_complete(tracker.best(), test.auc);

    Ok(RunOutcome {
        history,
        best_val_auc: tracker.best(),
        best_epoch,
        test,
    })
}

/// Per-sample model output
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRow {
    pub prediction: usize,
    pub label: usize,
    pub scores: Vec<f32>,
    pub probs: Vec<f32>,
}

/// Outputs of an evaluation pass
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub accumulator: PhaseAccumulator,
    pub rows: Vec<PredictionRow>,
}

/// Copy `[batch, classes]` logits to the host as rows
pub fn logit_rows<B: Backend>(logits: Tensor<B, 2>) -> Result<Vec<Vec<f32>>> {
    let [_, classes] = logits.dims();
    let values = logits
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| ExperimentError::Training(format!("Failed to read logits: {:?}", e)))?;
    Ok(values.chunks(classes.max(1)).map(|row| row.to_vec()).collect())
}

/// Forward every batch of `loader` in file order without gradients
pub fn evaluate<B: Backend>(model: &FullModel<B>, loader: &SplitLoader, device: &B::Device) -> Result<Evaluation> {
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let mut evaluation = Evaluation::default();

    for batch in loader.batches::<B>(device, BatchOrder::Sequential) {
        let batch = batch?;
        let logits = model.forward(batch.images);
        let loss: f64 = loss_fn
            .forward(logits.clone(), batch.targets)
            .into_scalar()
            .elem();

        let scores = logit_rows(logits)?;
        let probs: Vec<Vec<f32>> = scores.iter().map(|row| softmax(row)).collect();
        evaluation.accumulator.add_batch(loss, &batch.labels, &probs);
        for ((label, scores), probs) in batch.labels.iter().zip(scores).zip(probs) {
            evaluation.rows.push(PredictionRow {
                prediction: argmax(&probs),
                label: *label,
                scores,
                probs,
            });
        }
    }
    Ok(evaluation)
}

/// Summarise a phase and flag collapsed predictions
pub fn finish_phase(phase: &str, accumulator: &PhaseAccumulator, num_classes: usize) -> PhaseMetrics {
    if accumulator.is_degenerate() {
        let class = accumulator.predictions().first().copied().unwrap_or_default();
        tracing::warn!("Bad local minimum: every {phase} prediction is class {class}");
    }
    accumulator.finish(num_classes)
}

/// Training phases on a burn autodiff backend
pub struct BurnPhases<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<FullModel<B>, B>,
{
    model: FullModel<B>,
    optimizer: O,
    loaders: SplitLoaders,
    files: CheckpointPaths,
    config: ExperimentConfig,
    scalars: ScalarWriter,
    device: B::Device,
    seed: u64,
    log_every: usize,
}

impl<B, O> BurnPhases<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<FullModel<B>, B>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: FullModel<B>,
        optimizer: O,
        loaders: SplitLoaders,
        files: CheckpointPaths,
        config: ExperimentConfig,
        scalars: ScalarWriter,
        device: B::Device,
        seed: u64,
        log_every: usize,
    ) -> Self {
        Self {
            model,
            optimizer,
            loaders,
            files,
            config,
            scalars,
            device,
            seed,
            log_every: log_every.max(1),
        }
    }

    fn num_classes(&self) -> usize {
        self.config.task.num_classes()
    }
}

impl<B, O> EpochPhases for BurnPhases<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<FullModel<B>, B>,
{
    fn train_epoch(&mut self, epoch: usize, lr: f64) -> Result<PhaseMetrics> {
        let loss_fn = CrossEntropyLossConfig::new().init(&self.device);
        let num_batches = self.loaders.train.num_batches();
        let order = BatchOrder::Shuffled {
            seed: self.seed.wrapping_add(epoch as u64),
        };
        let mut accumulator = PhaseAccumulator::new();

        for (iteration, batch) in self.loaders.train.batches::<B>(&self.device, order).enumerate() {
            let batch = batch?;
            let logits = self.model.forward(batch.images);
            let loss = loss_fn.forward(logits.clone(), batch.targets);
            let loss_value: f64 = loss.clone().into_scalar().elem();

            let probs: Vec<Vec<f32>> = logit_rows(logits.detach())?
                .iter()
                .map(|row| softmax(row))
                .collect();

            let grads = GradientsParams::from_grads(loss.backward(), &self.model);
            self.model = self.optimizer.step(lr, self.model.clone(), grads);
            accumulator.add_batch(loss_value, &batch.labels, &probs);

            if iteration % self.log_every == 0 {
                tracing::debug!("  Batch {:>4}/{}: loss = {:.4}", iteration + 1, num_batches, loss_value);
                self.scalars
                    .add_scalar("Loss/train_iter", loss_value, epoch * num_batches + iteration)?;
            }
        }

        Ok(finish_phase("train", &accumulator, self.num_classes()))
    }

    fn validate(&mut self, _epoch: usize) -> Result<PhaseMetrics> {
        let model = self.model.valid();
        let evaluation = evaluate(&model, &self.loaders.val, &self.device)?;
        Ok(finish_phase("validation", &evaluation.accumulator, self.num_classes()))
    }

    fn save_checkpoint(&mut self, epoch: usize, val_auc: f64, lr: f64) -> Result<()> {
        let meta = CheckpointMeta::new(&self.config, epoch, val_auc, lr)?;
        checkpoint::save_checkpoint(&self.files, &self.model, &self.optimizer, &meta)?;
        tracing::info!("Saved model with validation AUC {:.4} at epoch {}", val_auc, epoch);
        Ok(())
    }

    fn test_best(&mut self) -> Result<PhaseMetrics> {
        let restored = checkpoint::load_model(&self.files, self.model.clone(), &self.device)?;
        let evaluation = evaluate(&restored.valid(), &self.loaders.test, &self.device)?;
        let test = finish_phase("test", &evaluation.accumulator, self.num_classes());
        tracing::info!(
            "Test loss {:.4} | AUC {:.4} | F1 {:.4} | accuracy {:.4}",
            test.loss,
            test.auc,
            test.f1,
            test.accuracy
        );
        Ok(test)
    }

    fn log_epoch(&mut self, epoch: usize, train: &PhaseMetrics, val: &PhaseMetrics, next_lr: f64) -> Result<()> {
        for (split, metrics) in [("train", train), ("val", val)] {
            self.scalars.add_scalar(&format!("Loss/{split}"), metrics.loss, epoch)?;
            self.scalars.add_scalar(&format!("AUC/{split}"), metrics.auc, epoch)?;
            self.scalars.add_scalar(&format!("F1/{split}"), metrics.f1, epoch)?;
            self.scalars.add_scalar(&format!("Accuracy/{split}"), metrics.accuracy, epoch)?;
        }
        self.scalars.add_scalar("Learning Rate", next_lr, epoch)?;
        self.scalars.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays a fixed validation AUC sequence
    struct ScriptedPhases {
        val_aucs: Vec<f64>,
        checkpoints: Vec<(usize, f64)>,
        lrs: Vec<f64>,
        logged_lrs: Vec<f64>,
    }

    impl ScriptedPhases {
        fn new(val_aucs: &[f64]) -> Self {
            Self {
                val_aucs: val_aucs.to_vec(),
                checkpoints: Vec::new(),
                lrs: Vec::new(),
                logged_lrs: Vec::new(),
            }
        }

        fn metrics(auc: f64) -> PhaseMetrics {
            PhaseMetrics {
                loss: 0.5,
                auc,
                f1: 0.5,
                accuracy: 0.5,
            }
        }
    }

    impl EpochPhases for ScriptedPhases {
        fn train_epoch(&mut self, _epoch: usize, lr: f64) -> Result<PhaseMetrics> {
            self.lrs.push(lr);
            Ok(Self::metrics(0.5))
        }

        fn validate(&mut self, epoch: usize) -> Result<PhaseMetrics> {
            Ok(Self::metrics(self.val_aucs[epoch]))
        }

        fn save_checkpoint(&mut self, epoch: usize, val_auc: f64, _lr: f64) -> Result<()> {
            self.checkpoints.push((epoch, val_auc));
            Ok(())
        }

        fn test_best(&mut self) -> Result<PhaseMetrics> {
            // Score the test pass with the AUC of the last checkpoint
            let (_, auc) = self.checkpoints.last().copied().unwrap_or((0, f64::NAN));
            Ok(Self::metrics(auc))
        }

        fn log_epoch(&mut self, _epoch: usize, _train: &PhaseMetrics, _val: &PhaseMetrics, next_lr: f64) -> Result<()> {
            self.logged_lrs.push(next_lr);
            Ok(())
        }
    }

    #[test]
    fn test_checkpoints_only_on_strict_improvement() {
        let mut phases = ScriptedPhases::new(&[0.60, 0.55, 0.70, 0.65]);
        let outcome = run_schedule(&mut phases, &LRScheduler::constant(0.01), 4).unwrap();

        assert_eq!(phases.checkpoints, vec![(1, 0.60), (3, 0.70)]);
        assert_eq!(outcome.best_val_auc, 0.70);
        assert_eq!(outcome.best_epoch, 3);
        assert_eq!(outcome.test.auc, 0.70);
        assert_eq!(outcome.history.len(), 4);
        assert!(outcome.history.records().iter().all(|r| r.test_auc == 0.70));
    }

    #[test]
    fn test_nan_epochs_never_checkpoint() {
        let mut phases = ScriptedPhases::new(&[f64::NAN, 0.4, f64::NAN]);
        let outcome = run_schedule(&mut phases, &LRScheduler::constant(0.01), 3).unwrap();
        assert_eq!(phases.checkpoints, vec![(2, 0.4)]);
        assert_eq!(outcome.best_epoch, 2);
    }

    #[test]
    fn test_run_without_checkpoint_fails() {
        let mut phases = ScriptedPhases::new(&[f64::NAN, f64::NAN]);
        let err = run_schedule(&mut phases, &LRScheduler::constant(0.01), 2).unwrap_err();
        assert!(matches!(err, ExperimentError::Training(_)));
    }

    #[test]
    fn test_scheduler_drives_learning_rate() {
        let mut phases = ScriptedPhases::new(&[0.5, 0.6, 0.7]);
        run_schedule(&mut phases, &LRScheduler::exponential(0.1, 0.5), 3).unwrap();
        assert_eq!(phases.lrs, vec![0.1, 0.05, 0.025]);
        // Logged after the scheduler step
        assert_eq!(phases.logged_lrs, vec![0.05, 0.025, 0.0125]);
    }

    #[test]
    fn test_logit_rows_split_by_class() {
        use burn::tensor::TensorData;
        use burn_ndarray::NdArray;

        let device = Default::default();
        let logits = Tensor::<NdArray, 2>::from_floats(TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [2, 2]), &device);
        assert_eq!(logit_rows(logits).unwrap(), vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }
}
