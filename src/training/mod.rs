//! Training module
//!
//! This module provides:
//! - The epoch state machine with best-checkpoint selection
//! - Learning rate scheduling
//! - Checkpoint, history and scalar-log persistence
//! - The end-to-end experiment runner

pub mod checkpoint;
pub mod experiment;
pub mod history;
pub mod scalars;
pub mod scheduler;
pub mod trainer;

pub use checkpoint::{BestTracker, CheckpointMeta, CheckpointPaths};
pub use experiment::{resolve_amp, run_experiment, run_on_selected_backend};
pub use history::{EpochRecord, TrainingHistory};
pub use scalars::ScalarWriter;
pub use scheduler::LRScheduler;
pub use trainer::{evaluate, run_schedule, EpochPhases, Evaluation, PredictionRow, RunOutcome};
