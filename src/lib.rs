//! # medxfer
//!
//! Transfer-learning ablation experiments for medical image classification,
//! built on the Burn framework.
//!
//! Each run pairs a pretrained backbone (ResNet18/50, DenseNet121 with
//! ImageNet, RadImageNet or random weights) with a classifier head, freezes
//! part of the backbone, trains with SGD and keeps the checkpoint with the
//! best validation AUC. A grid driver sweeps hyperparameters; the results
//! module aggregates the runs and plots metric distributions per
//! hyperparameter.
//!
//! ## Modules
//!
//! - `config`: run identity, parameter strings, grid and settings
//! - `dataset`: split tables, image loading and batching
//! - `model`: backbones, classifier heads, freezing and pretrained weights
//! - `training`: epoch loop, LR schedules, checkpoints and histories
//! - `results`: summary table and SVG plots
//! - `inference`: per-sample prediction export
//! - `utils`: errors, logging and metrics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use medxfer::backend::{default_device, TrainingBackend};
//! use medxfer::config::{ExperimentConfig, ProjectPaths, RunOptions};
//!
//! let config = ExperimentConfig::default();
//! let outcome = medxfer::run_experiment::<TrainingBackend>(
//!     &ProjectPaths::default(),
//!     &config,
//!     &RunOptions::default(),
//!     &default_device(),
//! )?;
//! println!("best val AUC {:.4}", outcome.best_val_auc);
//! ```

pub mod backend;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod results;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{ExperimentConfig, GridSpec, ParamKey, ParamSet, ProjectPaths, RunOptions, Settings};
pub use inference::run_predictions;
pub use model::{build_model, FullModel};
pub use results::{summarize, visualize};
pub use training::{run_experiment, run_on_selected_backend, RunOutcome, TrainingHistory};
pub use utils::error::{ExperimentError, Result};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
