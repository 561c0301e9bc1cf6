//! Learning Rate Scheduler Module
//!
//! Epoch-level learning-rate schedules selected by the run's `lrdecay` flag.

use serde::{Deserialize, Serialize};

use crate::config::{ExperimentConfig, LrDecay};

/// Cosine schedules anneal down to `initial_lr / COSINE_FLOOR_DIVISOR`
pub const COSINE_FLOOR_DIVISOR: f64 = 5.0;

/// Learning rate scheduler that adjusts the learning rate between epochs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LRScheduler {
    /// Constant learning rate (no scheduling)
    Constant { lr: f64 },

    /// Exponential decay: lr = initial_lr * decay_rate^epoch
    Exponential { initial_lr: f64, decay_rate: f64 },

    /// Cosine annealing: smooth decay following cosine curve
    CosineAnnealing {
        initial_lr: f64,
        min_lr: f64,
        total_epochs: usize,
    },
}

impl LRScheduler {
    pub fn constant(lr: f64) -> Self {
        Self::Constant { lr }
    }

    pub fn exponential(initial_lr: f64, decay_rate: f64) -> Self {
        Self::Exponential {
            initial_lr,
            decay_rate,
        }
    }

    pub fn cosine_annealing(initial_lr: f64, min_lr: f64, total_epochs: usize) -> Self {
        Self::CosineAnnealing {
            initial_lr,
            min_lr,
            total_epochs,
        }
    }

    /// Scheduler for a run's decay method
    pub fn from_config(config: &ExperimentConfig) -> Self {
        let lr = config.learning_rate;
        match config.lr_decay {
            LrDecay::Beta => Self::exponential(lr, config.lr_decay_beta),
            LrDecay::Cosine => Self::cosine_annealing(lr, lr / COSINE_FLOOR_DIVISOR, config.epochs),
            LrDecay::None => Self::constant(lr),
        }
    }

    /// Learning rate for a zero-based epoch
    pub fn get_lr(&self, epoch: usize) -> f64 {
        match self {
            Self::Constant { lr } => *lr,

            Self::Exponential {
                initial_lr,
                decay_rate,
            } => initial_lr * decay_rate.powi(epoch as i32),

            Self::CosineAnnealing {
                initial_lr,
                min_lr,
                total_epochs,
            } => {
                let progress = epoch as f64 / (*total_epochs).max(1) as f64;
                let cosine_factor = (1.0 + (std::f64::consts::PI * progress).cos()) / 2.0;
                min_lr + (initial_lr - min_lr) * cosine_factor
            }
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::Constant { lr } => format!("Constant LR: {:.6}", lr),
            Self::Exponential {
                initial_lr,
                decay_rate,
            } => format!("Exponential: initial={:.6}, decay={:.4}", initial_lr, decay_rate),
            Self::CosineAnnealing {
                initial_lr,
                min_lr,
                total_epochs,
            } => format!(
                "Cosine Annealing: initial={:.6}, min={:.6}, epochs={}",
                initial_lr, min_lr, total_epochs
            ),
        }
    }
}
