//! Logging Module
//!
//! Structured logging through the `tracing` crate. Binaries call
//! [`init_logging`] once at startup; library code only emits events.

use std::str::FromStr;
use std::time::Instant;

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::utils::error::{ExperimentError, Result};
use crate::utils::format_duration;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Verbose logging config for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            ansi_colors: true,
        }
    }

    /// Pick the default or verbose config from a `--verbose` flag
    pub fn from_verbosity(verbose: bool) -> Self {
        if verbose {
            Self::verbose()
        } else {
            Self::default()
        }
    }

    /// Filter directive: our crate at the configured level, dependencies quieter.
    fn directive(&self) -> String {
        let level = self.level.to_string().to_lowercase();
        format!("warn,medxfer={level},predictions={level}")
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ExperimentError::Config(format!("unknown log level '{other}'"))),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Initialize logging with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.directive()));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_ansi(config.ansi_colors)
                .with_target(config.include_target),
        )
        .with(filter)
        .try_init()
        .map_err(|e| ExperimentError::Config(format!("Failed to initialize logging: {e}")))?;

    Ok(())
}

/// Epoch-level progress logger for a single training run
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    /// Log start of an epoch (0-indexed)
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();
        tracing::info!("Epoch {}/{} started", epoch + 1, self.total_epochs);
    }

    /// Log end of an epoch with its headline metrics
    pub fn end_epoch(&self, train_loss: f64, val_loss: f64, val_auc: f64, learning_rate: f64) {
        let epoch_time = self.epoch_start.elapsed().as_secs_f64();
        let total_time = self.training_start.elapsed().as_secs_f64();
        let remaining = self.total_epochs.saturating_sub(self.epoch + 1);
        let eta = remaining as f64 * total_time / (self.epoch + 1) as f64;

        tracing::info!(
            "Epoch {}/{} done in {} | train loss {:.4} | val loss {:.4} | val AUC {:.4} | lr {:.2e} | ETA {}",
            self.epoch + 1,
            self.total_epochs,
            format_duration(epoch_time),
            train_loss,
            val_loss,
            val_auc,
            learning_rate,
            format_duration(eta)
        );
    }

    /// Log a new best validation AUC
    pub fn log_new_best(&self, val_auc: f64) {
        tracing::info!("New best model at epoch {} (val AUC {:.4})", self.epoch + 1, val_auc);
    }

    /// Log run completion
    pub fn log_complete(&self, best_val_auc: f64, test_auc: f64) {
        tracing::info!(
            "Training complete: {} epochs in {} | best val AUC {:.4} | test AUC {:.4}",
            self.total_epochs,
            format_duration(self.training_start.elapsed().as_secs_f64()),
            best_val_auc,
            test_auc
        );
    }
}
