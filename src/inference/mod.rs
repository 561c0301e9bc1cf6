//! Inference module
//!
//! Restores a trained run from its best checkpoint and exports per-sample
//! predictions for the train, validation and test splits.

pub mod predictions;

pub use predictions::{predictions_path, run_predictions, write_predictions};
