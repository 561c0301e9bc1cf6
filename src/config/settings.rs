//! Project-level settings loaded from an optional TOML file.
//!
//! ```toml
//! [paths]
//! data_root = "data"
//! results_dir = "results"
//!
//! [grid]
//! tasks = ["acl"]
//! backbones = ["ResNet50"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::{ExperimentConfig, GridSpec, Task};
use crate::utils::error::{ExperimentError, Result};

/// Where runs read inputs and write artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectPaths {
    /// Per-task data directories live under this root
    pub data_root: PathBuf,
    /// Summary table and plots
    pub results_dir: PathBuf,
    /// Scalar event logs, one directory per run
    pub logs_dir: PathBuf,
    /// Per-sample prediction tables
    pub predictions_dir: PathBuf,
    /// Pretrained weight files (`ImageNet/` cache and `RadImageNet/`)
    pub weights_dir: PathBuf,
}

impl Default for ProjectPaths {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            results_dir: PathBuf::from("results"),
            logs_dir: PathBuf::from("logs"),
            predictions_dir: PathBuf::from("predictions"),
            weights_dir: PathBuf::from("weights"),
        }
    }
}

impl ProjectPaths {
    pub fn task_dir(&self, task: Task) -> PathBuf {
        self.data_root.join(task.to_string())
    }

    /// Directory holding checkpoints and histories for a task
    pub fn models_dir(&self, task: Task) -> PathBuf {
        self.task_dir(task).join("models")
    }

    /// Checkpoint file name without extension
    pub fn checkpoint_stem(&self, config: &ExperimentConfig) -> Result<PathBuf> {
        Ok(self
            .models_dir(config.task)
            .join(format!("best_model_{}", config.param_str()?)))
    }

    pub fn optimizer_stem(&self, config: &ExperimentConfig) -> Result<PathBuf> {
        Ok(self
            .models_dir(config.task)
            .join(format!("best_optim_{}", config.param_str()?)))
    }

    pub fn history_path(&self, config: &ExperimentConfig) -> Result<PathBuf> {
        Ok(self
            .models_dir(config.task)
            .join(format!("{}{}.csv", HISTORY_PREFIX, config.param_str()?)))
    }

    /// Result directories scanned by `summarize`, one per known task
    pub fn result_dirs(&self) -> Vec<PathBuf> {
        Task::ALL.iter().map(|task| self.models_dir(*task)).collect()
    }

    pub fn summary_path(&self) -> PathBuf {
        self.results_dir.join("results.csv")
    }
}

/// File-name prefix of per-run training histories
pub const HISTORY_PREFIX: &str = "training_history_";

/// Top-level settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: ProjectPaths,
    pub grid: GridSpec,
}

impl Settings {
    /// Load settings from `path`, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => load_toml_config(path),
            None => Ok(Self::default()),
        }
    }
}

/// Read and deserialize a TOML file
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path).map_err(|e| {
        ExperimentError::Config(format!("Failed to read config {}: {e}", path.display()))
    })?;

    toml::from_str(&content).map_err(|e| {
        ExperimentError::Config(format!("Failed to parse config {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backbone;
    use std::io::Write;

    #[test]
    fn test_partial_settings_fill_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[paths]\ndata_root = \"/srv/data\"\n\n[grid]\nbackbones = [\"DenseNet121\"]").unwrap();

        let settings: Settings = load_toml_config(file.path()).unwrap();
        assert_eq!(settings.paths.data_root, PathBuf::from("/srv/data"));
        assert_eq!(settings.paths.results_dir, PathBuf::from("results"));
        assert_eq!(settings.grid.backbones, vec![Backbone::DenseNet121]);
        assert_eq!(settings.grid.tasks, GridSpec::default().tasks);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Settings::load(Some(Path::new("/nonexistent/medxfer.toml"))).unwrap_err();
        assert!(matches!(err, ExperimentError::Config(_)));
    }

    #[test]
    fn test_artifact_paths_share_param_str() {
        let paths = ProjectPaths::default();
        let config = ExperimentConfig::default();
        let param_str = config.param_str().unwrap();

        let checkpoint = paths.checkpoint_stem(&config).unwrap();
        let history = paths.history_path(&config).unwrap();
        assert_eq!(checkpoint, PathBuf::from(format!("data/breast/models/best_model_{param_str}")));
        assert_eq!(
            history,
            PathBuf::from(format!("data/breast/models/training_history_{param_str}.csv"))
        );
    }
}
