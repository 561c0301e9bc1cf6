//! Scalar event log
//!
//! Appends one JSON object per scalar to `scalars.jsonl` inside a per-run
//! directory `log_<P>_<YYYY-MM-DD-HH>`.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Deserializer, Serialize};

use crate::utils::error::Result;

pub const SCALARS_FILE: &str = "scalars.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub tag: String,
    pub step: usize,
    /// Non-finite values are written as `null`
    #[serde(deserialize_with = "nullable_f64")]
    pub value: f64,
}

fn nullable_f64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

pub struct ScalarWriter {
    dir: PathBuf,
    writer: BufWriter<File>,
}

impl ScalarWriter {
    /// Open the log directory for a run, stamped with the current hour
    pub fn for_run(logs_dir: &Path, param_str: &str) -> Result<Self> {
        let stamp = Local::now().format("%Y-%m-%d-%H");
        Self::create(logs_dir.join(format!("log_{param_str}_{stamp}")))
    }

    pub fn create(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(SCALARS_FILE))?;
        Ok(Self {
            dir,
            writer: BufWriter::new(file),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        let event = ScalarEvent {
            tag: tag.to_string(),
            step,
            value,
        };
        serde_json::to_writer(&mut self.writer, &event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Read every event of a scalar log
pub fn read_scalars(path: &Path) -> Result<Vec<ScalarEvent>> {
    fs::read_to_string(path)?
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| Ok(serde_json::from_str(line)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_events_round_trip() {
        let temp = TempDir::new().unwrap();
        let mut writer = ScalarWriter::for_run(temp.path(), "backbone_ResNet18").unwrap();
        writer.add_scalar("Loss/train", 0.69, 0).unwrap();
        writer.add_scalar("AUC/val", 0.5, 0).unwrap();
        writer.flush().unwrap();

        let name = writer.dir().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("log_backbone_ResNet18_"));

        let events = read_scalars(&writer.dir().join(SCALARS_FILE)).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].tag, "AUC/val");
    }

    #[test]
    fn test_nan_is_written_as_null() {
        let temp = TempDir::new().unwrap();
        let mut writer = ScalarWriter::create(temp.path().join("run")).unwrap();
        writer.add_scalar("AUC/train", f64::NAN, 3).unwrap();
        writer.flush().unwrap();
        let raw = fs::read_to_string(temp.path().join("run").join(SCALARS_FILE)).unwrap();
        assert!(raw.contains("\"value\":null"));
        let events = read_scalars(&temp.path().join("run").join(SCALARS_FILE)).unwrap();
        assert!(events[0].value.is_nan());
    }
}
