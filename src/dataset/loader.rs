//! Task data loading
//!
//! Each task lives under `<data_root>/<task>/`:
//!
//! ```text
//! data/acl/
//! ├── dataframe/            # split tables: image_path,<target column>
//! │   ├── train.csv
//! │   ├── val.csv
//! │   └── test.csv
//! └── images/               # optional: one sub-directory per class
//!     ├── 0/
//!     └── 1/
//! ```
//!
//! Split tables are authoritative. When they are missing but `images/` exists,
//! a stratified split is generated from the class folders and written back as
//! split tables so later runs see the same partition.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::Task;
use crate::dataset::split::{stratified_split, DatasetSplits, SplitConfig};
use crate::dataset::Sample;
use crate::utils::error::{ExperimentError, Result};

/// Column holding the image path, relative to the task directory
pub const IMAGE_COLUMN: &str = "image_path";

const SPLIT_NAMES: [&str; 3] = ["train", "val", "test"];

const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff", "gif"];

/// Loads the train/val/test splits of one task
#[derive(Debug, Clone)]
pub struct TaskDataLoader {
    task: Task,
    task_dir: PathBuf,
    split_config: SplitConfig,
}

impl TaskDataLoader {
    pub fn new(task: Task, task_dir: impl Into<PathBuf>, seed: u64) -> Self {
        Self {
            task,
            task_dir: task_dir.into(),
            split_config: SplitConfig {
                seed,
                ..SplitConfig::default()
            },
        }
    }

    pub fn with_split_config(mut self, split_config: SplitConfig) -> Self {
        self.split_config = split_config;
        self
    }

    fn dataframe_dir(&self) -> PathBuf {
        self.task_dir.join("dataframe")
    }

    fn split_path(&self, split: &str) -> PathBuf {
        self.dataframe_dir().join(format!("{split}.csv"))
    }

    /// Load the splits, generating and caching them from class folders if needed.
    pub fn load(&self) -> Result<DatasetSplits> {
        if !self.task_dir.exists() {
            return Err(ExperimentError::PathNotFound(self.task_dir.clone()));
        }

        let have_tables = SPLIT_NAMES.iter().all(|split| self.split_path(split).exists());
        let splits = if have_tables {
            DatasetSplits {
                train: self.read_split("train")?,
                val: self.read_split("val")?,
                test: self.read_split("test")?,
            }
        } else {
            let images_dir = self.task_dir.join("images");
            if !images_dir.is_dir() {
                return Err(ExperimentError::Dataset(format!(
                    "no split tables in {} and no images/ directory to build them from",
                    self.dataframe_dir().display()
                )));
            }
            tracing::info!("Generating stratified splits for {} from {}", self.task, images_dir.display());
            let samples = scan_class_folders(&images_dir, self.task.num_classes())?;
            let splits = stratified_split(samples, &self.split_config);
            self.write_splits(&splits)?;
            splits
        };

        for (name, samples) in [("train", &splits.train), ("val", &splits.val), ("test", &splits.test)] {
            if samples.is_empty() {
                return Err(ExperimentError::Dataset(format!(
                    "{} split of task {} is empty",
                    name, self.task
                )));
            }
            tracing::debug!(
                "{} {}: {} samples, class counts {:?}",
                self.task,
                name,
                samples.len(),
                DatasetSplits::class_distribution(samples, self.task.num_classes())
            );
        }

        Ok(splits)
    }

    fn read_split(&self, split: &str) -> Result<Vec<Sample>> {
        let path = self.split_path(split);
        let mut reader = csv::Reader::from_path(&path)?;
        let headers = reader.headers()?.clone();

        let column = |name: &str| {
            headers.iter().position(|h| h == name).ok_or_else(|| {
                ExperimentError::Dataset(format!("{} has no '{}' column", path.display(), name))
            })
        };
        let image_idx = column(IMAGE_COLUMN)?;
        let label_idx = column(self.task.target_column())?;

        let mut samples = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let image = record.get(image_idx).unwrap_or_default();
            let raw_label = record.get(label_idx).unwrap_or_default();
            let label = parse_label(raw_label, self.task.num_classes()).ok_or_else(|| {
                ExperimentError::Dataset(format!(
                    "{} row {}: invalid label '{}'",
                    path.display(),
                    row + 2,
                    raw_label
                ))
            })?;
            samples.push(Sample {
                path: self.task_dir.join(image),
                label,
            });
        }
        Ok(samples)
    }

    fn write_splits(&self, splits: &DatasetSplits) -> Result<()> {
        fs::create_dir_all(self.dataframe_dir())?;
        for (split, samples) in SPLIT_NAMES.iter().zip([&splits.train, &splits.val, &splits.test]) {
            let mut writer = csv::Writer::from_path(self.split_path(split))?;
            writer.write_record([IMAGE_COLUMN, self.task.target_column()])?;
            for sample in samples {
                let relative = sample
                    .path
                    .strip_prefix(&self.task_dir)
                    .unwrap_or(&sample.path)
                    .to_string_lossy()
                    .into_owned();
                let label = sample.label.to_string();
                writer.write_record([relative.as_str(), label.as_str()])?;
            }
            writer.flush()?;
        }
        Ok(())
    }
}

/// Labels are stored as integers; `1.0` style floats are tolerated.
fn parse_label(raw: &str, num_classes: usize) -> Option<usize> {
    let raw = raw.trim();
    let value = raw
        .parse::<usize>()
        .ok()
        .or_else(|| {
            raw.parse::<f64>()
                .ok()
                .filter(|v| v.fract() == 0.0 && *v >= 0.0)
                .map(|v| v as usize)
        })?;
    (value < num_classes).then_some(value)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Collect `(image, class index)` pairs from `<dir>/<class>/**`. Classes are
/// indexed in sorted directory-name order.
pub fn scan_class_folders(dir: &Path, num_classes: usize) -> Result<Vec<Sample>> {
    let mut class_dirs: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    class_dirs.sort();

    if class_dirs.len() != num_classes {
        return Err(ExperimentError::Dataset(format!(
            "expected {} class folders in {}, found {}",
            num_classes,
            dir.display(),
            class_dirs.len()
        )));
    }

    let mut samples = Vec::new();
    for (label, class_dir) in class_dirs.iter().enumerate() {
        let mut paths: Vec<PathBuf> = WalkDir::new(class_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file() && is_image(entry.path()))
            .map(|entry| entry.into_path())
            .collect();
        paths.sort();
        samples.extend(paths.into_iter().map(|path| Sample { path, label }));
    }
    Ok(samples)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Write `per_class` tiny PNGs for each of two classes under `<task_dir>/images`.
    pub(crate) fn write_class_folders(task_dir: &Path, per_class: usize, size: u32) {
        for class in 0..2u8 {
            let class_dir = task_dir.join("images").join(class.to_string());
            fs::create_dir_all(&class_dir).unwrap();
            for i in 0..per_class {
                let base: u8 = if class == 0 { 40 } else { 200 };
                let shade = base + (i % 10) as u8;
                let img = RgbImage::from_pixel(size, size, Rgb([shade, shade, shade]));
                img.save(class_dir.join(format!("img_{i}.png"))).unwrap();
            }
        }
    }

    #[test]
    fn test_parse_label() {
        assert_eq!(parse_label("1", 2), Some(1));
        assert_eq!(parse_label(" 0 ", 2), Some(0));
        assert_eq!(parse_label("1.0", 2), Some(1));
        assert_eq!(parse_label("2", 2), None);
        assert_eq!(parse_label("0.5", 2), None);
        assert_eq!(parse_label("yes", 2), None);
    }

    #[test]
    fn test_generates_and_caches_splits() {
        let dir = tempfile::tempdir().unwrap();
        let task_dir = dir.path().join("breast");
        write_class_folders(&task_dir, 10, 8);

        let loader = TaskDataLoader::new(Task::Breast, &task_dir, 1);
        let first = loader.load().unwrap();
        assert_eq!(first.total(), 20);
        assert!(task_dir.join("dataframe/train.csv").exists());

        // Second load reads the cached tables and sees the same partition.
        let second = loader.load().unwrap();
        assert_eq!(first.test, second.test);
        assert_eq!(first.train, second.train);
    }

    #[test]
    fn test_reads_task_specific_label_column() {
        let dir = tempfile::tempdir().unwrap();
        let task_dir = dir.path().join("acl");
        let frame_dir = task_dir.join("dataframe");
        fs::create_dir_all(&frame_dir).unwrap();
        for split in SPLIT_NAMES {
            fs::write(
                frame_dir.join(format!("{split}.csv")),
                "image_path,acl_label,patient\nscans/a.png,1,p1\nscans/b.png,0,p2\n",
            )
            .unwrap();
        }

        let splits = TaskDataLoader::new(Task::Acl, &task_dir, 0).load().unwrap();
        assert_eq!(splits.train.len(), 2);
        assert_eq!(splits.train[0].label, 1);
        assert_eq!(splits.train[0].path, task_dir.join("scans/a.png"));
    }

    #[test]
    fn test_missing_label_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let task_dir = dir.path().join("acl");
        let frame_dir = task_dir.join("dataframe");
        fs::create_dir_all(&frame_dir).unwrap();
        for split in SPLIT_NAMES {
            fs::write(frame_dir.join(format!("{split}.csv")), "image_path,label\na.png,1\n").unwrap();
        }

        let err = TaskDataLoader::new(Task::Acl, &task_dir, 0).load().unwrap_err();
        assert!(err.to_string().contains("acl_label"));
    }

    #[test]
    fn test_missing_task_dir() {
        let err = TaskDataLoader::new(Task::Thyroid, "/nonexistent/thyroid", 0)
            .load()
            .unwrap_err();
        assert!(matches!(err, ExperimentError::PathNotFound(_)));
    }
}
