//! Distribution plots of summary metrics per hyperparameter

use std::path::{Path, PathBuf};

use super::charts::{generate_box_strip_chart, CategoryData};
use super::summary::{param_columns, SummaryTable, TASK_COLUMN};
use crate::config::ProjectPaths;
use crate::utils::error::{ExperimentError, Result};

pub const OVERALL: &str = "overall";

pub const METRICS: [&str; 6] = ["val_auc", "val_f1", "val_accuracy", "test_auc", "test_f1", "test_accuracy"];

fn metric_title(metric: &str) -> String {
    let (phase, name) = metric.split_once('_').unwrap_or(("", metric));
    let phase = match phase {
        "val" => "Validation",
        "test" => "Test",
        other => other,
    };
    let name = match name {
        "auc" => "AUC",
        "f1" => "F1",
        "accuracy" => "Accuracy",
        other => other,
    };
    format!("{phase} {name}")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// One plot to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartJob {
    /// `overall` or a task name
    pub group: String,
    pub metric: &'static str,
    pub hyperparam: &'static str,
}

impl ChartJob {
    pub fn title(&self) -> String {
        format!("{} {} by {}", capitalize(&self.group), metric_title(self.metric), self.hyperparam)
    }

    /// `<results>/<group>/<val|test>/<metric>/<group>_<metric>_by_<hp>.svg`
    pub fn output_path(&self, results_dir: &Path) -> PathBuf {
        let (phase, name) = self.metric.split_once('_').unwrap_or(("", self.metric));
        results_dir
            .join(&self.group)
            .join(phase)
            .join(name)
            .join(format!("{}_{}_by_{}.svg", self.group, self.metric, self.hyperparam))
    }
}

/// Every group/metric/hyperparameter combination whose columns exist
pub fn plan_charts(table: &SummaryTable) -> Vec<ChartJob> {
    let mut groups = vec![OVERALL.to_string()];
    let mut tasks = table.distinct(TASK_COLUMN);
    tasks.retain(|t| !t.is_empty());
    tasks.sort();
    groups.extend(tasks);

    let mut jobs = Vec::new();
    for group in &groups {
        for metric in METRICS {
            if table.column(metric).is_none() {
                tracing::debug!("No '{}' column, skipping", metric);
                continue;
            }
            for key in param_columns() {
                let hyperparam = key.as_str();
                if table.column(hyperparam).is_none() {
                    continue;
                }
                jobs.push(ChartJob {
                    group: group.clone(),
                    metric,
                    hyperparam,
                });
            }
        }
    }
    jobs
}

/// Group the metric by hyperparameter value for one chart. Rows with an
/// empty category or a non-finite metric are dropped. Numeric categories are
/// sorted by value, others keep their order of first appearance.
pub fn categories_for(table: &SummaryTable, job: &ChartJob) -> Vec<CategoryData> {
    let (Some(metric_idx), Some(hp_idx)) = (table.column(job.metric), table.column(job.hyperparam)) else {
        return Vec::new();
    };
    let task_idx = table.column(TASK_COLUMN);

    let mut categories: Vec<CategoryData> = Vec::new();
    for row in &table.rows {
        if job.group != OVERALL {
            let task = task_idx.and_then(|i| row.get(i)).map(String::as_str);
            if task != Some(job.group.as_str()) {
                continue;
            }
        }
        let Some(label) = row.get(hp_idx).filter(|v| !v.is_empty()) else {
            continue;
        };
        let Some(value) = row
            .get(metric_idx)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite())
        else {
            continue;
        };
        match categories.iter_mut().find(|c| &c.label == label) {
            Some(category) => category.values.push(value),
            None => categories.push(CategoryData {
                label: label.clone(),
                values: vec![value],
            }),
        }
    }

    let numeric: Option<Vec<f64>> = categories.iter().map(|c| c.label.parse::<f64>().ok()).collect();
    if numeric.is_some() {
        categories.sort_by(|a, b| {
            let a = a.label.parse::<f64>().unwrap_or(f64::NAN);
            let b = b.label.parse::<f64>().unwrap_or(f64::NAN);
            a.total_cmp(&b)
        });
    }
    categories
}

/// Render one chart. Returns `false` when the combination has no data.
pub fn render_chart(table: &SummaryTable, job: &ChartJob, results_dir: &Path) -> Result<bool> {
    let categories = categories_for(table, job);
    if categories.is_empty() {
        tracing::debug!("No data for {}, skipping", job.title());
        return Ok(false);
    }
    generate_box_strip_chart(
        &job.title(),
        job.hyperparam,
        &metric_title(job.metric),
        &categories,
        &job.output_path(results_dir),
    )?;
    Ok(true)
}

/// Load the summary table, failing with a hint when it does not exist yet
pub fn load_summary(paths: &ProjectPaths) -> Result<SummaryTable> {
    let path = paths.summary_path();
    if !path.exists() {
        return Err(ExperimentError::Config(format!(
            "{} not found; run summarize first",
            path.display()
        )));
    }
    SummaryTable::load(&path)
}

/// Render every chart; returns the number of files written
pub fn visualize(paths: &ProjectPaths) -> Result<usize> {
    let table = load_summary(paths)?;
    let mut written = 0;
    for job in plan_charts(&table) {
        if render_chart(&table, &job, &paths.results_dir)? {
            written += 1;
        }
    }
    tracing::info!("Wrote {} charts under {:?}", written, paths.results_dir);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn table() -> SummaryTable {
        let headers = ["val_auc", "test_auc", "lr", "clf", "task"];
        let rows = [
            ["0.8", "0.7", "0.001", "Linear", "acl"],
            ["0.6", "NaN", "0.0001", "Linear", "acl"],
            ["0.9", "0.85", "0.001", "Conv", "breast"],
            ["NaN", "0.5", "", "Conv", "breast"],
        ];
        SummaryTable {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn test_titles_and_paths() {
        let job = ChartJob {
            group: "acl".to_string(),
            metric: "test_f1",
            hyperparam: "clf",
        };
        assert_eq!(job.title(), "Acl Test F1 by clf");
        assert_eq!(
            job.output_path(Path::new("results")),
            Path::new("results/acl/test/f1/acl_test_f1_by_clf.svg")
        );
        assert_eq!(metric_title("val_accuracy"), "Validation Accuracy");
    }

    #[test]
    fn test_plan_skips_missing_columns() {
        let jobs = plan_charts(&table());
        // 3 groups x 2 present metrics x 2 present hyperparameters
        assert_eq!(jobs.len(), 12);
        assert_eq!(jobs[0].group, OVERALL);
        assert!(jobs.iter().all(|j| j.metric != "val_f1"));
    }

    #[test]
    fn test_categories_drop_non_finite_and_sort_numeric() {
        let t = table();
        let job = ChartJob {
            group: OVERALL.to_string(),
            metric: "val_auc",
            hyperparam: "lr",
        };
        let categories = categories_for(&t, &job);
        let labels: Vec<&str> = categories.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["0.0001", "0.001"]);
        assert_eq!(categories[1].values, vec![0.8, 0.9]);

        let acl = ChartJob {
            group: "acl".to_string(),
            metric: "test_auc",
            hyperparam: "clf",
        };
        let categories = categories_for(&t, &acl);
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].values, vec![0.7]);
    }

    #[test]
    fn test_visualize_requires_summary() {
        let temp = TempDir::new().unwrap();
        let paths = ProjectPaths {
            results_dir: temp.path().join("results"),
            ..ProjectPaths::default()
        };
        let err = visualize(&paths).unwrap_err();
        assert!(err.to_string().contains("run summarize first"));
    }

    #[test]
    fn test_visualize_writes_svgs() {
        let temp = TempDir::new().unwrap();
        let paths = ProjectPaths {
            results_dir: temp.path().join("results"),
            ..ProjectPaths::default()
        };
        fs::create_dir_all(&paths.results_dir).unwrap();
        fs::write(
            paths.summary_path(),
            "val_auc,clf,task\n0.8,Linear,acl\n0.7,Conv,acl\n0.9,Linear,breast\n",
        )
        .unwrap();

        let written = visualize(&paths).unwrap();
        assert_eq!(written, 3);
        assert!(paths
            .results_dir
            .join("overall/val/auc/overall_val_auc_by_clf.svg")
            .exists());
        assert!(paths
            .results_dir
            .join("breast/val/auc/breast_val_auc_by_clf.svg")
            .exists());
    }
}
