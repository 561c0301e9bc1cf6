//! medxfer CLI
//!
//! Grid search, single runs, result aggregation and plotting for the
//! transfer-learning ablation experiments.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use medxfer::backend::backend_name;
use medxfer::cli::RunArgs;
use medxfer::config::settings::load_toml_config;
use medxfer::config::{ExperimentConfig, GridSpec, RunOptions, Settings};
use medxfer::results::{plan_charts, render_chart, summarize, visualize::load_summary};
use medxfer::run_on_selected_backend;
use medxfer::utils::logging::{init_logging, LogConfig};
use medxfer::utils::{format_duration, format_metric};

/// Transfer-learning ablations for medical image classification
#[derive(Parser, Debug)]
#[command(name = "medxfer")]
#[command(version)]
#[command(about = "Transfer-learning ablation experiments with Burn", long_about = None)]
struct Cli {
    /// Settings file (TOML) with paths and the default grid
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every configuration of the hyperparameter grid
    Runall {
        /// Grid file (TOML); defaults to the `[grid]` table of the settings
        #[arg(long)]
        grid: Option<PathBuf>,

        /// Log failed runs and continue with the rest of the grid
        #[arg(long, default_value = "false")]
        keep_going: bool,
    },

    /// Collect the best epoch of every run into results/results.csv
    Summarize,

    /// Plot metric distributions per hyperparameter from results/results.csv
    Visualize,

    /// Train and test a single configuration
    Train {
        #[command(flatten)]
        run: RunArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = init_logging(&LogConfig::from_verbosity(cli.verbose));
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Runall { grid, keep_going } => cmd_runall(&settings, grid.as_deref(), keep_going),
        Commands::Summarize => cmd_summarize(&settings),
        Commands::Visualize => cmd_visualize(&settings),
        Commands::Train { run } => {
            let configs = run.configs()?;
            let options = run.to_options()?;
            run_configs(&settings, &configs, &options, false)
        }
    }
}

fn cmd_runall(settings: &Settings, grid_path: Option<&Path>, keep_going: bool) -> Result<()> {
    let grid: GridSpec = match grid_path {
        Some(path) => load_toml_config(path).with_context(|| format!("loading grid {}", path.display()))?,
        None => settings.grid.clone(),
    };
    let configs = grid.expand()?;

    println!("{}", "Hyperparameter grid".green().bold());
    println!(
        "  {} runs ({} grid points) on {}",
        configs.len(),
        grid.size(),
        backend_name()
    );

    run_configs(settings, &configs, &grid.run, keep_going)
}

fn run_configs(settings: &Settings, configs: &[ExperimentConfig], options: &RunOptions, keep_going: bool) -> Result<()> {
    let started = Instant::now();

    let pb = ProgressBar::new(configs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}")?
            .progress_chars("#>-"),
    );

    let mut failures = Vec::new();
    for config in configs {
        let param_str = config.param_str()?;
        pb.set_message(param_str.clone());

        match run_on_selected_backend(&settings.paths, config, options) {
            Ok(outcome) => {
                let test = outcome.history.records().last().map(|r| r.test());
                pb.println(format!(
                    "{} {} | best val AUC {} (epoch {}) | test AUC {}",
                    "done".green(),
                    param_str,
                    format_metric(outcome.best_val_auc),
                    outcome.best_epoch,
                    format_metric(test.map(|t| t.auc).unwrap_or(f64::NAN))
                ));
            }
            Err(e) if keep_going => {
                warn!("Run {} failed: {}", param_str, e);
                pb.println(format!("{} {}: {}", "failed".red(), param_str, e));
                failures.push(param_str);
            }
            Err(e) => {
                pb.abandon();
                return Err(e).with_context(|| format!("run {param_str}"));
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!(
        "{} of {} runs finished in {}",
        configs.len() - failures.len(),
        configs.len(),
        format_duration(started.elapsed().as_secs_f64())
    );
    if !failures.is_empty() {
        println!("{} {} runs failed:", "Warning:".yellow(), failures.len());
        for param_str in &failures {
            println!("  {param_str}");
        }
    }
    Ok(())
}

fn cmd_summarize(settings: &Settings) -> Result<()> {
    let rows = summarize(&settings.paths)?;
    println!("{}", "Summary".green().bold());
    println!("  {} runs -> {}", rows.len(), settings.paths.summary_path().display());
    for task in rows.iter().map(|r| r.task.as_str()).collect::<std::collections::BTreeSet<_>>() {
        let best = rows
            .iter()
            .filter(|r| r.task == task)
            .map(|r| r.record.val_auc)
            .fold(f64::NAN, f64::max);
        println!("  {:<12} best val AUC {}", task, format_metric(best));
    }
    Ok(())
}

fn cmd_visualize(settings: &Settings) -> Result<()> {
    let table = load_summary(&settings.paths)?;
    let jobs = plan_charts(&table);

    let pb = ProgressBar::new(jobs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("Creating visualizations [{bar:40.cyan/blue}] {pos}/{len}")?
            .progress_chars("#>-"),
    );

    let mut written = 0;
    for job in &jobs {
        if render_chart(&table, job, &settings.paths.results_dir)? {
            written += 1;
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!(
        "{} {} charts under {}",
        "Wrote".green(),
        written,
        settings.paths.results_dir.display()
    );
    Ok(())
}
