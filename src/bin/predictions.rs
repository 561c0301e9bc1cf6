//! Export per-sample predictions of a trained run
//!
//! The run is identified either by the same flags `medxfer train` takes or by
//! its parameter string. Its best checkpoint must exist.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use medxfer::backend::{default_device, DefaultBackend};
use medxfer::cli::RunArgs;
use medxfer::config::{ExperimentConfig, ParamSet, Settings};
use medxfer::run_predictions;
use medxfer::utils::logging::{init_logging, LogConfig};

#[derive(Parser, Debug)]
#[command(name = "predictions")]
#[command(about = "Write train/val/test predictions of a trained configuration")]
struct Cli {
    /// Settings file (TOML) with project paths
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Identify the run by its parameter string instead of the run flags
    #[arg(long)]
    from_param_str: Option<String>,

    #[command(flatten)]
    run: RunArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _ = init_logging(&LogConfig::from_verbosity(cli.verbose));

    let settings = Settings::load(cli.config.as_deref())?;
    let options = cli.run.to_options()?;
    let configs = match &cli.from_param_str {
        Some(param_str) => vec![ExperimentConfig::from_param_set(&ParamSet::decode_strict(param_str)?)?],
        None => cli.run.configs()?,
    };

    let device = default_device();
    for config in &configs {
        let written = run_predictions::<DefaultBackend>(&settings.paths, config, &options, &device)?;
        for path in written {
            println!("{} {}", "Wrote".green(), path.display());
        }
    }
    Ok(())
}
