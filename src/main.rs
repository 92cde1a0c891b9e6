//! haberman-survival - CLI entry point
//!
//! Runs the survival analysis on a semicolon-delimited follow-up table.

use clap::Parser;
use haberman_survival::{pipeline, AnalysisConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "haberman-survival")]
#[command(version)]
#[command(about = "Kaplan-Meier, log-rank and Cox analysis of breast cancer follow-up data")]
struct Cli {
    /// Configuration file (YAML); defaults are used when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input data file, overrides the config
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Directory for the SVG charts, overrides the config
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip chart generation
    #[arg(long)]
    no_plots: bool,

    /// Write the effective configuration to this file and exit
    #[arg(long)]
    write_config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            log::info!("Loading config from {:?}", path);
            AnalysisConfig::from_file(path)?
        }
        None => AnalysisConfig::default(),
    };
    if let Some(input) = cli.input {
        config.input.path = input;
    }
    if let Some(output) = cli.output {
        config.plots.output_dir = output;
    }
    if cli.no_plots {
        config.plots.enabled = false;
    }

    if let Some(path) = cli.write_config {
        config.validate()?;
        config.save(&path)?;
        println!("Configuration written to {:?}", path);
        return Ok(());
    }

    let report = pipeline::run(&config)?;

    println!();
    println!("=== Done ===");
    println!(
        "{} patients, {} deaths, C-index {:.3}",
        report.n_patients, report.n_events, report.metrics.c_index
    );
    for path in &report.plots {
        println!("  {}", path.display());
    }

    Ok(())
}
