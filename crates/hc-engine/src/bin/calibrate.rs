use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hc_engine::{Calibration, CalibrationConfig};

/// Calibrate hydrologic model parameters with Dynamically Dimensioned Search.
#[derive(Parser, Debug)]
#[command(name = "hc-calibrate")]
#[command(about = "Calibrate hydrologic model parameters against streamflow gauges")]
struct Args {
    /// JSON run configuration. Defaults apply when omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Continue from the trial log in the output directory.
    #[arg(long)]
    resume: bool,

    /// Seed of the random stream; overrides the configuration.
    #[arg(long)]
    seed: Option<u64>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => CalibrationConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CalibrationConfig::default(),
    };
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }

    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let outcome = Calibration::new(config)
        .with_resume(args.resume)
        .run()
        .await
        .context("calibration failed")?;

    info!(
        "Run {} (seed {}): best objective {:.6} at iteration {}",
        outcome.run_id, outcome.seed, outcome.incumbent.score, outcome.incumbent.iteration
    );
    for (name, value) in outcome.incumbent.best.iter() {
        info!("  {} = {}", name, value);
    }
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
