//! vibropipe - Vibration capture anomaly scoring
//!
//! Batch CLI: discover capture workbooks under a root directory, run
//! the full scoring pipeline over each one in parallel, and update the
//! workbooks in place.
//!
//! # Usage
//!
//! ```bash
//! # Score every capture under ./captures with default settings
//! vibropipe ./captures
//!
//! # With a TOML config override
//! vibropipe ./captures --config vibropipe.toml
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Logging level (default: info)

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use vibropipe::{DatasetLocator, JsonWorkbookStore, Pipeline, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "vibropipe")]
#[command(about = "Batch anomaly scoring for vibration sensor captures")]
#[command(version)]
struct CliArgs {
    /// Root directory to scan for capture workbooks
    root: PathBuf,

    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    match run(&args) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &CliArgs) -> anyhow::Result<ExitCode> {
    let config = PipelineConfig::load(args.config.as_deref())
        .context("failed to load pipeline configuration")?;

    let locator = DatasetLocator::new(&config.locator);
    let files = locator
        .discover(&args.root)
        .with_context(|| format!("failed to scan {}", args.root.display()))?;
    if files.is_empty() {
        warn!(root = %args.root.display(), "no capture files found");
        return Ok(ExitCode::SUCCESS);
    }
    info!(count = files.len(), root = %args.root.display(), "captures queued");

    let store = JsonWorkbookStore::new();
    let summary = Pipeline::standard().run_batch(&store, &files, &config);

    info!(
        processed = summary.processed,
        skipped = summary.skipped.len(),
        "run complete"
    );
    for (file, reason) in &summary.skipped {
        warn!(file = %file.display(), reason, "capture skipped");
    }

    if summary.skipped.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
