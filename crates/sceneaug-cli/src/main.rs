use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sceneaug_contracts::events::EventWriter;
use sceneaug_contracts::new_run_id;
use sceneaug_contracts::runs::summary::write_summary;
use sceneaug_engine::{AugmentRunner, ClientConfig, EditClient, RunOptions};
use serde_json::{Map, Value};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_INPUT_IMAGE: &str = "background_images/CAM3.png";
const DEFAULT_DEST_FOLDER: &str = "output/CAM3_ped_bic/images";

#[derive(Debug, Parser)]
#[command(
    name = "sceneaug",
    version,
    about = "Generate street-scene variants with extra pedestrians and bicycles"
)]
struct Cli {
    /// Source street-scene image.
    #[arg(short = 'i', long, alias = "input_image", default_value = DEFAULT_INPUT_IMAGE)]
    input_image: PathBuf,
    /// Folder the generated images are moved into (created if missing).
    #[arg(short = 'd', long, alias = "dest_folder", default_value = DEFAULT_DEST_FOLDER)]
    dest_folder: PathBuf,
    #[arg(short = 'n', long, alias = "num_images", default_value_t = 100)]
    num_images: u32,
    /// Staging directory for round-trip output.
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    output_prefix: Option<String>,
    /// Append run events (JSON lines) to this file.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Write a JSON run summary here when the loop finishes.
    #[arg(long)]
    summary: Option<PathBuf>,
    #[arg(long, default_value_t = 2.0)]
    delay_secs: f64,
}

fn main() {
    init_tracing();
    if let Err(err) = run(Cli::parse()) {
        error!("sceneaug error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut config = ClientConfig::from_env().context("resolving client configuration")?;
    if let Some(model) = cli.model.as_deref() {
        config = config.with_model(model);
    }
    let model = config.model.clone();

    let run_id = new_run_id();
    let events = match cli.events.as_ref() {
        Some(path) => EventWriter::new(path, &run_id),
        None => EventWriter::disabled(&run_id),
    };

    let client = EditClient::new(config);
    let mut runner =
        AugmentRunner::new(client, run_options(&cli)?, rand::thread_rng()).with_events(events);
    let report = runner.run()?;

    if let Some(path) = cli.summary.as_ref() {
        let mut extra = Map::new();
        extra.insert("model".to_string(), Value::String(model));
        write_summary(path, &report.to_summary(runner.options()), Some(&extra))
            .with_context(|| format!("failed to write summary {}", path.display()))?;
        info!("run summary written to {}", path.display());
    }
    if report.failed() > 0 {
        info!(
            "{} of {} round-trips failed: {:?}",
            report.failed(),
            report.requested,
            report.failures
        );
    }
    Ok(())
}

fn run_options(cli: &Cli) -> Result<RunOptions> {
    let delay = Duration::try_from_secs_f64(cli.delay_secs)
        .with_context(|| format!("invalid --delay-secs {}", cli.delay_secs))?;
    let mut options = RunOptions::new(&cli.input_image, &cli.dest_folder, cli.num_images);
    options.work_dir = cli.work_dir.clone();
    options.output_prefix = cli.output_prefix.clone();
    options.inter_request_delay = delay;
    Ok(options)
}
