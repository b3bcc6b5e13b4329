mod catalog;
mod cli;
mod config;
mod error;
mod geojson;
mod memory;
mod model;
mod orchestrator;
mod raster;
mod runner;
mod state_machine;
mod store;
mod ui;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use catalog::{FireCatalog, FireRecord};
use cli::{Cli, Command};
use config::BatchConfig;
use error::BatchError;
use memory::ProcMeminfo;
use model::{AssessmentModel, SimulatedClipper, SimulatedModel};
use orchestrator::BatchOrchestrator;
use store::JobStore;
use ui::BatchProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = BatchConfig::load_from(Path::new(&cli.config))?;
    if let Some(concurrency) = cli.concurrency {
        config.concurrency_limit = concurrency;
    }
    if let Some(max_attempts) = cli.max_attempts {
        config.max_attempts = max_attempts;
    }

    match cli.command {
        Command::Run {
            years,
            max_fires,
            reprocess,
        } => run_batch(config, &years, max_fires, !reprocess).await,
        Command::Status => status(&config),
        Command::Rasterize {
            basins,
            output,
            resolution,
        } => rasterize_file(&config, &basins, output.as_deref(), resolution),
        Command::Demo { fires } => demo(config, fires).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debrisflow=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Inventories the catalog and processes the selected fires.
async fn run_batch(
    config: BatchConfig,
    years: &[i32],
    max_fires: Option<usize>,
    skip_existing: bool,
) -> Result<()> {
    let mut fires = FireCatalog::new(&config.root_folder).inventory()?;
    if !years.is_empty() {
        fires.retain(|f| years.contains(&f.year));
    }
    if let Some(max) = max_fires {
        fires.truncate(max);
    }
    if fires.is_empty() {
        bail!(BatchError::EmptyCatalog(config.root_folder.clone()));
    }
    info!(fires = fires.len(), root = %config.root_folder, "inventoried");

    let model = Arc::new(SimulatedModel::new(config.scenarios.clone()));
    execute_batch(config, fires, skip_existing, model).await
}

/// Runs a synthetic batch: fabricated fires spanning the optimization
/// levels, no geospatial inputs on disk.
async fn demo(config: BatchConfig, count: usize) -> Result<()> {
    let fires = (0..count)
        .map(|i| FireRecord {
            name: format!("demo{i:02}"),
            year: 2021,
            perimeter_present: true,
            severity_present: true,
            input_size_bytes: i as u64 * 30 * 1024 * 1024,
        })
        .collect();

    let model = Arc::new(SimulatedModel::new(config.scenarios.clone()));
    execute_batch(config, fires, false, model).await
}

async fn execute_batch(
    config: BatchConfig,
    fires: Vec<FireRecord>,
    skip_existing: bool,
    model: Arc<dyn AssessmentModel>,
) -> Result<()> {
    let store = Arc::new(JobStore::open(&config.output_folder)?);

    // Ctrl-C flips the cancellation signal; in-flight jobs finish their
    // current stage and terminate cleanly.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling batch");
            let _ = cancel_tx.send(true);
        }
    });

    let orchestrator = BatchOrchestrator::new(
        model,
        Arc::new(SimulatedClipper),
        Arc::new(ProcMeminfo),
        store,
        config,
        cancel_rx,
    );

    let progress = BatchProgress::start(fires.len() as u64);
    let report = orchestrator.run(fires, skip_existing, Some(&progress)).await?;
    progress.finish();
    ui::print_report(&report);
    Ok(())
}

fn status(config: &BatchConfig) -> Result<()> {
    let store = JobStore::open(&config.output_folder)?;
    match store.read_report()? {
        Some(report) => ui::print_report(&report),
        None => println!(
            "No aggregate report under {}. Run `debrisflow run` first.",
            config.output_folder
        ),
    }
    Ok(())
}

/// Rasterizes an exported basin vector file outside of a batch run.
fn rasterize_file(
    config: &BatchConfig,
    basins_path: &str,
    output: Option<&str>,
    resolution: Option<f64>,
) -> Result<()> {
    let input = Path::new(basins_path);
    let basins = geojson::read_basins(input)?;

    // Scenario set comes from the data itself; an empty collection falls
    // back to the configured list so the degenerate case still writes one
    // raster per scenario.
    let mut scenario_ids: Vec<String> = basins
        .iter()
        .flat_map(|b| b.probabilities.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if scenario_ids.is_empty() {
        scenario_ids = config.scenarios.clone();
    }

    let resolution = resolution.unwrap_or(config.resolution_meters);
    let result = raster::rasterize(&basins, &scenario_ids, resolution)?;

    for excluded in &result.excluded {
        warn!(%excluded, "basin excluded from rasterization");
    }

    let out_dir: PathBuf = output
        .map(PathBuf::from)
        .unwrap_or_else(|| input.parent().unwrap_or(Path::new(".")).to_path_buf());
    std::fs::create_dir_all(&out_dir)?;
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("basins");

    for (scenario, raster_output) in &result.rasters {
        let path = out_dir.join(format!("{stem}_{scenario}.asc"));
        raster::write_ascii_grid(raster_output, &path)?;
        println!("  wrote {}", path.display());
    }
    Ok(())
}
