//! Command-line interface, clap-based.
//!
//! Defines the [`Cli`] struct with subcommands [`Command`] (run, status,
//! rasterize, demo) and global flags (--config, --concurrency,
//! --max-attempts, --verbose).

use clap::{Parser, Subcommand};

/// debrisflow, batch post-fire debris-flow hazard assessment.
#[derive(Debug, Parser)]
#[command(name = "debrisflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "debrisflow.toml")]
    pub config: String,

    /// Maximum number of fires processed concurrently.
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Maximum retry attempts per stage.
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Enable verbose (debug-level) logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Process every fire found under the configured root folder.
    Run {
        /// Restrict processing to these years.
        #[arg(long)]
        years: Vec<i32>,

        /// Cap the number of fires processed this invocation.
        #[arg(long)]
        max_fires: Option<usize>,

        /// Re-run fires that already have successful results.
        #[arg(long, default_value_t = false)]
        reprocess: bool,
    },

    /// Summarize the persisted aggregate report.
    Status,

    /// Rasterize an exported basin vector file into probability grids.
    Rasterize {
        /// Path to a basins GeoJSON FeatureCollection.
        basins: String,

        /// Output folder for the rasters (defaults next to the input).
        #[arg(long)]
        output: Option<String>,

        /// Cell size in meters (defaults to the configured resolution).
        #[arg(long)]
        resolution: Option<f64>,
    },

    /// Run a synthetic batch against the built-in simulated engine.
    Demo {
        /// Number of synthetic fires to process.
        #[arg(long, default_value_t = 6)]
        fires: usize,
    },
}
