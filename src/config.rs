//! Batch configuration loaded from `debrisflow.toml`.
//!
//! [`BatchConfig`] enumerates every configurable parameter explicitly;
//! there are no implicit keys. Values absent from the file fall back to
//! defaults. The `DEBRISFLOW_ROOT` environment variable takes precedence
//! over the file for the fire data root.

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

/// Top-level configuration loaded from `debrisflow.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Root folder containing fire data organized as `<year>/<fire_name>/`.
    #[serde(default = "default_root_folder")]
    pub root_folder: String,

    /// Output folder for job records, the aggregate report and rasters.
    #[serde(default = "default_output_folder")]
    pub output_folder: String,

    /// Maximum number of fires processed concurrently.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Input-size threshold (MB) above which light optimization applies.
    #[serde(default = "default_light_mb")]
    pub light_threshold_mb: f64,

    /// Input-size threshold (MB) above which moderate optimization applies.
    #[serde(default = "default_moderate_mb")]
    pub moderate_threshold_mb: f64,

    /// Input-size threshold (MB) above which aggressive optimization applies.
    #[serde(default = "default_aggressive_mb")]
    pub aggressive_threshold_mb: f64,

    /// Maximum retry attempts per stage before a job is marked failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay in milliseconds for exponential retry backoff.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Wall-clock bound in seconds for one assessment run.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Output raster cell size in meters.
    #[serde(default = "default_resolution_meters")]
    pub resolution_meters: f64,

    /// Rainfall-intensity scenarios rasterized per fire.
    #[serde(default = "default_scenarios")]
    pub scenarios: Vec<String>,

    /// Max features per processing chunk when the profiler forces chunking.
    #[serde(default = "default_chunk_features")]
    pub chunk_features: u32,
}

// Fire data root: `./fires`.
fn default_root_folder() -> String {
    "fires".to_string()
}

// Output root: `./output`.
fn default_output_folder() -> String {
    "output".to_string()
}

// Concurrent fires: 4.
fn default_concurrency_limit() -> usize {
    4
}

// Optimization breakpoints in MB: 10 / 50 / 100.
fn default_light_mb() -> f64 {
    10.0
}

fn default_moderate_mb() -> f64 {
    50.0
}

fn default_aggressive_mb() -> f64 {
    100.0
}

// Retries per stage: 3.
fn default_max_attempts() -> u32 {
    3
}

// Backoff base: 1000ms.
fn default_base_delay_ms() -> u64 {
    1000
}

// Assessment bound: 30 minutes.
fn default_timeout_seconds() -> u64 {
    1800
}

// Raster cell size: 30m.
fn default_resolution_meters() -> f64 {
    30.0
}

// Peak 15-minute rainfall intensities, in mm/h.
fn default_scenarios() -> Vec<String> {
    ["16mmh", "20mmh", "24mmh", "40mmh"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// Forced chunk size: 256 features.
fn default_chunk_features() -> u32 {
    256
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            root_folder: default_root_folder(),
            output_folder: default_output_folder(),
            concurrency_limit: default_concurrency_limit(),
            light_threshold_mb: default_light_mb(),
            moderate_threshold_mb: default_moderate_mb(),
            aggressive_threshold_mb: default_aggressive_mb(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            timeout_seconds: default_timeout_seconds(),
            resolution_meters: default_resolution_meters(),
            scenarios: default_scenarios(),
            chunk_features: default_chunk_features(),
        }
    }
}

impl BatchConfig {
    /// Loads the configuration from `debrisflow.toml` in the current
    /// directory. Uses defaults if the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("debrisflow.toml"))
    }

    /// Loads the configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<BatchConfig>(&contents)?
        } else {
            Self::default()
        };

        // Environment variable takes precedence over the file for the root.
        if let Ok(root) = std::env::var("DEBRISFLOW_ROOT")
            && !root.is_empty()
        {
            config.root_folder = root;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = BatchConfig::default();
        assert_eq!(config.concurrency_limit, 4);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.timeout_seconds, 1800);
        assert_eq!(config.resolution_meters, 30.0);
        assert_eq!(config.light_threshold_mb, 10.0);
        assert_eq!(config.moderate_threshold_mb, 50.0);
        assert_eq!(config.aggressive_threshold_mb, 100.0);
        assert_eq!(config.scenarios.len(), 4);
        assert_eq!(config.scenarios[0], "16mmh");
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            root_folder = "/data/fires"
            concurrency_limit = 8
            aggressive_threshold_mb = 200.0
        "#;
        let config: BatchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.root_folder, "/data/fires");
        assert_eq!(config.concurrency_limit, 8);
        assert_eq!(config.aggressive_threshold_mb, 200.0);
        // Untouched keys keep their defaults.
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.resolution_meters, 30.0);
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let config = BatchConfig::load_from(Path::new("no_such_config.toml")).unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.output_folder, "output");
    }

    #[test]
    fn scenario_defaults_cover_design_storms() {
        let config = BatchConfig::default();
        assert_eq!(config.scenarios, vec!["16mmh", "20mmh", "24mmh", "40mmh"]);
    }
}
