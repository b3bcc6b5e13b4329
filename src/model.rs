//! External collaborator interfaces.
//!
//! All geospatial computation is delegated: the assessment model owns the
//! hazard probability calculation and the clipper owns dataset preparation.
//! Both are traits so the batch can run against the real engine, the
//! built-in simulation (demo subcommand), or mock implementations in tests.

use std::collections::BTreeMap;
use std::path::Path;

use geo::{LineString, Polygon};

use crate::catalog::FireRecord;
use crate::error::StageError;
use crate::geojson;
use crate::memory::OptimizationLevel;
use crate::raster::BasinFeature;

/// The debris-flow hazard engine.
///
/// Calls are blocking; the runner wraps them in `spawn_blocking` and
/// applies the configured wall-clock bound to `assess`.
pub trait AssessmentModel: Send + Sync {
    /// Whether the fire's required inputs are present. Checked, not
    /// produced, before a job may leave INITIALIZED.
    fn has_required_inputs(&self, fire: &FireRecord) -> bool;

    /// Runs the hazard computation for one preprocessed fire. The
    /// optimization level is a resource hint; it must not change results.
    fn assess(
        &self,
        fire: &FireRecord,
        level: OptimizationLevel,
    ) -> Result<Vec<BasinFeature>, StageError>;

    /// Writes the per-basin vector products to the destination folder,
    /// returning product name to written path.
    fn export(
        &self,
        fire: &FireRecord,
        basins: &[BasinFeature],
        destination: &Path,
    ) -> Result<BTreeMap<String, String>, StageError>;
}

/// Clips shared datasets (soil, vegetation type, burn severity) to one
/// fire's extent during preprocessing.
pub trait DatasetClipper: Send + Sync {
    /// When `chunk_hint` is set the clip must run in batches of at most
    /// that many features to bound peak memory.
    fn clip(&self, fire: &FireRecord, chunk_hint: Option<u32>) -> Result<(), StageError>;
}

/// Deterministic stand-in for the real engine.
///
/// Lays out a row of square basins per fire with probabilities derived
/// from the basin position and scenario rank, so demo batches produce
/// stable, inspectable outputs without any geospatial inputs.
pub struct SimulatedModel {
    scenarios: Vec<String>,
}

impl SimulatedModel {
    pub fn new(scenarios: Vec<String>) -> Self {
        Self { scenarios }
    }

    fn basin_count(fire: &FireRecord) -> usize {
        2 + fire.name.len() % 3
    }
}

impl AssessmentModel for SimulatedModel {
    fn has_required_inputs(&self, fire: &FireRecord) -> bool {
        fire.perimeter_present && fire.severity_present
    }

    fn assess(
        &self,
        fire: &FireRecord,
        _level: OptimizationLevel,
    ) -> Result<Vec<BasinFeature>, StageError> {
        let count = Self::basin_count(fire);
        let basins = (0..count)
            .map(|i| {
                // 300m squares separated by 60m gaps.
                let x0 = i as f64 * 360.0;
                let geometry = Polygon::new(
                    LineString::from(vec![
                        (x0, 0.0),
                        (x0 + 300.0, 0.0),
                        (x0 + 300.0, 300.0),
                        (x0, 300.0),
                        (x0, 0.0),
                    ]),
                    vec![],
                );
                let base = (i + 1) as f64 / (count + 1) as f64;
                let probabilities = self
                    .scenarios
                    .iter()
                    .enumerate()
                    .map(|(rank, scenario)| {
                        // Heavier design storms carry higher probabilities.
                        let p = (base + rank as f64 * 0.1).min(1.0);
                        (scenario.clone(), p)
                    })
                    .collect();
                BasinFeature {
                    geometry,
                    probabilities,
                }
            })
            .collect();
        Ok(basins)
    }

    fn export(
        &self,
        fire: &FireRecord,
        basins: &[BasinFeature],
        destination: &Path,
    ) -> Result<BTreeMap<String, String>, StageError> {
        std::fs::create_dir_all(destination).map_err(|e| {
            StageError::Assessment {
                message: format!("cannot create export folder: {e}"),
                retryable: false,
            }
        })?;

        let basins_path = destination.join("basins.geojson");
        geojson::write_basins(basins, &basins_path).map_err(|e| StageError::Assessment {
            message: format!("export failed for {}: {e}", fire.key()),
            retryable: false,
        })?;

        let mut paths = BTreeMap::new();
        paths.insert("basins".to_string(), basins_path.display().to_string());
        Ok(paths)
    }
}

/// No-op clipper paired with [`SimulatedModel`]: the simulation needs no
/// shared datasets.
pub struct SimulatedClipper;

impl DatasetClipper for SimulatedClipper {
    fn clip(&self, _fire: &FireRecord, _chunk_hint: Option<u32>) -> Result<(), StageError> {
        Ok(())
    }
}
