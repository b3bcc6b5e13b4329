//! Vector-to-raster rendering of per-basin hazard probabilities.
//!
//! [`rasterize`] converts the assessment model's polygon output into one
//! probability grid per rainfall-intensity scenario. All scenarios share a
//! single grid geometry computed from the union bounding box of the basins,
//! snapped outward to whole multiples of the cell size so every basin is
//! fully covered. A cell takes the probability of the basin containing its
//! center. Basins are assumed non-overlapping; where footprints do overlap
//! at a cell center, the first basin in input order wins, so output never
//! depends on iteration luck.

use geo::{Area, BoundingRect, Contains, Point, Polygon, Rect, Validation};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// Sentinel written to cells covered by no basin.
pub const NO_DATA: f64 = -9999.0;

/// One polygon produced by the assessment model, carrying a probability per
/// rainfall-intensity scenario. All basins in one fire's output share a
/// projected coordinate system and scenario set.
#[derive(Debug, Clone, PartialEq)]
pub struct BasinFeature {
    pub geometry: Polygon<f64>,
    /// Scenario identifier (e.g. "16mmh") to probability in [0, 1].
    pub probabilities: BTreeMap<String, f64>,
}

/// A basin polygon rejected before rasterization. Excluded basins are
/// reported to the caller, never silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("basin {index} excluded: {reason}")]
pub struct GeometryError {
    /// Index of the basin in the input order.
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("resolution must be positive, got {0}")]
    InvalidResolution(f64),
}

/// One rendered grid. Written once, never mutated afterward.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterOutput {
    pub scenario_id: String,
    pub resolution_meters: f64,
    /// Georeferenced extent; cell edges align to whole multiples of the
    /// resolution.
    pub bounds: Rect<f64>,
    pub width: usize,
    pub height: usize,
    /// Row-major values, northernmost row first.
    pub grid: Vec<f64>,
    /// True when no valid basin contributed and the grid is all no-data.
    pub empty: bool,
}

/// Rasterization result: one grid per scenario plus the basins excluded
/// for invalid geometry.
#[derive(Debug, Clone)]
pub struct RasterizeResult {
    pub rasters: BTreeMap<String, RasterOutput>,
    pub excluded: Vec<GeometryError>,
}

/// Renders one grid per scenario from the given basin set.
///
/// Pure function of its inputs: identical basins, scenarios and resolution
/// yield bit-identical grids. Rows are filled in parallel but each cell's
/// value depends only on its own center point, so parallelism cannot change
/// the output. Zero valid basins produce all-no-data rasters flagged
/// `empty` rather than an error.
pub fn rasterize(
    basins: &[BasinFeature],
    scenario_ids: &[String],
    resolution_meters: f64,
) -> Result<RasterizeResult, RasterError> {
    if !(resolution_meters > 0.0) {
        return Err(RasterError::InvalidResolution(resolution_meters));
    }

    let (valid, excluded) = screen_basins(basins);

    let Some(bounds) = union_bounds(&valid) else {
        let rasters = scenario_ids
            .iter()
            .map(|scenario| (scenario.clone(), empty_raster(scenario, resolution_meters)))
            .collect();
        return Ok(RasterizeResult { rasters, excluded });
    };

    let bounds = snap_outward(bounds, resolution_meters);
    let width = ((bounds.max().x - bounds.min().x) / resolution_meters).round() as usize;
    let height = ((bounds.max().y - bounds.min().y) / resolution_meters).round() as usize;

    // Quick-reject boxes save a full point-in-polygon test for most cells.
    let boxes: Vec<Rect<f64>> = valid
        .iter()
        .filter_map(|basin| basin.geometry.bounding_rect())
        .collect();

    // Resolve each cell center to its owning basin once; every scenario
    // grid is then a lookup over the same ownership, which keeps the
    // scenario outputs mutually consistent.
    let mut owners: Vec<Option<u32>> = vec![None; width * height];
    owners
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(row, cells)| {
            let center_y = bounds.max().y - (row as f64 + 0.5) * resolution_meters;
            for (col, cell) in cells.iter_mut().enumerate() {
                let center_x = bounds.min().x + (col as f64 + 0.5) * resolution_meters;
                let center = Point::new(center_x, center_y);
                *cell = valid
                    .iter()
                    .zip(&boxes)
                    .position(|(basin, bbox)| {
                        covers(bbox, &center) && basin.geometry.contains(&center)
                    })
                    .map(|index| index as u32);
            }
        });

    let rasters = scenario_ids
        .iter()
        .map(|scenario| {
            let grid: Vec<f64> = owners
                .iter()
                .map(|owner| match owner {
                    Some(index) => valid[*index as usize]
                        .probabilities
                        .get(scenario)
                        .copied()
                        .unwrap_or(NO_DATA),
                    None => NO_DATA,
                })
                .collect();
            let raster = RasterOutput {
                scenario_id: scenario.clone(),
                resolution_meters,
                bounds,
                width,
                height,
                grid,
                empty: false,
            };
            (scenario.clone(), raster)
        })
        .collect();

    Ok(RasterizeResult { rasters, excluded })
}

/// Splits the input into rasterizable basins and excluded ones, preserving
/// input order for the valid set so first-wins stays stable.
fn screen_basins(basins: &[BasinFeature]) -> (Vec<&BasinFeature>, Vec<GeometryError>) {
    let mut valid = Vec::new();
    let mut excluded = Vec::new();

    for (index, basin) in basins.iter().enumerate() {
        if basin.geometry.unsigned_area() == 0.0 {
            excluded.push(GeometryError {
                index,
                reason: "zero-area polygon".into(),
            });
        } else if !basin.geometry.is_valid() {
            excluded.push(GeometryError {
                index,
                reason: "invalid polygon (self-intersecting or malformed)".into(),
            });
        } else {
            valid.push(basin);
        }
    }

    (valid, excluded)
}

fn union_bounds(basins: &[&BasinFeature]) -> Option<Rect<f64>> {
    basins
        .iter()
        .filter_map(|basin| basin.geometry.bounding_rect())
        .reduce(|acc, rect| {
            Rect::new(
                (acc.min().x.min(rect.min().x), acc.min().y.min(rect.min().y)),
                (acc.max().x.max(rect.max().x), acc.max().y.max(rect.max().y)),
            )
        })
}

/// Expands the extent outward to whole multiples of the cell size.
fn snap_outward(bounds: Rect<f64>, resolution: f64) -> Rect<f64> {
    let min_x = (bounds.min().x / resolution).floor() * resolution;
    let min_y = (bounds.min().y / resolution).floor() * resolution;
    let max_x = (bounds.max().x / resolution).ceil() * resolution;
    let max_y = (bounds.max().y / resolution).ceil() * resolution;
    // A degenerate extent still gets one cell.
    let max_x = if max_x > min_x { max_x } else { min_x + resolution };
    let max_y = if max_y > min_y { max_y } else { min_y + resolution };
    Rect::new((min_x, min_y), (max_x, max_y))
}

/// Closed-interval box test; `Rect::contains` excludes the boundary, which
/// would drop centers lying exactly on a basin's bounding edge.
fn covers(bbox: &Rect<f64>, point: &Point<f64>) -> bool {
    point.x() >= bbox.min().x
        && point.x() <= bbox.max().x
        && point.y() >= bbox.min().y
        && point.y() <= bbox.max().y
}

fn empty_raster(scenario: &str, resolution_meters: f64) -> RasterOutput {
    RasterOutput {
        scenario_id: scenario.to_string(),
        resolution_meters,
        bounds: Rect::new((0.0, 0.0), (0.0, 0.0)),
        width: 0,
        height: 0,
        grid: Vec::new(),
        empty: true,
    }
}

/// Writes a raster as an ESRI ASCII grid: a georeferenced header followed
/// by rows north to south, with an explicit NODATA value.
pub fn write_ascii_grid(raster: &RasterOutput, path: &Path) -> std::io::Result<()> {
    let file = std::fs::File::create(path)?;
    let mut out = std::io::BufWriter::new(file);

    writeln!(out, "ncols        {}", raster.width)?;
    writeln!(out, "nrows        {}", raster.height)?;
    writeln!(out, "xllcorner    {}", raster.bounds.min().x)?;
    writeln!(out, "yllcorner    {}", raster.bounds.min().y)?;
    writeln!(out, "cellsize     {}", raster.resolution_meters)?;
    writeln!(out, "NODATA_value {}", NO_DATA)?;

    for row in raster.grid.chunks(raster.width.max(1)) {
        let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writeln!(out, "{}", line.join(" "))?;
    }
    out.flush()
}
