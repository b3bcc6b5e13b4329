//! Minimal GeoJSON bridge for exported basin vectors.
//!
//! Just enough of the format to round-trip polygon basins with their
//! `P_<scenario>` probability properties through a FeatureCollection file.
//! Not a general GIS reader: non-polygon geometries are rejected rather
//! than coerced.

use anyhow::{Context, Result, bail};
use geo::{LineString, Polygon};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::Path;

use crate::raster::BasinFeature;

/// Property-name prefix for probability attributes, e.g. `P_16mmh`.
const PROBABILITY_PREFIX: &str = "P_";

/// Writes basins as a GeoJSON FeatureCollection.
pub fn write_basins(basins: &[BasinFeature], path: &Path) -> Result<()> {
    let features: Vec<Value> = basins.iter().map(feature_value).collect();
    let collection = json!({
        "type": "FeatureCollection",
        "features": features,
    });

    let file = std::fs::File::create(path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    serde_json::to_writer(std::io::BufWriter::new(file), &collection)?;
    Ok(())
}

fn feature_value(basin: &BasinFeature) -> Value {
    let ring_coords = |ring: &LineString<f64>| -> Vec<[f64; 2]> {
        ring.coords().map(|c| [c.x, c.y]).collect()
    };

    let mut rings = vec![ring_coords(basin.geometry.exterior())];
    rings.extend(basin.geometry.interiors().iter().map(ring_coords));

    let properties: serde_json::Map<String, Value> = basin
        .probabilities
        .iter()
        .map(|(scenario, prob)| (format!("{PROBABILITY_PREFIX}{scenario}"), json!(prob)))
        .collect();

    json!({
        "type": "Feature",
        "geometry": {
            "type": "Polygon",
            "coordinates": rings,
        },
        "properties": properties,
    })
}

/// Reads basins back from a GeoJSON FeatureCollection.
pub fn read_basins(path: &Path) -> Result<Vec<BasinFeature>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)?;

    let Some(features) = value.get("features").and_then(Value::as_array) else {
        bail!("{} is not a FeatureCollection", path.display());
    };

    features
        .iter()
        .enumerate()
        .map(|(i, feature)| parse_feature(feature).with_context(|| format!("feature {i}")))
        .collect()
}

fn parse_feature(feature: &Value) -> Result<BasinFeature> {
    let geometry = feature
        .get("geometry")
        .context("feature has no geometry")?;
    let geom_type = geometry.get("type").and_then(Value::as_str).unwrap_or("");
    if geom_type != "Polygon" {
        bail!("unsupported geometry type {geom_type:?}, expected Polygon");
    }

    let rings = geometry
        .get("coordinates")
        .and_then(Value::as_array)
        .context("polygon has no coordinates")?;
    let mut parsed_rings = rings.iter().map(parse_ring);
    let exterior = parsed_rings
        .next()
        .context("polygon has no exterior ring")??;
    let interiors = parsed_rings.collect::<Result<Vec<_>>>()?;

    let mut probabilities = BTreeMap::new();
    if let Some(properties) = feature.get("properties").and_then(Value::as_object) {
        for (name, value) in properties {
            if let Some(scenario) = name.strip_prefix(PROBABILITY_PREFIX)
                && let Some(prob) = value.as_f64()
            {
                probabilities.insert(scenario.to_string(), prob);
            }
        }
    }

    Ok(BasinFeature {
        geometry: Polygon::new(exterior, interiors),
        probabilities,
    })
}

fn parse_ring(ring: &Value) -> Result<LineString<f64>> {
    let positions = ring.as_array().context("ring is not an array")?;
    let coords = positions
        .iter()
        .map(|position| {
            let pair = position.as_array().context("position is not an array")?;
            let x = pair.first().and_then(Value::as_f64).context("missing x")?;
            let y = pair.get(1).and_then(Value::as_f64).context("missing y")?;
            Ok((x, y))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(LineString::from(coords))
}
