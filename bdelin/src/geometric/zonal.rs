use geo::{BoundingRect, Contains, Point};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info};

use super::populate::FeatureValue;
use crate::error::{BoundaryError, Result};
use crate::layer::PolygonLayer;
use crate::raster::Raster;

/// Statistic aggregated over the pixels of a polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsMeasure {
    Count,
    Min,
    Max,
    Mean,
    #[default]
    Median,
    Sum,
    Std,
    Range,
}

impl StatsMeasure {
    pub fn name(self) -> &'static str {
        match self {
            StatsMeasure::Count => "count",
            StatsMeasure::Min => "min",
            StatsMeasure::Max => "max",
            StatsMeasure::Mean => "mean",
            StatsMeasure::Median => "median",
            StatsMeasure::Sum => "sum",
            StatsMeasure::Std => "std",
            StatsMeasure::Range => "range",
        }
    }

    /// Aggregate valid pixel values. `None` for an empty set.
    pub fn aggregate(self, values: &mut [f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let sum: f64 = values.iter().sum();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let value = match self {
            StatsMeasure::Count => n,
            StatsMeasure::Min => min,
            StatsMeasure::Max => max,
            StatsMeasure::Mean => sum / n,
            StatsMeasure::Sum => sum,
            StatsMeasure::Range => max - min,
            StatsMeasure::Std => {
                let mean = sum / n;
                (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
            }
            StatsMeasure::Median => {
                values.sort_by(|a, b| a.total_cmp(b));
                let mid = values.len() / 2;
                if values.len() % 2 == 0 {
                    (values[mid - 1] + values[mid]) / 2.0
                } else {
                    values[mid]
                }
            }
        };
        Some(value)
    }
}

impl FromStr for StatsMeasure {
    type Err = BoundaryError;

    fn from_str(s: &str) -> Result<Self> {
        let measure = match s.trim().to_lowercase().as_str() {
            "count" => StatsMeasure::Count,
            "min" => StatsMeasure::Min,
            "max" => StatsMeasure::Max,
            "mean" => StatsMeasure::Mean,
            "median" => StatsMeasure::Median,
            "sum" => StatsMeasure::Sum,
            "std" => StatsMeasure::Std,
            "range" => StatsMeasure::Range,
            other => {
                return Err(BoundaryError::Config(format!(
                    "unknown statistic measure '{}'",
                    other
                )))
            }
        };
        Ok(measure)
    }
}

impl std::fmt::Display for StatsMeasure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Compute `measure` over the pixels of `band` whose centres fall inside
/// each polygon. Pixels equal to the raster nodata, to `nodata` or NaN are
/// ignored; a polygon with no valid pixel gets no value.
pub fn zonal_stats(
    raster: &Raster,
    band: usize,
    polygons: &PolygonLayer,
    measure: StatsMeasure,
    nodata: Option<f64>,
) -> Result<Vec<FeatureValue>> {
    let pixels = raster.band(band)?;
    let mut results = Vec::with_capacity(polygons.len());
    let mut without_data = 0;

    for feature in &polygons.features {
        let mut values = Vec::new();
        let window = feature
            .geometry
            .bounding_rect()
            .and_then(|rect| raster.pixel_window(&rect));
        if let Some((cols, rows)) = window {
            for row in rows {
                for col in cols.clone() {
                    let value = pixels[row * raster.width + col];
                    if raster.is_nodata(value, nodata) {
                        continue;
                    }
                    let (x, y) = raster.pixel_center(col, row);
                    if feature.geometry.contains(&Point::new(x, y)) {
                        values.push(value);
                    }
                }
            }
        }
        let value = measure.aggregate(&mut values);
        if value.is_none() {
            without_data += 1;
            debug!("Feature {:?} has no valid pixels in band {}", feature.id, band);
        }
        results.push(FeatureValue::new(feature.id, value));
    }

    info!(
        "Zonal {} of band {} over {}: {} polygons, {} without data",
        measure,
        band,
        polygons.name,
        polygons.len(),
        without_data
    );
    Ok(results)
}

/// Absolute left/right difference; unset when either side is missing.
pub fn gradient(left: Option<f64>, right: Option<f64>) -> Option<f64> {
    match (left, right) {
        (Some(l), Some(r)) => Some((l - r).abs()),
        _ => None,
    }
}

/// Pair left and right statistics by `ID` and compute their gradients.
/// Every left entry yields one gradient; a missing right side leaves it unset.
pub fn gradients(left: &[FeatureValue], right: &[FeatureValue]) -> Vec<FeatureValue> {
    let mut right_by_id = std::collections::HashMap::new();
    for entry in right {
        if let Some(id) = entry.id {
            right_by_id.entry(id).or_insert(entry.value);
        }
    }
    left.iter()
        .map(|entry| {
            let right_value = entry.id.and_then(|id| right_by_id.get(&id).copied().flatten());
            FeatureValue::new(entry.id, gradient(entry.value, right_value))
        })
        .collect()
}
