use geo::{Area, Coord, Geometry as GeoGeometry, LineString, Polygon};
use geos::{BufferParams, CapStyle, Geom, Geometry as GeosGeometry, JoinStyle};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BoundaryError, Result};
use crate::layer::{LineLayer, PolygonFeature, PolygonLayer};

/// Side of a line, relative to its direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn label(self) -> &'static str {
        match self {
            Side::Left => "Left",
            Side::Right => "Right",
        }
    }
}

/// Builds a polygon covering one side of a line at a fixed distance.
pub trait BufferBuilder {
    fn single_sided(&self, line: &LineString<f64>, distance: f64, side: Side) -> Result<Polygon<f64>>;
}

/// Single-sided buffers through GEOS, flat end caps and mitred joins.
#[derive(Debug, Clone, Copy)]
pub struct GeosBufferBuilder {
    pub mitre_limit: f64,
}

impl Default for GeosBufferBuilder {
    fn default() -> Self {
        GeosBufferBuilder { mitre_limit: 4.0 }
    }
}

/// Coordinates with consecutive duplicates removed.
fn distinct_coords(line: &LineString<f64>) -> Result<Vec<Coord<f64>>> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(line.0.len());
    for c in &line.0 {
        if !(c.x.is_finite() && c.y.is_finite()) {
            return Err(BoundaryError::geometry(None, "non-finite coordinate"));
        }
        if coords.last() != Some(c) {
            coords.push(*c);
        }
    }
    if coords.len() < 2 {
        return Err(BoundaryError::geometry(
            None,
            "line needs at least 2 distinct vertices",
        ));
    }
    Ok(coords)
}

impl BufferBuilder for GeosBufferBuilder {
    fn single_sided(&self, line: &LineString<f64>, distance: f64, side: Side) -> Result<Polygon<f64>> {
        let line = LineString::new(distinct_coords(line)?);
        let geos_line: GeosGeometry = line.try_into()?;
        let params = BufferParams::builder()
            .end_cap_style(CapStyle::Flat)
            .join_style(JoinStyle::Mitre)
            .mitre_limit(self.mitre_limit)
            .single_sided(true)
            .build()?;
        // GEOS buffers positive widths on the left
        let width = match side {
            Side::Left => distance,
            Side::Right => -distance,
        };
        let buffered = geos_line.buffer_with_params(width, &params)?;
        let geometry: GeoGeometry<f64> = buffered.try_into()?;

        // Folded lines can leave slivers next to the main part
        let polygon = match geometry {
            GeoGeometry::MultiPolygon(multi) => multi
                .0
                .into_iter()
                .max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area())),
            other => crate::layer::as_polygon(other),
        }
        .ok_or_else(|| BoundaryError::geometry(None, "buffer is not a polygon"))?;
        if polygon.unsigned_area() <= f64::EPSILON * distance * distance {
            return Err(BoundaryError::geometry(None, "buffer polygon has no area"));
        }
        Ok(polygon)
    }
}

/// Outcome of buffering a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferReport {
    pub total: usize,
    pub created: usize,
    pub failed: usize,
}

/// Buffer every line of `layer` on `side`. Each polygon keeps the `ID` of
/// its line; lines whose buffer cannot be built are dropped and counted.
pub fn build_buffer_layer(
    layer: &LineLayer,
    builder: &dyn BufferBuilder,
    distance: f64,
    side: Side,
) -> Result<(PolygonLayer, BufferReport)> {
    if !(distance.is_finite() && distance > 0.0) {
        return Err(BoundaryError::Config(format!(
            "buffer distance must be > 0, got {}",
            distance
        )));
    }
    info!(
        "Creating single-sided buffer at distance {} on {} side...",
        distance,
        side.label()
    );

    let mut report = BufferReport {
        total: layer.len(),
        ..BufferReport::default()
    };
    let mut features = Vec::with_capacity(layer.len());
    for feature in &layer.features {
        match builder.single_sided(&feature.geometry, distance, side) {
            Ok(polygon) => {
                features.push(PolygonFeature::new(feature.id(), polygon));
                report.created += 1;
            }
            Err(e) => {
                warn!("Buffer for feature {:?} failed: {}", feature.id(), e);
                report.failed += 1;
            }
        }
    }

    info!(
        "Single-sided buffer created. {} features processed, {} failed.",
        report.total, report.failed
    );
    let mut buffers = PolygonLayer::new(format!("{}_buffer{}", layer.name, side.label()), features);
    buffers.epsg = layer.epsg;
    Ok((buffers, report))
}
