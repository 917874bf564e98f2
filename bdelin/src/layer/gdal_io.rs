use gdal::vector::{FieldValue, LayerAccess};
use gdal::Dataset;
use geo::Geometry as GeoGeometry;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::warn;

use super::{as_line_string, as_polygon, LineFeature, LineLayer, PolygonFeature, PolygonLayer};
use crate::error::{BoundaryError, Result};
use crate::geo_core::file_stem;

/// Read the first layer of an OGR data source as (geometry, properties) pairs.
fn read_features(path: &Path) -> Result<(Vec<(Option<GeoGeometry<f64>>, Map<String, Value>)>, Option<i32>)> {
    let dataset = Dataset::open(path)?;
    let mut layer = dataset
        .layer(0)
        .map_err(|e| BoundaryError::invalid_input(path, format!("no layer: {}", e)))?;

    let epsg = layer
        .spatial_ref()
        .and_then(|srs| srs.auth_code().ok())
        .map(|code| code as i32);

    let mut records = Vec::new();
    for feature in layer.features() {
        let geometry = feature.geometry().and_then(|g| g.to_geo().ok());
        let mut properties = Map::new();
        for (name, value) in feature.fields() {
            properties.insert(name, field_to_json(value));
        }
        records.push((geometry, properties));
    }
    Ok((records, epsg))
}

fn field_to_json(value: Option<FieldValue>) -> Value {
    match value {
        Some(FieldValue::IntegerValue(v)) => Value::from(v),
        Some(FieldValue::Integer64Value(v)) => Value::from(v),
        Some(FieldValue::RealValue(v)) => super::number_value(v).unwrap_or(Value::Null),
        Some(FieldValue::StringValue(v)) => Value::from(v),
        _ => Value::Null,
    }
}

pub fn read_line_layer(path: &Path) -> Result<LineLayer> {
    let (records, epsg) = read_features(path)?;
    let total = records.len();
    let features: Vec<LineFeature> = records
        .into_iter()
        .filter_map(|(geometry, properties)| {
            geometry
                .and_then(as_line_string)
                .map(|line| LineFeature::from_properties(line, properties))
        })
        .collect();
    if features.len() < total {
        warn!(
            "{} of {} features in {:?} are not single line strings and were skipped",
            total - features.len(),
            total,
            path
        );
    }
    Ok(LineLayer {
        name: file_stem(path),
        epsg,
        features,
    })
}

pub fn read_polygon_layer(path: &Path, id_field: &str) -> Result<PolygonLayer> {
    let (records, epsg) = read_features(path)?;
    let total = records.len();
    let features: Vec<PolygonFeature> = records
        .into_iter()
        .filter_map(|(geometry, properties)| {
            geometry
                .and_then(as_polygon)
                .map(|polygon| PolygonFeature::from_properties(polygon, properties, id_field))
        })
        .collect();
    if features.len() < total {
        warn!(
            "{} of {} features in {:?} are not single polygons and were skipped",
            total - features.len(),
            total,
            path
        );
    }
    Ok(PolygonLayer {
        name: file_stem(path),
        epsg,
        features,
    })
}
