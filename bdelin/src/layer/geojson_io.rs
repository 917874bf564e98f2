use geo::Geometry as GeoGeometry;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject};
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, warn};

use super::{as_line_string, as_polygon, LineFeature, LineLayer, PolygonFeature, PolygonLayer};
use crate::error::{BoundaryError, Result};
use crate::geo_core::file_stem;

/// Read all features of a GeoJSON file as (geometry, properties) pairs.
fn read_features(path: &Path) -> Result<(Vec<(Option<GeoGeometry<f64>>, JsonObject)>, Option<i32>)> {
    let content = std::fs::read_to_string(path)?;
    let geojson: GeoJson = content
        .parse()
        .map_err(|e: geojson::Error| BoundaryError::invalid_input(path, e.to_string()))?;

    let (features, foreign_members) = match geojson {
        GeoJson::FeatureCollection(fc) => (fc.features, fc.foreign_members),
        GeoJson::Feature(f) => (vec![f], None),
        GeoJson::Geometry(g) => (vec![Feature::from(g)], None),
    };
    let epsg = foreign_members.as_ref().and_then(epsg_from_crs);

    let mut records = Vec::with_capacity(features.len());
    for feature in features {
        let properties = feature.properties.unwrap_or_default();
        let geometry = match feature.geometry {
            Some(g) => GeoGeometry::<f64>::try_from(g).ok(),
            None => None,
        };
        records.push((geometry, properties));
    }
    Ok((records, epsg))
}

pub fn read_line_layer(path: &Path) -> Result<LineLayer> {
    let (records, epsg) = read_features(path)?;
    let total = records.len();
    let mut features = Vec::with_capacity(total);
    for (geometry, properties) in records {
        match geometry.and_then(as_line_string) {
            Some(line) => features.push(LineFeature::from_properties(line, properties)),
            None => debug!("Skipping feature without a single line geometry"),
        }
    }
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
    let mut features = Vec::with_capacity(total);
    for (geometry, properties) in records {
        if let Some(polygon) = geometry.and_then(as_polygon) {
            features.push(PolygonFeature::from_properties(polygon, properties, id_field));
        }
    }
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

pub fn write_line_layer(layer: &LineLayer, path: &Path) -> Result<()> {
    let features = layer
        .features
        .iter()
        .map(|f| Feature {
            bbox: None,
            geometry: Some(Geometry::new(geojson::Value::from(&f.geometry))),
            id: None,
            properties: Some(f.to_properties()),
            foreign_members: None,
        })
        .collect();
    write_collection(features, layer.epsg, path)
}

pub fn write_polygon_layer(layer: &PolygonLayer, path: &Path) -> Result<()> {
    let features = layer
        .features
        .iter()
        .map(|f| Feature {
            bbox: None,
            geometry: Some(Geometry::new(geojson::Value::from(&f.geometry))),
            id: None,
            properties: Some(f.to_properties()),
            foreign_members: None,
        })
        .collect();
    write_collection(features, layer.epsg, path)
}

/// Write to a sibling temp file first, then move it over the target.
fn write_collection(features: Vec<Feature>, epsg: Option<i32>, path: &Path) -> Result<()> {
    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: epsg.map(crs_member),
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("geojson.part");
    std::fs::write(&tmp, GeoJson::from(collection).to_string())?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn crs_member(epsg: i32) -> JsonObject {
    let mut members = JsonObject::new();
    members.insert(
        "crs".to_string(),
        json!({"type": "name", "properties": {"name": format!("urn:ogc:def:crs:EPSG::{}", epsg)}}),
    );
    members
}

fn epsg_from_crs(members: &JsonObject) -> Option<i32> {
    let name = members
        .get("crs")?
        .get("properties")?
        .get("name")
        .and_then(Value::as_str)?;
    name.rsplit(':').next()?.parse().ok()
}
