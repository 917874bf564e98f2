//! In-memory vector layers and their file-backed store.
//!
//! Line layers carry the typed attribute record every stage reads and
//! writes; polygon layers carry buffers and raw segmentation polygons.
//! Layers are read completely, mutated in memory and written back in one
//! step, so a failing stage never leaves a half-updated file behind.

pub mod geojson_io;

#[cfg(feature = "gdal")]
pub mod gdal_io;

use geo::{Geometry as GeoGeometry, LineString, Polygon};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::error::{BoundaryError, Result};

/// Unique, stable feature identifier field. Every join keys on it.
pub const ID_FIELD: &str = "ID";

/// Numeric attributes of a line segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Attribute {
    Boundary,
    Vertices,
    Length,
    Azimuth,
    Sinuosity,
    RedGrad,
    GreenGrad,
    BlueGrad,
    DsmGrad,
}

impl Attribute {
    pub const ALL: [Attribute; 9] = [
        Attribute::Boundary,
        Attribute::Vertices,
        Attribute::Length,
        Attribute::Azimuth,
        Attribute::Sinuosity,
        Attribute::RedGrad,
        Attribute::GreenGrad,
        Attribute::BlueGrad,
        Attribute::DsmGrad,
    ];

    /// Field name in the attribute table
    pub fn name(self) -> &'static str {
        match self {
            Attribute::Boundary => "boundary",
            Attribute::Vertices => "vertices",
            Attribute::Length => "length",
            Attribute::Azimuth => "azimuth",
            Attribute::Sinuosity => "sinuosity",
            Attribute::RedGrad => "red_grad",
            Attribute::GreenGrad => "green_grad",
            Attribute::BlueGrad => "blue_grad",
            Attribute::DsmGrad => "dsm_grad",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Attribute::ALL.into_iter().find(|a| a.name() == name)
    }
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed attribute record of a line feature. `None` means unset, which is
/// never the same as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineAttributes {
    pub id: Option<i64>,
    pub boundary: Option<f64>,
    pub vertices: Option<i64>,
    pub length: Option<f64>,
    pub azimuth: Option<f64>,
    pub sinuosity: Option<f64>,
    pub red_grad: Option<f64>,
    pub green_grad: Option<f64>,
    pub blue_grad: Option<f64>,
    pub dsm_grad: Option<f64>,
}

impl LineAttributes {
    pub fn get(&self, attribute: Attribute) -> Option<f64> {
        match attribute {
            Attribute::Boundary => self.boundary,
            Attribute::Vertices => self.vertices.map(|v| v as f64),
            Attribute::Length => self.length,
            Attribute::Azimuth => self.azimuth,
            Attribute::Sinuosity => self.sinuosity,
            Attribute::RedGrad => self.red_grad,
            Attribute::GreenGrad => self.green_grad,
            Attribute::BlueGrad => self.blue_grad,
            Attribute::DsmGrad => self.dsm_grad,
        }
    }

    pub fn set(&mut self, attribute: Attribute, value: Option<f64>) {
        match attribute {
            Attribute::Boundary => self.boundary = value,
            // A count; NaN or infinity is no count at all
            Attribute::Vertices => {
                self.vertices = value.filter(|v| v.is_finite()).map(|v| v.round() as i64)
            }
            Attribute::Length => self.length = value,
            Attribute::Azimuth => self.azimuth = value,
            Attribute::Sinuosity => self.sinuosity = value,
            Attribute::RedGrad => self.red_grad = value,
            Attribute::GreenGrad => self.green_grad = value,
            Attribute::BlueGrad => self.blue_grad = value,
            Attribute::DsmGrad => self.dsm_grad = value,
        }
    }
}

/// A line segment with its typed attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct LineFeature {
    pub geometry: LineString<f64>,
    pub attributes: LineAttributes,
    /// Properties that are not part of the typed record, kept verbatim
    pub extra: Map<String, Value>,
    /// Attributes whose stored value could not be read as a number
    pub unparsed: Vec<Attribute>,
}

impl LineFeature {
    pub fn new(geometry: LineString<f64>) -> Self {
        LineFeature {
            geometry,
            attributes: LineAttributes::default(),
            extra: Map::new(),
            unparsed: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.attributes.id = Some(id);
        self
    }

    pub fn with_attribute(mut self, attribute: Attribute, value: f64) -> Self {
        self.set_attribute(attribute, Some(value));
        self
    }

    pub fn id(&self) -> Option<i64> {
        self.attributes.id
    }

    pub fn attribute(&self, attribute: Attribute) -> Option<f64> {
        self.attributes.get(attribute)
    }

    /// Write an attribute. A written value replaces any unreadable one.
    pub fn set_attribute(&mut self, attribute: Attribute, value: Option<f64>) {
        self.attributes.set(attribute, value);
        if let Some(pos) = self.unparsed.iter().position(|a| *a == attribute) {
            self.unparsed.remove(pos);
            self.extra.remove(attribute.name());
        }
    }

    pub fn is_unparsed(&self, attribute: Attribute) -> bool {
        self.unparsed.contains(&attribute)
    }

    /// Build a feature from a property map, splitting typed attributes from
    /// the rest.
    pub fn from_properties(geometry: LineString<f64>, properties: Map<String, Value>) -> Self {
        let mut feature = LineFeature::new(geometry);
        for (key, value) in properties {
            if key == ID_FIELD {
                match parse_id(&value) {
                    Some(id) => feature.attributes.id = Some(id),
                    None if value.is_null() => {}
                    None => {
                        feature.extra.insert(key, value);
                    }
                }
                continue;
            }
            match Attribute::from_name(&key) {
                Some(attribute) => match parse_number(&value) {
                    Ok(number) => feature.attributes.set(attribute, number),
                    Err(()) => {
                        feature.unparsed.push(attribute);
                        feature.extra.insert(key, value);
                    }
                },
                None => {
                    feature.extra.insert(key, value);
                }
            }
        }
        feature
    }

    /// Full property map: extra fields, `ID` and every typed attribute
    /// (unset attributes are written as null).
    pub fn to_properties(&self) -> Map<String, Value> {
        let mut properties = self.extra.clone();
        properties.insert(
            ID_FIELD.to_string(),
            self.attributes.id.map(Value::from).unwrap_or(Value::Null),
        );
        for attribute in Attribute::ALL {
            if self.is_unparsed(attribute) {
                continue;
            }
            let value = match attribute {
                Attribute::Vertices => self.attributes.vertices.map(Value::from),
                _ => self.attributes.get(attribute).and_then(number_value),
            };
            properties.insert(attribute.name().to_string(), value.unwrap_or(Value::Null));
        }
        properties
    }
}

/// A named collection of line features.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LineLayer {
    pub name: String,
    pub epsg: Option<i32>,
    pub features: Vec<LineFeature>,
}

impl LineLayer {
    pub fn new(name: impl Into<String>, features: Vec<LineFeature>) -> Self {
        LineLayer {
            name: name.into(),
            epsg: None,
            features,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// A polygon with the `ID` of the feature it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonFeature {
    pub id: Option<i64>,
    pub geometry: Polygon<f64>,
    pub properties: Map<String, Value>,
}

impl PolygonFeature {
    pub fn new(id: Option<i64>, geometry: Polygon<f64>) -> Self {
        PolygonFeature {
            id,
            geometry,
            properties: Map::new(),
        }
    }

    /// Numeric property, `None` when missing or not a number
    pub fn number(&self, key: &str) -> Option<f64> {
        self.properties
            .get(key)
            .and_then(|v| parse_number(v).ok().flatten())
    }

    pub fn from_properties(
        geometry: Polygon<f64>,
        mut properties: Map<String, Value>,
        id_field: &str,
    ) -> Self {
        let id = properties.get(id_field).and_then(parse_id);
        if id_field == ID_FIELD {
            properties.remove(ID_FIELD);
        }
        PolygonFeature {
            id,
            geometry,
            properties,
        }
    }

    pub fn to_properties(&self) -> Map<String, Value> {
        let mut properties = self.properties.clone();
        properties.insert(
            ID_FIELD.to_string(),
            self.id.map(Value::from).unwrap_or(Value::Null),
        );
        properties
    }
}

/// A named collection of polygon features.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolygonLayer {
    pub name: String,
    pub epsg: Option<i32>,
    pub features: Vec<PolygonFeature>,
}

impl PolygonLayer {
    pub fn new(name: impl Into<String>, features: Vec<PolygonFeature>) -> Self {
        PolygonLayer {
            name: name.into(),
            epsg: None,
            features,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Read a numeric property. Null and empty strings are unset; anything that
/// is present but not a number is an error.
pub fn parse_number(value: &Value) -> std::result::Result<Option<f64>, ()> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s.trim().parse::<f64>().map(Some).map_err(|_| ()),
        _ => Err(()),
    }
}

fn parse_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn number_value(value: f64) -> Option<Value> {
    serde_json::Number::from_f64(value).map(Value::Number)
}

/// Extract a single line string from a geometry.
pub(crate) fn as_line_string(geometry: GeoGeometry<f64>) -> Option<LineString<f64>> {
    match geometry {
        GeoGeometry::LineString(line) => Some(line),
        GeoGeometry::MultiLineString(multi) if multi.0.len() == 1 => multi.0.into_iter().next(),
        _ => None,
    }
}

/// Extract a single polygon from a geometry.
pub(crate) fn as_polygon(geometry: GeoGeometry<f64>) -> Option<Polygon<f64>> {
    match geometry {
        GeoGeometry::Polygon(polygon) => Some(polygon),
        GeoGeometry::MultiPolygon(multi) if multi.0.len() == 1 => multi.0.into_iter().next(),
        _ => None,
    }
}

fn is_geojson(path: &Path) -> bool {
    path.extension()
        .map(|e| {
            let e = e.to_string_lossy().to_lowercase();
            e == "geojson" || e == "json"
        })
        .unwrap_or(false)
}

fn check_exists(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(BoundaryError::InputNotFound(path.to_path_buf()))
    }
}

/// Read a line layer, choosing the reader from the file extension.
pub fn read_line_layer(path: &Path) -> Result<LineLayer> {
    check_exists(path)?;
    if is_geojson(path) {
        return geojson_io::read_line_layer(path);
    }
    #[cfg(feature = "gdal")]
    {
        gdal_io::read_line_layer(path)
    }
    #[cfg(not(feature = "gdal"))]
    {
        Err(BoundaryError::invalid_input(
            path,
            "unsupported vector format (enable the `gdal` feature for OGR formats)",
        ))
    }
}

/// Read a polygon layer whose identifier is stored in `id_field`.
pub fn read_polygon_layer(path: &Path, id_field: &str) -> Result<PolygonLayer> {
    check_exists(path)?;
    if is_geojson(path) {
        return geojson_io::read_polygon_layer(path, id_field);
    }
    #[cfg(feature = "gdal")]
    {
        gdal_io::read_polygon_layer(path, id_field)
    }
    #[cfg(not(feature = "gdal"))]
    {
        Err(BoundaryError::invalid_input(
            path,
            "unsupported vector format (enable the `gdal` feature for OGR formats)",
        ))
    }
}

/// Outputs are always GeoJSON.
pub fn write_line_layer(layer: &LineLayer, path: &Path) -> Result<()> {
    geojson_io::write_line_layer(layer, path)
}

pub fn write_polygon_layer(layer: &PolygonLayer, path: &Path) -> Result<()> {
    geojson_io::write_polygon_layer(layer, path)
}
