use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::classify::forest::ForestParams;
use crate::error::{BoundaryError, Result};
use crate::geometric::zonal::StatsMeasure;

pub const DEFAULT_INPUT_PATH: &str = "./input";
pub const DEFAULT_TEMP_PATH: &str = "./temp";
pub const DEFAULT_OUTPUT_PATH: &str = "./output";

/// Colour tolerances used to decide whether two neighbouring segments are
/// different enough for their shared edge to be a boundary candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerances {
    /// Per band (R, G, B) tolerance on the segment mean values
    pub average: [f64; 3],
    /// Per band (R, G, B) tolerance on the segment standard deviations
    pub std_dev: [f64; 3],
}

/// Run configuration, read once and handed to every stage by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub input_data_path: PathBuf,
    pub temp_data_path: PathBuf,
    pub output_data_path: PathBuf,
    /// Log file created inside the temp directory
    pub log_file_name: Option<String>,
    pub show_console_logging: bool,
    /// EPSG code written into GeoJSON outputs
    pub epsg: Option<i32>,

    /// Single-sided buffer distance in map units
    pub buffer_distance: f64,
    pub stats_measure: StatsMeasure,
    /// Pixel value treated as missing in addition to the raster's own nodata
    pub nodata: f64,
    pub rgb_raster_file: Option<String>,
    pub dsm_raster_file: Option<String>,
    /// Line layer whose attributes are calculated
    pub segment_file: Option<String>,

    pub raw_segments_file: Option<String>,
    pub raw_segments_id_field: String,
    pub tolerances: Option<Tolerances>,
    /// Simplification tolerance applied to extracted boundary lines
    pub raw_segments_resolution: f64,
    /// Command template with `{input}` and `{output}` placeholders
    pub segmentation_command: Option<String>,

    pub training_layer: Option<String>,
    pub validation_layer: Option<String>,
    pub classifier_file_name: String,
    pub classifier_server_url: Option<String>,
    pub forest: ForestParams,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            input_data_path: PathBuf::from(DEFAULT_INPUT_PATH),
            temp_data_path: PathBuf::from(DEFAULT_TEMP_PATH),
            output_data_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            log_file_name: Some("bdelin.log".to_string()),
            show_console_logging: true,
            epsg: None,
            buffer_distance: 0.4,
            stats_measure: StatsMeasure::Median,
            nodata: -999.0,
            rgb_raster_file: None,
            dsm_raster_file: None,
            segment_file: None,
            raw_segments_file: None,
            raw_segments_id_field: "ID".to_string(),
            tolerances: None,
            raw_segments_resolution: 0.05,
            segmentation_command: None,
            training_layer: None,
            validation_layer: None,
            classifier_file_name: "classifier.json".to_string(),
            classifier_server_url: None,
            forest: ForestParams::default(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file and validate them.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(BoundaryError::InputNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)
            .map_err(|e| BoundaryError::invalid_input(path, e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.buffer_distance.is_finite() && self.buffer_distance > 0.0) {
            return Err(BoundaryError::Config(format!(
                "buffer_distance must be > 0, got {}",
                self.buffer_distance
            )));
        }
        if !(self.raw_segments_resolution >= 0.0) {
            return Err(BoundaryError::Config(format!(
                "raw_segments_resolution must be >= 0, got {}",
                self.raw_segments_resolution
            )));
        }
        if self.classifier_file_name.trim().is_empty() {
            return Err(BoundaryError::Config(
                "classifier_file_name must not be empty".to_string(),
            ));
        }
        self.forest.validate()
    }
}
