//! Segmentation of the orthomosaic by an external tool, and extraction of
//! candidate boundary lines from the resulting polygons.

pub mod boundaries;

use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

use crate::error::{BoundaryError, Result};
use crate::geo_core::{file_stem, GeoCore};
use crate::layer;
use crate::settings::Settings;
use boundaries::{extract_boundaries, BoundaryReport};

pub struct Segmentation<'a> {
    settings: &'a Settings,
    geo_core: GeoCore,
}

impl<'a> Segmentation<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Segmentation {
            settings,
            geo_core: GeoCore::from_settings(settings),
        }
    }

    /// `<output>/<raster stem>_segments.geojson`
    pub fn segmentation_output_path(&self, raster: &Path) -> Result<PathBuf> {
        self.geo_core.derived_output_path(raster, "_segments.geojson")
    }

    /// `<output>/<segments stem>_boundaries.geojson`
    pub fn boundaries_output_path(&self, segments: &Path) -> Result<PathBuf> {
        self.geo_core.derived_output_path(segments, "_boundaries.geojson")
    }

    /// Run the configured segmentation command on `raster`, writing polygons
    /// to `output`.
    pub fn create_segmentation(&self, raster: &Path, output: &Path) -> Result<()> {
        let template = self
            .settings
            .segmentation_command
            .as_deref()
            .ok_or_else(|| BoundaryError::Config("no segmentation_command configured".to_string()))?;
        if !raster.is_file() {
            return Err(BoundaryError::InputNotFound(raster.to_path_buf()));
        }
        info!("Starting segmentation for raster {:?}...", raster);

        let args = command_args(template, raster, output);
        let Some((program, rest)) = args.split_first() else {
            return Err(BoundaryError::Config("segmentation_command is empty".to_string()));
        };
        info!("- command: {}", args.join(" "));
        let status = Command::new(program)
            .args(rest)
            .status()
            .map_err(|e| BoundaryError::Command(format!("unable to start {}: {}", program, e)))?;
        if !status.success() {
            return Err(BoundaryError::Command(format!("{} exited with {}", program, status)));
        }
        if !output.is_file() {
            return Err(BoundaryError::Command(format!(
                "{} did not write {:?}",
                program, output
            )));
        }
        info!("Segmentation finished.");
        Ok(())
    }

    /// Extract boundary lines from the polygons at `segments` into `output`.
    pub fn create_boundaries(&self, segments: &Path, output: &Path) -> Result<BoundaryReport> {
        let mut polygons = layer::read_polygon_layer(segments, &self.settings.raw_segments_id_field)?;
        polygons.name = file_stem(segments);
        if polygons.epsg.is_none() {
            polygons.epsg = self.geo_core.get_epsg();
        }
        let (lines, report) = extract_boundaries(
            &polygons,
            self.settings.tolerances.as_ref(),
            self.settings.raw_segments_resolution,
        );
        layer::write_line_layer(&lines, output)?;
        info!("Edges layer file {:?} created.", output);
        Ok(report)
    }
}

/// Split a command template into arguments (double quotes group words) and
/// fill in the `{input}`/`{0}` and `{output}`/`{1}` placeholders.
pub fn command_args(template: &str, input: &Path, output: &Path) -> Vec<String> {
    let input = input.to_string_lossy();
    let output = output.to_string_lossy();
    split_words(template)
        .into_iter()
        .map(|word| {
            word.replace("{input}", &input)
                .replace("{0}", &input)
                .replace("{output}", &output)
                .replace("{1}", &output)
        })
        .collect()
}

fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut in_word = false;
    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}
