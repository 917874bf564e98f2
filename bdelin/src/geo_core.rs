use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::settings::Settings;

/// Base struct for file handling shared by all processing stages.
/// Handles the CRS tag and the input/temp/output directories.
#[derive(Debug, Clone)]
pub struct GeoCore {
    /// EPSG code written into vector outputs
    pub epsg: Option<i32>,
    /// Directory relative input names are resolved against
    pub input_path: PathBuf,
    /// Directory for intermediate artifacts (buffers, log file)
    pub temp_path: PathBuf,
    /// Directory for stage outputs
    pub output_path: PathBuf,
}

impl GeoCore {
    pub fn new(input_path: PathBuf, temp_path: PathBuf, output_path: PathBuf) -> Self {
        GeoCore {
            epsg: None,
            input_path,
            temp_path,
            output_path,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        GeoCore {
            epsg: settings.epsg,
            input_path: settings.input_data_path.clone(),
            temp_path: settings.temp_data_path.clone(),
            output_path: settings.output_data_path.clone(),
        }
    }

    pub fn get_epsg(&self) -> Option<i32> {
        self.epsg
    }

    /// Resolve an input file name. Absolute paths are returned unchanged.
    pub fn input_file_path(&self, file_name: impl AsRef<Path>) -> PathBuf {
        resolve(&self.input_path, file_name.as_ref())
    }

    /// Resolve a temp file name, creating the temp directory if needed.
    pub fn temp_file_path(&self, file_name: impl AsRef<Path>) -> Result<PathBuf> {
        ensure_dir(&self.temp_path)?;
        Ok(resolve(&self.temp_path, file_name.as_ref()))
    }

    /// Resolve an output file name, creating the output directory if needed.
    pub fn output_file_path(&self, file_name: impl AsRef<Path>) -> Result<PathBuf> {
        ensure_dir(&self.output_path)?;
        Ok(resolve(&self.output_path, file_name.as_ref()))
    }

    /// Output artifact named after an input file: `<output>/<stem><suffix>`.
    pub fn derived_output_path(&self, source: &Path, suffix: &str) -> Result<PathBuf> {
        self.output_file_path(format!("{}{}", file_stem(source), suffix))
    }
}

impl Default for GeoCore {
    fn default() -> Self {
        GeoCore::from_settings(&Settings::default())
    }
}

/// File stem as an owned string, `"layer"` when the path has none.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "layer".to_string())
}

fn resolve(base: &Path, file_name: &Path) -> PathBuf {
    if file_name.is_absolute() {
        file_name.to_path_buf()
    } else {
        base.join(file_name)
    }
}

fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
