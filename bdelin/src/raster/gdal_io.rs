use gdal::Dataset;
use std::path::Path;

use super::Raster;
use crate::error::{BoundaryError, Result};

/// Read every band of a GDAL-readable raster into memory.
pub fn read_raster(path: &Path) -> Result<Raster> {
    let dataset = Dataset::open(path)?;
    let (width, height) = dataset.raster_size();
    let band_count = dataset.raster_count() as usize;
    let geo_transform = dataset.geo_transform()?;

    let mut data = Vec::with_capacity(width * height * band_count);
    let mut nodata = None;
    for index in 1..=band_count {
        let band = dataset.rasterband(index)?;
        if nodata.is_none() {
            nodata = band.no_data_value();
        }
        let buffer = band.read_as::<f64>((0, 0), (width, height), (width, height), None)?;
        data.extend_from_slice(buffer.data());
    }

    Raster::new(width, height, geo_transform, band_count, data)
        .map(|r| r.with_nodata(nodata))
        .map_err(|e| BoundaryError::invalid_input(path, e.to_string()))
}
