//! Read-only raster grids with an affine georeferencing transform.

pub mod tiff_io;

#[cfg(feature = "gdal")]
pub mod gdal_io;

use geo::Rect;
use std::path::Path;

use crate::error::{BoundaryError, Result};

/// A multi-band raster held in memory, bands stored one after another.
///
/// `geo_transform` follows the GDAL convention:
/// `[origin_x, pixel_width, 0, origin_y, 0, pixel_height]` with a negative
/// pixel height for north-up images. Rotated grids are not supported.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub width: usize,
    pub height: usize,
    pub geo_transform: [f64; 6],
    pub nodata: Option<f64>,
    band_count: usize,
    data: Vec<f64>,
}

impl Raster {
    /// Build a raster from band-sequential data (`band_count * width * height` values).
    pub fn new(
        width: usize,
        height: usize,
        geo_transform: [f64; 6],
        band_count: usize,
        data: Vec<f64>,
    ) -> Result<Self> {
        if width == 0 || height == 0 || band_count == 0 {
            return Err(BoundaryError::Data("raster has no pixels".to_string()));
        }
        if data.len() != width * height * band_count {
            return Err(BoundaryError::Data(format!(
                "raster data length {} does not match {}x{}x{}",
                data.len(),
                width,
                height,
                band_count
            )));
        }
        if geo_transform[2] != 0.0 || geo_transform[4] != 0.0 {
            return Err(BoundaryError::Data(
                "rotated geotransforms are not supported".to_string(),
            ));
        }
        if geo_transform[1] == 0.0 || geo_transform[5] == 0.0 {
            return Err(BoundaryError::Data("pixel size must not be zero".to_string()));
        }
        Ok(Raster {
            width,
            height,
            geo_transform,
            nodata: None,
            band_count,
            data,
        })
    }

    /// Build a raster from pixel-interleaved samples (as decoded from chunky TIFFs).
    pub fn from_interleaved(
        width: usize,
        height: usize,
        geo_transform: [f64; 6],
        samples: Vec<f64>,
    ) -> Result<Self> {
        let pixels = width * height;
        if pixels == 0 || samples.len() % pixels != 0 {
            return Err(BoundaryError::Data(format!(
                "{} samples cannot be split into {}x{} pixels",
                samples.len(),
                width,
                height
            )));
        }
        let band_count = samples.len() / pixels;
        let mut data = vec![0.0; samples.len()];
        for (i, value) in samples.into_iter().enumerate() {
            let pixel = i / band_count;
            let band = i % band_count;
            data[band * pixels + pixel] = value;
        }
        Raster::new(width, height, geo_transform, band_count, data)
    }

    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    pub fn band_count(&self) -> usize {
        self.band_count
    }

    /// Pixel values of a band, 1-based like GDAL.
    pub fn band(&self, index: usize) -> Result<&[f64]> {
        if index == 0 || index > self.band_count {
            return Err(BoundaryError::Data(format!(
                "band {} out of range (raster has {} bands)",
                index, self.band_count
            )));
        }
        let pixels = self.width * self.height;
        let start = (index - 1) * pixels;
        Ok(&self.data[start..start + pixels])
    }

    /// Map coordinates of the centre of pixel (col, row).
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        let gt = &self.geo_transform;
        (
            gt[0] + (col as f64 + 0.5) * gt[1],
            gt[3] + (row as f64 + 0.5) * gt[5],
        )
    }

    /// Column/row ranges of the pixels whose centres may fall inside `rect`,
    /// clipped to the grid. `None` when the rectangle misses the raster.
    pub fn pixel_window(&self, rect: &Rect<f64>) -> Option<(std::ops::Range<usize>, std::ops::Range<usize>)> {
        let gt = &self.geo_transform;
        let to_col = |x: f64| (x - gt[0]) / gt[1] - 0.5;
        let to_row = |y: f64| (y - gt[3]) / gt[5] - 0.5;

        let (c0, c1) = order(to_col(rect.min().x), to_col(rect.max().x));
        let (r0, r1) = order(to_row(rect.min().y), to_row(rect.max().y));

        let col_start = c0.ceil().max(0.0);
        let col_end = (c1.floor() + 1.0).min(self.width as f64);
        let row_start = r0.ceil().max(0.0);
        let row_end = (r1.floor() + 1.0).min(self.height as f64);
        if col_start >= col_end || row_start >= row_end {
            return None;
        }
        Some((
            col_start as usize..col_end as usize,
            row_start as usize..row_end as usize,
        ))
    }

    /// Whether `value` should be ignored: NaN, the raster nodata or `extra_nodata`.
    pub fn is_nodata(&self, value: f64, extra_nodata: Option<f64>) -> bool {
        value.is_nan() || Some(value) == self.nodata || Some(value) == extra_nodata
    }
}

fn order(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Read a raster, choosing the reader from the file extension.
pub fn read_raster(path: &Path) -> Result<Raster> {
    if !path.is_file() {
        return Err(BoundaryError::InputNotFound(path.to_path_buf()));
    }
    let is_tiff = path
        .extension()
        .map(|e| {
            let e = e.to_string_lossy().to_lowercase();
            e == "tif" || e == "tiff"
        })
        .unwrap_or(false);
    if is_tiff {
        return tiff_io::read_geotiff(path);
    }
    #[cfg(feature = "gdal")]
    {
        gdal_io::read_raster(path)
    }
    #[cfg(not(feature = "gdal"))]
    {
        Err(BoundaryError::invalid_input(
            path,
            "unsupported raster format (enable the `gdal` feature)",
        ))
    }
}
