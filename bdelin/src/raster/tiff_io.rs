use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tracing::{debug, warn};

use super::Raster;
use crate::error::{BoundaryError, Result};

const GDAL_NODATA_TAG: u16 = 42113;

/// Read the georeferencing of an open GeoTIFF as a GDAL-style transform.
///
/// ModelTransformation wins over ModelPixelScale + ModelTiepoint. Missing
/// tags fall back to a 1m grid anchored at (0, 0).
fn geo_transform_from_decoder<R: Read + Seek>(decoder: &mut Decoder<R>) -> [f64; 6] {
    if let Ok(Some(value)) = decoder.find_tag(Tag::ModelTransformationTag) {
        if let Ok(m) = value.into_f64_vec() {
            if m.len() >= 8 {
                return [m[3], m[0], m[1], m[7], m[4], m[5]];
            }
        }
    }

    let mut res = (1.0_f64, 1.0_f64);
    let mut origin = (0.0_f64, 0.0_f64);
    let mut found_scale = false;
    let mut found_tiepoint = false;

    if let Ok(Some(value)) = decoder.find_tag(Tag::ModelPixelScaleTag) {
        if let Ok(scale) = value.into_f64_vec() {
            if scale.len() >= 2 {
                res = (scale[0], scale[1]);
                found_scale = true;
            }
        }
    }
    if let Ok(Some(value)) = decoder.find_tag(Tag::ModelTiepointTag) {
        if let Ok(tie) = value.into_f64_vec() {
            if tie.len() >= 6 {
                // Tie point (i, j, k) -> (x, y, z); shift to the raster corner
                origin = (tie[3] - tie[0] * res.0, tie[4] + tie[1] * res.1);
                found_tiepoint = true;
            }
        }
    }

    if !found_scale {
        warn!("GeoTIFF has no ModelPixelScale tag, assuming 1.0 pixel size");
    }
    if !found_tiepoint {
        warn!("GeoTIFF has no ModelTiepoint tag, assuming origin (0, 0)");
    }
    [origin.0, res.0, 0.0, origin.1, 0.0, -res.1]
}

fn nodata_from_decoder<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    let value = decoder
        .find_tag(Tag::from_u16_exhaustive(GDAL_NODATA_TAG))
        .ok()??;
    let text = value.into_string().ok()?;
    text.trim_matches(char::from(0)).trim().parse().ok()
}

fn samples_as_f64(result: DecodingResult) -> Result<Vec<f64>> {
    let samples = match result {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
        #[allow(unreachable_patterns)]
        _ => {
            return Err(BoundaryError::Data(
                "unsupported TIFF sample format".to_string(),
            ))
        }
    };
    Ok(samples)
}

/// Read a (Geo)TIFF with chunky (pixel-interleaved) samples.
pub fn read_geotiff(path: &Path) -> Result<Raster> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))?;

    let (width, height) = decoder.dimensions()?;
    let geo_transform = geo_transform_from_decoder(&mut decoder);
    let nodata = nodata_from_decoder(&mut decoder);

    let samples = samples_as_f64(decoder.read_image()?)?;
    let raster = Raster::from_interleaved(width as usize, height as usize, geo_transform, samples)
        .map_err(|e| BoundaryError::invalid_input(path, e.to_string()))?
        .with_nodata(nodata);

    debug!(
        "Raster {:?}: {}x{} pixels, {} band(s), transform {:?}",
        path,
        raster.width,
        raster.height,
        raster.band_count(),
        raster.geo_transform
    );
    Ok(raster)
}
