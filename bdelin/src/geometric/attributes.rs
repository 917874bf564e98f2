use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::buffer::{build_buffer_layer, BufferBuilder, BufferReport, GeosBufferBuilder, Side};
use super::metrics::LineMetrics;
use super::populate::{populate_field, PopulateReport};
use super::zonal::{gradients, zonal_stats};
use crate::error::Result;
use crate::geo_core::{file_stem, GeoCore};
use crate::layer::{self, Attribute, LineLayer, PolygonLayer};
use crate::raster::{read_raster, Raster};
use crate::settings::Settings;

/// RGB raster bands and the gradient attribute each one fills.
pub const RGB_BANDS: [(usize, Attribute); 3] = [
    (1, Attribute::RedGrad),
    (2, Attribute::GreenGrad),
    (3, Attribute::BlueGrad),
];

pub const DSM_BANDS: [(usize, Attribute); 1] = [(1, Attribute::DsmGrad)];

/// Counts of the geometric attribute pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsReport {
    pub total: usize,
    pub calculated: usize,
    pub failed: usize,
}

/// Left and right single-sided buffers of one line layer.
#[derive(Debug, Clone)]
pub struct BufferPair {
    pub left: PolygonLayer,
    pub right: PolygonLayer,
    pub left_report: BufferReport,
    pub right_report: BufferReport,
}

/// Everything the attribute stage did to a layer.
#[derive(Debug, Clone, Default)]
pub struct AttributeReport {
    pub metrics: MetricsReport,
    pub left_buffers: BufferReport,
    pub right_buffers: BufferReport,
    pub gradients: Vec<PopulateReport>,
}

/// The buffer builder used when no other is requested.
pub fn default_buffer_builder() -> Box<dyn BufferBuilder> {
    Box::new(GeosBufferBuilder::default())
}

/// Geometric and radiometric attributes of line segments.
pub struct AttributeCalculation<'a> {
    settings: &'a Settings,
    geo_core: GeoCore,
    builder: Box<dyn BufferBuilder>,
}

impl<'a> AttributeCalculation<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        AttributeCalculation {
            settings,
            geo_core: GeoCore::from_settings(settings),
            builder: default_buffer_builder(),
        }
    }

    pub fn with_builder(mut self, builder: Box<dyn BufferBuilder>) -> Self {
        self.builder = builder;
        self
    }

    /// Number the features (`ID = index + 1`) and compute vertices, length,
    /// azimuth and sinuosity. Degenerate lines are counted and keep those
    /// attributes unset.
    pub fn calculate_attributes(&self, layer: &mut LineLayer) -> MetricsReport {
        info!("Calculating geometric attributes of {}...", layer.name);
        let mut report = MetricsReport {
            total: layer.len(),
            ..MetricsReport::default()
        };
        for (index, feature) in layer.features.iter_mut().enumerate() {
            feature.attributes.id = Some(index as i64 + 1);
            let metrics = match LineMetrics::from_line(&feature.geometry) {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    warn!("Feature {}: {}", index + 1, e);
                    report.failed += 1;
                    None
                }
            };
            feature.set_attribute(Attribute::Vertices, metrics.map(|m| m.vertices as f64));
            feature.set_attribute(Attribute::Length, metrics.map(|m| m.length));
            feature.set_attribute(Attribute::Azimuth, metrics.map(|m| m.azimuth));
            feature.set_attribute(Attribute::Sinuosity, metrics.map(|m| m.sinuosity));
            if metrics.is_some() {
                report.calculated += 1;
            }
        }
        info!(
            "Geometric attributes calculated for {} of {} features ({} failed).",
            report.calculated, report.total, report.failed
        );
        report
    }

    /// Build both single-sided buffers and keep a copy of each in the temp
    /// directory.
    pub fn create_buffers(&self, layer: &LineLayer) -> Result<BufferPair> {
        let distance = self.settings.buffer_distance;
        let (left, left_report) = build_buffer_layer(layer, self.builder.as_ref(), distance, Side::Left)?;
        let (right, right_report) =
            build_buffer_layer(layer, self.builder.as_ref(), distance, Side::Right)?;

        for buffers in [&left, &right] {
            let path = self
                .geo_core
                .temp_file_path(format!("{}.geojson", buffers.name))?;
            layer::write_polygon_layer(buffers, &path)?;
        }
        Ok(BufferPair {
            left,
            right,
            left_report,
            right_report,
        })
    }

    /// Zonal statistics of each `(band, attribute)` on both buffers, merged
    /// into `layer` as left/right gradients.
    pub fn calculate_zonal_stats(
        &self,
        layer: &mut LineLayer,
        buffers: &BufferPair,
        raster: &Raster,
        bands: &[(usize, Attribute)],
    ) -> Result<Vec<PopulateReport>> {
        let measure = self.settings.stats_measure;
        let nodata = Some(self.settings.nodata);
        let mut reports = Vec::with_capacity(bands.len());
        for &(band, attribute) in bands {
            info!("Calculating {} from band {}...", attribute, band);
            let left = zonal_stats(raster, band, &buffers.left, measure, nodata)?;
            let right = zonal_stats(raster, band, &buffers.right, measure, nodata)?;
            reports.push(populate_field(layer, attribute, gradients(&left, &right)));
        }
        Ok(reports)
    }

    /// Read a configured raster. `Ok(None)` when the raster is not configured.
    fn configured_raster(&self, file: Option<&str>, label: &str) -> Result<Option<Raster>> {
        match file {
            Some(name) => {
                let path = self.geo_core.input_file_path(name);
                info!("Reading {} raster {:?}", label, path);
                Ok(Some(read_raster(&path)?))
            }
            None => {
                warn!("No {} raster configured, skipping its gradients", label);
                Ok(None)
            }
        }
    }

    /// Gradients of every configured raster.
    pub fn calculate_gradients(
        &self,
        layer: &mut LineLayer,
        buffers: &BufferPair,
    ) -> Result<Vec<PopulateReport>> {
        let mut reports = Vec::new();
        if let Some(rgb) = self.configured_raster(self.settings.rgb_raster_file.as_deref(), "RGB")? {
            reports.extend(self.calculate_zonal_stats(layer, buffers, &rgb, &RGB_BANDS)?);
        }
        if let Some(dsm) = self.configured_raster(self.settings.dsm_raster_file.as_deref(), "DSM")? {
            reports.extend(self.calculate_zonal_stats(layer, buffers, &dsm, &DSM_BANDS)?);
        }
        Ok(reports)
    }

    /// Compute all attributes of `layer` in memory.
    pub fn process(&self, layer: &mut LineLayer) -> Result<AttributeReport> {
        let metrics = self.calculate_attributes(layer);
        let buffers = self.create_buffers(layer)?;
        let gradients = self.calculate_gradients(layer, &buffers)?;
        Ok(AttributeReport {
            metrics,
            left_buffers: buffers.left_report,
            right_buffers: buffers.right_report,
            gradients,
        })
    }

    /// Read the line layer at `edges`, compute its attributes and write the
    /// result to `output`.
    pub fn run(&self, edges: &Path, output: &Path) -> Result<AttributeReport> {
        let mut layer = layer::read_line_layer(edges)?;
        layer.name = file_stem(edges);
        if layer.epsg.is_none() {
            layer.epsg = self.geo_core.get_epsg();
        }
        let report = self.process(&mut layer)?;
        layer::write_line_layer(&layer, output)?;
        info!("Attributes written to {:?}", output);
        Ok(report)
    }

    /// Default artifact path: `<output>/<edges stem>_attributes.geojson`.
    pub fn output_path(&self, edges: &Path) -> Result<PathBuf> {
        self.geo_core.derived_output_path(edges, "_attributes.geojson")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LineFeature;
    use crate::raster::tiff_io::tests::write_gray_geotiff;
    use approx::assert_relative_eq;
    use geo::{line_string, LineString, Polygon};

    fn settings(dir: &Path) -> Settings {
        Settings {
            input_data_path: dir.to_path_buf(),
            temp_data_path: dir.join("temp"),
            output_data_path: dir.join("output"),
            buffer_distance: 0.5,
            ..Settings::default()
        }
    }

    fn edges() -> LineLayer {
        LineLayer::new(
            "edges",
            vec![
                LineFeature::new(line_string![(x: 1.0, y: 2.0), (x: 7.0, y: 2.0)]).with_id(40),
                LineFeature::new(line_string![(x: 3.0, y: 3.0), (x: 3.0, y: 3.0)]),
            ],
        )
    }

    #[test]
    fn test_calculate_attributes_assigns_ids() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let calc = AttributeCalculation::new(&settings);
        let mut layer = edges();
        let report = calc.calculate_attributes(&mut layer);

        assert_eq!(report, MetricsReport { total: 2, calculated: 2, failed: 0 });
        assert_eq!(layer.features[0].id(), Some(1));
        assert_eq!(layer.features[1].id(), Some(2));
        assert_eq!(layer.features[0].attribute(Attribute::Length), Some(6.0));
        assert_eq!(layer.features[0].attribute(Attribute::Vertices), Some(2.0));
        assert_eq!(layer.features[1].attribute(Attribute::Sinuosity), Some(0.0));
    }

    #[test]
    fn test_calculate_attributes_counts_degenerate_lines() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let calc = AttributeCalculation::new(&settings);
        let mut layer = LineLayer::new(
            "edges",
            vec![LineFeature::new(geo::LineString::new(vec![geo::coord! { x: 1.0, y: 1.0 }]))],
        );
        let report = calc.calculate_attributes(&mut layer);
        assert_eq!(report.failed, 1);
        assert_eq!(layer.features[0].attribute(Attribute::Length), None);
    }

    #[test]
    fn test_dsm_gradient_across_step() {
        let dir = tempfile::tempdir().unwrap();
        // 8x4 raster, origin (0, 4): rows above y=2 are 5.0, rows below are 2.0
        let mut data = vec![5.0_f32; 16];
        data.extend(vec![2.0_f32; 16]);
        write_gray_geotiff(&dir.path().join("dsm.tif"), 8, 4, (0.0, 4.0), 1.0, &data);

        let settings = Settings {
            dsm_raster_file: Some("dsm.tif".to_string()),
            buffer_distance: 1.0,
            ..settings(dir.path())
        };
        let calc = AttributeCalculation::new(&settings);
        let mut layer = edges();
        let report = calc.process(&mut layer).unwrap();

        assert_eq!(report.left_buffers.failed, 1);
        assert_eq!(report.gradients.len(), 1);
        assert_relative_eq!(layer.features[0].attribute(Attribute::DsmGrad).unwrap(), 3.0);
        // no buffer, no gradient
        assert_eq!(layer.features[1].attribute(Attribute::DsmGrad), None);
        // RGB not configured: left unset
        assert_eq!(layer.features[0].attribute(Attribute::RedGrad), None);
        assert!(dir.path().join("temp").join("edges_bufferLeft.geojson").is_file());
    }

    struct NoBuffers;

    impl BufferBuilder for NoBuffers {
        fn single_sided(&self, _: &LineString<f64>, _: f64, _: Side) -> Result<Polygon<f64>> {
            Err(crate::error::BoundaryError::geometry(None, "no buffers"))
        }
    }

    #[test]
    fn test_failed_buffers_leave_gradients_unset() {
        let dir = tempfile::tempdir().unwrap();
        let data = vec![5.0_f32; 32];
        write_gray_geotiff(&dir.path().join("dsm.tif"), 8, 4, (0.0, 4.0), 1.0, &data);
        let settings = Settings {
            dsm_raster_file: Some("dsm.tif".to_string()),
            ..settings(dir.path())
        };
        let calc = AttributeCalculation::new(&settings).with_builder(Box::new(NoBuffers));
        let mut layer = edges();
        let report = calc.process(&mut layer).unwrap();
        assert_eq!(report.left_buffers.failed, 2);
        assert_eq!(report.right_buffers.created, 0);
        assert!(layer.features.iter().all(|f| f.attribute(Attribute::DsmGrad).is_none()));
    }

    #[test]
    fn test_missing_configured_raster_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            rgb_raster_file: Some("missing.tif".to_string()),
            ..settings(dir.path())
        };
        let calc = AttributeCalculation::new(&settings);
        let mut layer = edges();
        let err = calc.process(&mut layer).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Input);
    }
}
