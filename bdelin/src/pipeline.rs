//! Stage sequencing: segmentation, boundary extraction, attribute
//! calculation and classification. Every stage reuses its output file when
//! it already exists.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

use crate::classify::{Classification, ClassifierStore};
use crate::commons::artifact::{reuse_or_build, Artifact};
use crate::error::BoundaryError;
use crate::geo_core::GeoCore;
use crate::geometric::AttributeCalculation;
use crate::segmentation::Segmentation;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Segmentation,
    Boundaries,
    Attributes,
    Training,
    Classification,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Segmentation => "segmentation",
            Stage::Boundaries => "boundary extraction",
            Stage::Attributes => "attribute calculation",
            Stage::Training => "classifier training",
            Stage::Classification => "classification",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} failed: {source}")]
    StageFailed {
        stage: Stage,
        #[source]
        source: BoundaryError,
    },

    #[error("{stage}: no {what} given or configured")]
    MissingInput { stage: Stage, what: &'static str },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::StageFailed { stage, .. } | PipelineError::MissingInput { stage, .. } => *stage,
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

fn at(stage: Stage) -> impl FnOnce(BoundaryError) -> PipelineError {
    move |source| {
        error!("{} failed: {}", stage, source);
        PipelineError::StageFailed { stage, source }
    }
}

/// Artifacts produced by a full run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub segments: Artifact,
    pub boundaries: Artifact,
    pub attributes: Artifact,
    /// Classified layer, when a classifier was available or trainable
    pub classified: Option<Artifact>,
}

pub struct Pipeline<'a> {
    settings: &'a Settings,
    geo_core: GeoCore,
}

impl<'a> Pipeline<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Pipeline {
            settings,
            geo_core: GeoCore::from_settings(settings),
        }
    }

    /// Explicit path, or the configured file name resolved against the input
    /// directory.
    fn input(&self, given: Option<&Path>, configured: Option<&str>, stage: Stage, what: &'static str) -> PipelineResult<PathBuf> {
        match (given, configured) {
            (Some(path), _) => Ok(path.to_path_buf()),
            (None, Some(name)) => Ok(self.geo_core.input_file_path(name)),
            (None, None) => Err(PipelineError::MissingInput { stage, what }),
        }
    }

    /// Segment the RGB raster into `<raster stem>_segments.geojson`.
    pub fn segment(&self, raster: Option<&Path>) -> PipelineResult<Artifact> {
        let stage = Stage::Segmentation;
        let raster = self.input(raster, self.settings.rgb_raster_file.as_deref(), stage, "raster")?;
        let segmentation = Segmentation::new(self.settings);
        let output = segmentation.segmentation_output_path(&raster).map_err(at(stage))?;
        reuse_or_build(&output, stage.name(), |out| {
            segmentation.create_segmentation(&raster, out)
        })
        .map_err(at(stage))
    }

    /// Extract candidate boundaries into `<segments stem>_boundaries.geojson`.
    pub fn extract_boundaries(&self, segments: Option<&Path>) -> PipelineResult<Artifact> {
        let stage = Stage::Boundaries;
        let segments = self.input(segments, self.settings.raw_segments_file.as_deref(), stage, "segments layer")?;
        let segmentation = Segmentation::new(self.settings);
        let output = segmentation.boundaries_output_path(&segments).map_err(at(stage))?;
        reuse_or_build(&output, stage.name(), |out| {
            segmentation.create_boundaries(&segments, out).map(|_| ())
        })
        .map_err(at(stage))
    }

    /// Compute line attributes into `<edges stem>_attributes.geojson`.
    pub fn calculate_attributes(&self, edges: Option<&Path>) -> PipelineResult<Artifact> {
        let stage = Stage::Attributes;
        let edges = self.input(edges, self.settings.segment_file.as_deref(), stage, "edges layer")?;
        let calculation = AttributeCalculation::new(self.settings);
        let output = calculation.output_path(&edges).map_err(at(stage))?;
        reuse_or_build(&output, stage.name(), |out| {
            calculation.run(&edges, out).map(|_| ())
        })
        .map_err(at(stage))
    }

    /// Train a classifier on the labelled layer and store it under the
    /// configured name, replacing any previous one.
    pub fn train_classifier(&self, training: Option<&Path>) -> PipelineResult<String> {
        let stage = Stage::Training;
        let training = self.input(training, self.settings.training_layer.as_deref(), stage, "training layer")?;
        let classification = Classification::new(self.settings).map_err(at(stage))?;
        let (name, report) = classification.train_classifier(&training).map_err(at(stage))?;
        info!(
            "Classifier '{}' trained on {} of {} features",
            name, report.used, report.total
        );
        Ok(name)
    }

    /// Predict boundaries of a layer into `<layer stem>_classified.geojson`.
    pub fn apply_classifier(&self, layer: Option<&Path>) -> PipelineResult<Artifact> {
        let stage = Stage::Classification;
        let layer = self.input(layer, self.settings.validation_layer.as_deref(), stage, "validation layer")?;
        let classification = Classification::new(self.settings).map_err(at(stage))?;
        let output = self
            .geo_core
            .derived_output_path(&layer, "_classified.geojson")
            .map_err(at(stage))?;
        reuse_or_build(&output, stage.name(), |out| {
            classification.apply_classifier(&layer, out).map(|_| ())
        })
        .map_err(at(stage))
    }

    /// Classify `layer`, training a classifier first when none is stored yet
    /// and a training layer is configured.
    fn classify(&self, layer: &Path) -> PipelineResult<Option<Artifact>> {
        let stage = Stage::Classification;
        let classification = Classification::new(self.settings).map_err(at(stage))?;
        let exists = classification
            .repository()
            .exists(&self.settings.classifier_file_name)
            .map_err(at(stage))?;
        if !exists {
            if self.settings.training_layer.is_none() {
                info!("No classifier and no training layer, skipping classification");
                return Ok(None);
            }
            self.train_classifier(None)?;
        }
        self.apply_classifier(Some(layer)).map(Some)
    }

    /// Run every stage in order, stopping at the first failing one.
    pub fn run(&self) -> PipelineResult<RunSummary> {
        info!("*** Starting boundary delineation...");
        let segments = match self.settings.raw_segments_file.as_deref() {
            Some(name) => Artifact {
                path: self.geo_core.input_file_path(name),
                reused: true,
            },
            None => self.segment(None)?,
        };
        let boundaries = self.extract_boundaries(Some(&segments.path))?;
        let attributes = self.calculate_attributes(Some(&boundaries.path))?;
        let classified = self.classify(&attributes.path)?;
        info!("*** Boundary delineation finished.");
        Ok(RunSummary {
            segments,
            boundaries,
            attributes,
            classified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square(id: i64, x0: f64, average: f64) -> serde_json::Value {
        json!({
            "type": "Feature",
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[x0, 0.0], [x0 + 2.0, 0.0], [x0 + 2.0, 2.0], [x0, 2.0], [x0, 0.0]]]
            },
            "properties": {
                "ID": id,
                "AVERAGE_1": average, "AVERAGE_2": average, "AVERAGE_3": average,
                "STDDEV_1": 1.0, "STDDEV_2": 1.0, "STDDEV_3": 1.0
            }
        })
    }

    fn settings(dir: &Path) -> Settings {
        Settings {
            input_data_path: dir.to_path_buf(),
            temp_data_path: dir.join("temp"),
            output_data_path: dir.join("output"),
            raw_segments_file: Some("segments.geojson".to_string()),
            ..Settings::default()
        }
    }

    fn write_segments(dir: &Path) {
        let collection = json!({
            "type": "FeatureCollection",
            "features": [square(1, 0.0, 10.0), square(2, 2.0, 90.0)]
        });
        std::fs::write(dir.join("segments.geojson"), collection.to_string()).unwrap();
    }

    #[test]
    fn test_boundaries_are_extracted_once() {
        let dir = tempfile::tempdir().unwrap();
        write_segments(dir.path());
        let settings = settings(dir.path());
        let pipeline = Pipeline::new(&settings);

        let first = pipeline.extract_boundaries(None).unwrap();
        assert!(!first.reused);
        assert_eq!(
            first.path,
            dir.path().join("output").join("segments_boundaries.geojson")
        );
        let layer = crate::layer::read_line_layer(&first.path).unwrap();
        assert_eq!(layer.len(), 1);
    }

    #[test]
    fn test_existing_boundaries_file_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        write_segments(dir.path());
        let settings = settings(dir.path());
        let output = dir.path().join("output");
        std::fs::create_dir_all(&output).unwrap();
        let existing = output.join("segments_boundaries.geojson");
        std::fs::write(&existing, r#"{"type":"FeatureCollection","features":[]}"#).unwrap();

        let artifact = Pipeline::new(&settings).extract_boundaries(None).unwrap();
        assert!(artifact.reused);
        assert_eq!(artifact.path, existing);
        assert_eq!(
            std::fs::read_to_string(&existing).unwrap(),
            r#"{"type":"FeatureCollection","features":[]}"#
        );
    }

    #[test]
    fn test_failing_stage_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            raw_segments_file: Some("missing.geojson".to_string()),
            ..settings(dir.path())
        };
        let err = Pipeline::new(&settings).run().unwrap_err();
        assert_eq!(err.stage(), Stage::Boundaries);
        assert!(matches!(
            err,
            PipelineError::StageFailed {
                source: BoundaryError::InputNotFound(_),
                ..
            }
        ));
    }

    #[test]
    fn test_missing_input_names_stage() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            raw_segments_file: None,
            ..settings(dir.path())
        };
        let err = Pipeline::new(&settings).run().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingInput {
                stage: Stage::Segmentation,
                ..
            }
        ));
    }

    #[test]
    fn test_run_without_classifier_skips_classification() {
        let dir = tempfile::tempdir().unwrap();
        write_segments(dir.path());
        let settings = settings(dir.path());
        let summary = Pipeline::new(&settings).run().unwrap();
        assert!(summary.segments.reused);
        assert!(summary.attributes.path.ends_with("segments_boundaries_attributes.geojson"));
        assert!(summary.classified.is_none());
    }
}
