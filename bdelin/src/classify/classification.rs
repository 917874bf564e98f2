use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use super::forest::{ForestParams, ProbabilityModel, RandomForest};
use super::store::{ClassifierRepository, ClassifierStore};
use crate::error::{BoundaryError, Result};
use crate::geo_core::GeoCore;
use crate::geometric::populate::{FeatureValue, FieldPopulator};
use crate::layer::{self, Attribute, LineFeature, LineLayer};
use crate::settings::Settings;

/// Attributes fed to the classifier, in this order.
pub const FEATURE_ATTRIBUTES: [Attribute; 8] = [
    Attribute::Vertices,
    Attribute::Length,
    Attribute::Azimuth,
    Attribute::Sinuosity,
    Attribute::RedGrad,
    Attribute::GreenGrad,
    Attribute::BlueGrad,
    Attribute::DsmGrad,
];

/// Stand-in for missing or NaN attribute values, both when training and
/// when predicting.
pub const NO_DATA_SENTINEL: f64 = -1.0;

/// A fitted model together with the attribute names it was trained on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedClassifier {
    pub features: Vec<String>,
    pub forest: RandomForest,
    pub training_samples: usize,
}

impl TrainedClassifier {
    pub fn new(features: Vec<String>, forest: RandomForest, training_samples: usize) -> Self {
        TrainedClassifier {
            features,
            forest,
            training_samples,
        }
    }

    /// Fail when the model was trained on other attributes than
    /// [`FEATURE_ATTRIBUTES`].
    pub fn check_features(&self) -> Result<()> {
        let expected: Vec<&str> = FEATURE_ATTRIBUTES.iter().map(|a| a.name()).collect();
        if self.features.iter().map(String::as_str).ne(expected.iter().copied()) {
            return Err(BoundaryError::Classifier(format!(
                "classifier expects features {:?}, this build uses {:?}",
                self.features, expected
            )));
        }
        if self.forest.n_features() != self.features.len() {
            return Err(BoundaryError::Classifier(format!(
                "forest reads {} features, classifier lists {}",
                self.forest.n_features(),
                self.features.len()
            )));
        }
        self.forest.validate()
    }
}

impl ProbabilityModel for TrainedClassifier {
    fn n_features(&self) -> usize {
        self.forest.n_features()
    }

    fn predict_proba(&self, features: &[f64]) -> Result<f64> {
        self.forest.predict_proba(features)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrainingReport {
    pub total: usize,
    pub used: usize,
    pub positives: usize,
    /// Features without a usable `boundary` label
    pub unlabelled: usize,
    /// Features whose attributes could not be read as numbers
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PredictionReport {
    pub total: usize,
    pub predicted: usize,
    pub failed: usize,
}

/// Ordered classifier input of a feature. Missing and NaN values become
/// [`NO_DATA_SENTINEL`]; a value that is present but not numeric fails the
/// feature.
pub fn feature_vector(feature: &LineFeature) -> Result<Vec<f64>> {
    FEATURE_ATTRIBUTES
        .iter()
        .map(|&attribute| {
            if feature.is_unparsed(attribute) {
                return Err(BoundaryError::Data(format!(
                    "feature {:?}: {} is not a number",
                    feature.id(),
                    attribute
                )));
            }
            Ok(match feature.attribute(attribute) {
                Some(v) if v.is_finite() => v,
                _ => NO_DATA_SENTINEL,
            })
        })
        .collect()
}

/// Boundary label: positive when > 0, `None` when missing.
fn label(feature: &LineFeature) -> Option<bool> {
    if feature.is_unparsed(Attribute::Boundary) {
        return None;
    }
    feature
        .attribute(Attribute::Boundary)
        .filter(|v| !v.is_nan())
        .map(|v| v > 0.0)
}

/// Fit a classifier on the labelled features of `layer`.
pub fn train(layer: &LineLayer, params: &ForestParams) -> Result<(TrainedClassifier, TrainingReport)> {
    let mut report = TrainingReport {
        total: layer.len(),
        ..TrainingReport::default()
    };
    let mut rows = Vec::with_capacity(layer.len());
    let mut labels = Vec::with_capacity(layer.len());
    for feature in &layer.features {
        let Some(positive) = label(feature) else {
            report.unlabelled += 1;
            continue;
        };
        match feature_vector(feature) {
            Ok(row) => {
                rows.push(row);
                labels.push(positive);
                if positive {
                    report.positives += 1;
                }
            }
            Err(e) => {
                warn!("{}", e);
                report.failed += 1;
            }
        }
    }
    report.used = rows.len();
    if report.unlabelled > 0 {
        warn!("{} features without a boundary label were skipped", report.unlabelled);
    }
    if report.positives == 0 || report.positives == report.used {
        warn!("Training data contains a single class only");
    }

    info!(
        "Training random forest ({} trees) on {} features ({} boundaries)...",
        params.n_trees, report.used, report.positives
    );
    let forest = RandomForest::fit(&rows, &labels, params)?;
    let features = FEATURE_ATTRIBUTES.iter().map(|a| a.name().to_string()).collect();
    Ok((TrainedClassifier::new(features, forest, report.used), report))
}

/// Write `probability * length` into the `boundary` field of every feature.
///
/// Features whose attributes cannot be read, or that have no `ID` or no
/// length, are counted as failed and keep their previous `boundary`.
pub fn predict(model: &dyn ProbabilityModel, layer: &mut LineLayer) -> PredictionReport {
    let mut report = PredictionReport {
        total: layer.len(),
        ..PredictionReport::default()
    };
    let mut probabilities = Vec::with_capacity(layer.len());
    for feature in &layer.features {
        if feature.id().is_none() {
            warn!("Feature without ID cannot be classified");
            report.failed += 1;
            continue;
        }
        match feature_vector(feature).and_then(|row| model.predict_proba(&row)) {
            Ok(probability) => probabilities.push(FeatureValue::new(feature.id(), Some(probability))),
            Err(e) => {
                warn!("Prediction failed: {}", e);
                report.failed += 1;
            }
        }
    }

    let mut missing_length = 0;
    let populated = FieldPopulator::new(probabilities).populate_with(
        layer,
        Attribute::Boundary,
        |probability, feature| match (probability, feature.attribute(Attribute::Length)) {
            (Some(p), Some(length)) if length.is_finite() => Some(p * length),
            _ => {
                missing_length += 1;
                feature.attribute(Attribute::Boundary)
            }
        },
    );
    report.predicted = populated.matched - missing_length;
    report.failed += missing_length;
    if missing_length > 0 {
        warn!("{} features have no length, boundary left unchanged", missing_length);
    }
    info!(
        "Classification done: {} of {} features predicted, {} failed.",
        report.predicted, report.total, report.failed
    );
    report
}

/// Train/apply workflow over files and the classifier repository.
pub struct Classification<'a> {
    settings: &'a Settings,
    geo_core: GeoCore,
    repository: ClassifierRepository,
}

impl<'a> Classification<'a> {
    pub fn new(settings: &'a Settings) -> Result<Self> {
        let geo_core = GeoCore::from_settings(settings);
        let repository = ClassifierRepository::from_config(
            &geo_core.output_path,
            settings.classifier_server_url.as_deref(),
        )?;
        Ok(Classification {
            settings,
            geo_core,
            repository,
        })
    }

    pub fn with_repository(mut self, repository: ClassifierRepository) -> Self {
        self.repository = repository;
        self
    }

    pub fn repository(&self) -> &ClassifierRepository {
        &self.repository
    }

    /// Train on the labelled layer at `training` and persist the model
    /// under the configured name.
    pub fn train_classifier(&self, training: &Path) -> Result<(String, TrainingReport)> {
        let layer = layer::read_line_layer(training)?;
        let (model, report) = train(&layer, &self.settings.forest)?;
        let name = self
            .repository
            .save(&model, &self.settings.classifier_file_name)?;
        Ok((name, report))
    }

    /// Load the named classifier, predict the layer at `validation` and write
    /// it to `output`.
    pub fn apply_classifier(&self, validation: &Path, output: &Path) -> Result<PredictionReport> {
        let model = self.repository.load(&self.settings.classifier_file_name)?;
        model.check_features()?;
        let mut layer = layer::read_line_layer(validation)?;
        if layer.epsg.is_none() {
            layer.epsg = self.geo_core.get_epsg();
        }
        let report = predict(&model, &mut layer);
        layer::write_line_layer(&layer, output)?;
        info!("Classified layer written to {:?}", output);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::line_string;

    struct Constant(f64);

    impl ProbabilityModel for Constant {
        fn n_features(&self) -> usize {
            FEATURE_ATTRIBUTES.len()
        }

        fn predict_proba(&self, _features: &[f64]) -> Result<f64> {
            Ok(self.0)
        }
    }

    fn segment(id: i64, length: f64) -> LineFeature {
        LineFeature::new(line_string![(x: 0.0, y: 0.0), (x: length, y: 0.0)])
            .with_id(id)
            .with_attribute(Attribute::Length, length)
    }

    fn training_layer(red_grad_of_first: f64) -> LineLayer {
        let features = (0..30)
            .map(|i| {
                let boundary = if i % 3 == 0 { 1.0 } else { 0.0 };
                let red = if i == 0 {
                    red_grad_of_first
                } else {
                    boundary * 20.0 + (i % 5) as f64
                };
                segment(i + 1, 1.0 + (i % 7) as f64)
                    .with_attribute(Attribute::RedGrad, red)
                    .with_attribute(Attribute::Boundary, boundary)
            })
            .collect();
        LineLayer::new("training", features)
    }

    fn small_params() -> ForestParams {
        ForestParams {
            n_trees: 10,
            ..ForestParams::default()
        }
    }

    #[test]
    fn test_predicted_boundary_is_scaled_by_length() {
        let mut layer = LineLayer::new(
            "validation",
            vec![segment(1, 10.0).with_attribute(Attribute::RedGrad, 0.5)],
        );
        let report = predict(&Constant(0.8), &mut layer);
        assert_relative_eq!(layer.features[0].attribute(Attribute::Boundary).unwrap(), 8.0);
        assert_eq!(report, PredictionReport { total: 1, predicted: 1, failed: 0 });
    }

    #[test]
    fn test_nan_is_replaced_by_sentinel_before_fit() {
        let (with_nan, _) = train(&training_layer(f64::NAN), &small_params()).unwrap();
        let (with_sentinel, _) = train(&training_layer(-1.0), &small_params()).unwrap();
        assert_eq!(
            serde_json::to_string(&with_nan.forest).unwrap(),
            serde_json::to_string(&with_sentinel.forest).unwrap()
        );
    }

    #[test]
    fn test_feature_vector_sentinel() {
        let feature = segment(1, 2.0).with_attribute(Attribute::DsmGrad, f64::NAN);
        let row = feature_vector(&feature).unwrap();
        assert_eq!(row.len(), 8);
        assert_eq!(row[1], 2.0);
        assert_eq!(row[0], NO_DATA_SENTINEL);
        assert_eq!(row[7], NO_DATA_SENTINEL);
    }

    #[test]
    fn test_nan_vertices_read_as_sentinel() {
        let mut properties = serde_json::Map::new();
        properties.insert("vertices".to_string(), serde_json::json!("NaN"));
        properties.insert("length".to_string(), serde_json::json!("NaN"));
        let feature = LineFeature::from_properties(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)], properties);
        assert_eq!(feature.attribute(Attribute::Vertices), None);
        let row = feature_vector(&feature).unwrap();
        assert_eq!(row[0], NO_DATA_SENTINEL);
        assert_eq!(row[1], NO_DATA_SENTINEL);

        let infinite = segment(1, 2.0).with_attribute(Attribute::Vertices, f64::INFINITY);
        assert_eq!(feature_vector(&infinite).unwrap()[0], NO_DATA_SENTINEL);
    }

    #[test]
    fn test_unparsed_attribute_fails_only_that_feature() {
        let mut properties = serde_json::Map::new();
        properties.insert("ID".to_string(), serde_json::json!(2));
        properties.insert("length".to_string(), serde_json::json!(4.0));
        properties.insert("azimuth".to_string(), serde_json::json!("north-east"));
        let broken = LineFeature::from_properties(
            line_string![(x: 0.0, y: 0.0), (x: 4.0, y: 0.0)],
            properties,
        );
        let mut layer = LineLayer::new("validation", vec![segment(1, 10.0), broken]);

        let report = predict(&Constant(0.5), &mut layer);
        assert_eq!(report, PredictionReport { total: 2, predicted: 1, failed: 1 });
        assert_eq!(layer.features[0].attribute(Attribute::Boundary), Some(5.0));
        assert_eq!(layer.features[1].attribute(Attribute::Boundary), None);
    }

    #[test]
    fn test_missing_length_counts_as_failure() {
        let feature = LineFeature::new(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)]).with_id(1);
        let mut layer = LineLayer::new("validation", vec![feature]);
        let report = predict(&Constant(0.9), &mut layer);
        assert_eq!(report.failed, 1);
        assert_eq!(report.predicted, 0);
        assert_eq!(layer.features[0].attribute(Attribute::Boundary), None);
    }

    #[test]
    fn test_train_skips_unlabelled() {
        let mut layer = training_layer(3.0);
        layer.features[1].set_attribute(Attribute::Boundary, None);
        let (model, report) = train(&layer, &small_params()).unwrap();
        assert_eq!(report.total, 30);
        assert_eq!(report.unlabelled, 1);
        assert_eq!(report.used, 29);
        assert_eq!(model.training_samples, 29);
        assert!(model.check_features().is_ok());
    }

    #[test]
    fn test_trained_forest_separates_gradients() {
        let (model, _) = train(&training_layer(25.0), &small_params()).unwrap();
        let boundary = segment(1, 3.0).with_attribute(Attribute::RedGrad, 22.0);
        let other = segment(2, 3.0).with_attribute(Attribute::RedGrad, 2.0);
        let p_boundary = model.predict_proba(&feature_vector(&boundary).unwrap()).unwrap();
        let p_other = model.predict_proba(&feature_vector(&other).unwrap()).unwrap();
        assert!(p_boundary > p_other);
    }

    #[test]
    fn test_apply_without_model_is_classifier_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            output_data_path: dir.path().to_path_buf(),
            classifier_file_name: "missing-model".to_string(),
            ..Settings::default()
        };
        let classification = Classification::new(&settings).unwrap();
        let err = classification
            .apply_classifier(&dir.path().join("validation.geojson"), &dir.path().join("out.geojson"))
            .unwrap_err();
        assert!(matches!(err, BoundaryError::ClassifierNotFound(_)));
    }
}
