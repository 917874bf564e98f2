use std::collections::HashMap;
use tracing::info;

use crate::layer::{Attribute, LineLayer};

/// A value computed for the feature with the given `ID`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureValue {
    pub id: Option<i64>,
    /// `None` when the value could not be computed
    pub value: Option<f64>,
}

impl FeatureValue {
    pub fn new(id: Option<i64>, value: Option<f64>) -> Self {
        FeatureValue { id, value }
    }
}

/// Counts reported after merging one attribute into a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulateReport {
    pub attribute: Attribute,
    /// Features in the target layer
    pub total: usize,
    /// Features that found a value entry with their `ID`
    pub matched: usize,
    /// Matched features whose value is set
    pub calculated: usize,
}

impl PopulateReport {
    /// Features whose attribute stays unset after the merge.
    pub fn unset(&self) -> usize {
        self.total - self.calculated
    }
}

/// Merges computed values into a line layer by `ID`.
///
/// The lookup is built once. When several entries share an `ID` the first
/// one wins; each entry is applied to at most one feature.
#[derive(Debug, Clone, Default)]
pub struct FieldPopulator {
    values: HashMap<i64, Option<f64>>,
}

impl FieldPopulator {
    pub fn new(values: impl IntoIterator<Item = FeatureValue>) -> Self {
        let mut lookup = HashMap::new();
        for entry in values {
            if let Some(id) = entry.id {
                lookup.entry(id).or_insert(entry.value);
            }
        }
        FieldPopulator { values: lookup }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Write `attribute` on every matching feature. Unmatched features are
    /// left untouched.
    pub fn populate(self, layer: &mut LineLayer, attribute: Attribute) -> PopulateReport {
        self.populate_with(layer, attribute, |value, _| value)
    }

    /// Like [`populate`](Self::populate), with `transform(value, feature)`
    /// applied before writing.
    pub fn populate_with<F>(
        mut self,
        layer: &mut LineLayer,
        attribute: Attribute,
        mut transform: F,
    ) -> PopulateReport
    where
        F: FnMut(Option<f64>, &crate::layer::LineFeature) -> Option<f64>,
    {
        let mut report = PopulateReport {
            attribute,
            total: layer.len(),
            matched: 0,
            calculated: 0,
        };
        for feature in layer.features.iter_mut() {
            let Some(id) = feature.id() else { continue };
            let Some(value) = self.values.remove(&id) else { continue };
            let value = transform(value, feature);
            feature.set_attribute(attribute, value);
            report.matched += 1;
            if value.is_some() {
                report.calculated += 1;
            }
        }
        info!(
            "{}: {} of {} features matched, {} calculated, {} unset",
            attribute,
            report.matched,
            report.total,
            report.calculated,
            report.unset()
        );
        report
    }
}

/// Merge `values` into `layer` under `attribute`.
pub fn populate_field(
    layer: &mut LineLayer,
    attribute: Attribute,
    values: impl IntoIterator<Item = FeatureValue>,
) -> PopulateReport {
    FieldPopulator::new(values).populate(layer, attribute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LineFeature;
    use geo::line_string;

    fn layer() -> LineLayer {
        let line = line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)];
        LineLayer::new(
            "edges",
            (1..=4)
                .map(|id| LineFeature::new(line.clone()).with_id(id))
                .collect(),
        )
    }

    fn values() -> Vec<FeatureValue> {
        vec![
            FeatureValue::new(Some(2), Some(0.5)),
            FeatureValue::new(Some(1), Some(1.5)),
            FeatureValue::new(Some(2), Some(9.0)),
            FeatureValue::new(Some(3), None),
            FeatureValue::new(None, Some(7.0)),
        ]
    }

    #[test]
    fn test_populate_matches_by_id() {
        let mut layer = layer();
        let report = populate_field(&mut layer, Attribute::RedGrad, values());

        assert_eq!(layer.features[0].attribute(Attribute::RedGrad), Some(1.5));
        // first entry for ID 2 wins
        assert_eq!(layer.features[1].attribute(Attribute::RedGrad), Some(0.5));
        assert_eq!(layer.features[2].attribute(Attribute::RedGrad), None);
        assert_eq!(layer.features[3].attribute(Attribute::RedGrad), None);
        assert_eq!(report.total, 4);
        assert_eq!(report.matched, 3);
        assert_eq!(report.calculated, 2);
        assert_eq!(report.unset(), 2);
    }

    #[test]
    fn test_populate_is_idempotent() {
        let mut once = layer();
        populate_field(&mut once, Attribute::DsmGrad, values());
        let mut twice = once.clone();
        populate_field(&mut twice, Attribute::DsmGrad, values());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_duplicate_feature_ids_consume_entry_once() {
        let line = line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)];
        let mut layer = LineLayer::new(
            "edges",
            vec![
                LineFeature::new(line.clone()).with_id(5),
                LineFeature::new(line).with_id(5),
            ],
        );
        let report = populate_field(
            &mut layer,
            Attribute::BlueGrad,
            vec![FeatureValue::new(Some(5), Some(3.0))],
        );
        assert_eq!(report.matched, 1);
        assert_eq!(layer.features[0].attribute(Attribute::BlueGrad), Some(3.0));
        assert_eq!(layer.features[1].attribute(Attribute::BlueGrad), None);
    }

    #[test]
    fn test_unmatched_feature_keeps_existing_value() {
        let mut layer = layer();
        layer.features[3].set_attribute(Attribute::GreenGrad, Some(4.0));
        populate_field(&mut layer, Attribute::GreenGrad, values());
        assert_eq!(layer.features[3].attribute(Attribute::GreenGrad), Some(4.0));
    }

    #[test]
    fn test_populate_with_transform() {
        let mut layer = layer();
        let report = FieldPopulator::new(values()).populate_with(
            &mut layer,
            Attribute::Boundary,
            |value, feature| value.map(|v| v * feature.id().unwrap_or(0) as f64),
        );
        assert_eq!(layer.features[1].attribute(Attribute::Boundary), Some(1.0));
        assert_eq!(report.calculated, 2);
    }
}
