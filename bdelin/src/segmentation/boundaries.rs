//! Candidate boundary lines between neighbouring segmentation polygons.

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Area, BoundingRect, Coord, Line, LineString, Polygon, Relate, Simplify};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::layer::{number_value, LineFeature, LineLayer, PolygonFeature, PolygonLayer};
use crate::settings::Tolerances;

/// DE-9IM pattern of two areas whose interiors are disjoint and whose
/// boundaries meet along a line.
const SHARED_EDGE_PATTERN: &str = "FF2F11212";

/// Radiometric summary of one segmentation polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentStats {
    pub id: i64,
    pub area: f64,
    pub average: [Option<f64>; 3],
    pub std_dev: [Option<f64>; 3],
}

impl SegmentStats {
    /// Read `AREA`, `AVERAGE_1..3` and `STDDEV_1..3`. The area falls back to
    /// the polygon's own area.
    pub fn from_feature(feature: &PolygonFeature) -> Option<Self> {
        let id = feature.id?;
        let band = |prefix: &str| {
            [1, 2, 3].map(|b| feature.number(&format!("{}_{}", prefix, b)))
        };
        Some(SegmentStats {
            id,
            area: feature
                .number("AREA")
                .unwrap_or_else(|| feature.geometry.unsigned_area()),
            average: band("AVERAGE"),
            std_dev: band("STDDEV"),
        })
    }

    fn write_properties(&self, side: &str, properties: &mut Map<String, Value>) {
        let number = |v: Option<f64>| v.and_then(number_value).unwrap_or(Value::Null);
        let long_side = if side == "L" { "LEFT" } else { "RIGHT" };
        properties.insert(format!("ID_{}", long_side), Value::from(self.id));
        properties.insert(format!("AREA_{}", long_side), number(Some(self.area)));
        for band in 0..3 {
            properties.insert(
                format!("AVERAGE{}_{}", band + 1, side),
                number(self.average[band]),
            );
            properties.insert(
                format!("STDDEV{}_{}", band + 1, side),
                number(self.std_dev[band]),
            );
        }
    }
}

/// Whether two segments differ enough in colour for their shared edge to be
/// a boundary candidate. Without tolerances every pair passes; a missing
/// statistic never passes.
pub fn passes_tolerances(a: &SegmentStats, b: &SegmentStats, tolerances: Option<&Tolerances>) -> bool {
    let Some(tol) = tolerances else {
        return true;
    };
    let exceeds = |x: Option<f64>, y: Option<f64>, limit: f64| match (x, y) {
        (Some(x), Some(y)) => (x - y).abs() > limit,
        _ => false,
    };
    (0..3).any(|band| {
        exceeds(a.average[band], b.average[band], tol.average[band])
            || exceeds(a.std_dev[band], b.std_dev[band], tol.std_dev[band])
    })
}

fn rings(polygon: &Polygon<f64>) -> impl Iterator<Item = &LineString<f64>> {
    std::iter::once(polygon.exterior()).chain(polygon.interiors().iter())
}

/// Pieces of boundary the two polygons have in common.
pub fn shared_edges(a: &Polygon<f64>, b: &Polygon<f64>) -> Vec<Line<f64>> {
    let b_lines: Vec<Line<f64>> = rings(b).flat_map(|r| r.lines()).collect();
    let mut shared = Vec::new();
    for line_a in rings(a).flat_map(|r| r.lines()) {
        for line_b in &b_lines {
            if let Some(LineIntersection::Collinear { intersection }) = line_intersection(line_a, *line_b) {
                if intersection.start != intersection.end {
                    shared.push(intersection);
                }
            }
        }
    }
    shared
}

/// Join edges that share end points into line strings.
pub fn chain_edges(edges: Vec<Line<f64>>) -> Vec<LineString<f64>> {
    let mut remaining = edges;
    let mut chains = Vec::new();
    while let Some(first) = remaining.pop() {
        let mut chain: Vec<Coord<f64>> = vec![first.start, first.end];
        loop {
            let mut extended = false;
            let mut i = 0;
            while i < remaining.len() {
                let edge = remaining[i];
                let head = chain[0];
                let tail = chain[chain.len() - 1];
                if head == tail && chain.len() > 2 {
                    break;
                }
                if edge.start == tail {
                    chain.push(edge.end);
                } else if edge.end == tail {
                    chain.push(edge.start);
                } else if edge.end == head {
                    chain.insert(0, edge.start);
                } else if edge.start == head {
                    chain.insert(0, edge.end);
                } else {
                    i += 1;
                    continue;
                }
                remaining.swap_remove(i);
                extended = true;
            }
            if !extended {
                break;
            }
        }
        chains.push(LineString::new(chain));
    }
    chains
}

/// Counts reported by [`extract_boundaries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundaryReport {
    pub polygons: usize,
    /// Polygons without an identifier, left out of the join
    pub skipped: usize,
    /// Pairs sharing an edge
    pub neighbours: usize,
    /// Neighbour pairs dropped by the colour tolerances
    pub rejected: usize,
    pub created: usize,
    pub failed: usize,
}

/// Self-join of the segmentation polygons: one line per shared-edge chain of
/// every neighbour pair `a.id < b.id` that passes the tolerance filter,
/// simplified with `resolution`.
pub fn extract_boundaries(
    segments: &PolygonLayer,
    tolerances: Option<&Tolerances>,
    resolution: f64,
) -> (LineLayer, BoundaryReport) {
    info!("Creating boundaries for {}...", segments.name);
    let mut report = BoundaryReport {
        polygons: segments.len(),
        ..BoundaryReport::default()
    };

    let mut indexed = Vec::with_capacity(segments.len());
    for feature in &segments.features {
        match (SegmentStats::from_feature(feature), feature.geometry.bounding_rect()) {
            (Some(stats), Some(rect)) => indexed.push((feature, stats, rect)),
            _ => report.skipped += 1,
        }
    }
    if report.skipped > 0 {
        warn!("{} polygons without ID or geometry were skipped", report.skipped);
    }

    let tree = RTree::bulk_load(
        indexed
            .iter()
            .enumerate()
            .map(|(i, (_, _, rect))| {
                GeomWithData::new(
                    Rectangle::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                    i,
                )
            })
            .collect(),
    );

    let mut features = Vec::new();
    for (feature_a, stats_a, rect) in &indexed {
        let envelope = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
        let mut candidates: Vec<usize> = tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.data)
            .filter(|&j| stats_a.id < indexed[j].1.id)
            .collect();
        candidates.sort_unstable();

        for j in candidates {
            let (feature_b, stats_b, _) = &indexed[j];
            let relate = feature_a.geometry.relate(&feature_b.geometry);
            if !relate.matches(SHARED_EDGE_PATTERN).unwrap_or(false) {
                continue;
            }
            report.neighbours += 1;
            if !passes_tolerances(stats_a, stats_b, tolerances) {
                report.rejected += 1;
                continue;
            }

            let mut properties = Map::new();
            stats_a.write_properties("L", &mut properties);
            stats_b.write_properties("R", &mut properties);

            let chains = chain_edges(shared_edges(&feature_a.geometry, &feature_b.geometry));
            if chains.is_empty() {
                warn!(
                    "No shared edge found between polygons {}/{}",
                    stats_a.id, stats_b.id
                );
                report.failed += 1;
                continue;
            }
            for chain in chains {
                let line = chain.simplify(&resolution);
                if line.0.len() < 2 {
                    report.failed += 1;
                    continue;
                }
                features.push(LineFeature::from_properties(line, properties.clone()));
                report.created += 1;
                debug!("Boundary #{} on polygons {}/{} created", report.created, stats_a.id, stats_b.id);
            }
        }
    }

    info!(
        "Boundaries with {} features created, {} failed ({} neighbour pairs, {} below tolerance).",
        report.created, report.failed, report.neighbours, report.rejected
    );
    let mut layer = LineLayer::new(format!("{}_boundaries", segments.name), features);
    layer.epsg = segments.epsg;
    (layer, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, polygon, EuclideanLength};
    use serde_json::json;

    fn square(id: i64, x0: f64, y0: f64, size: f64, average: f64) -> PolygonFeature {
        let mut feature = PolygonFeature::new(
            Some(id),
            polygon![
                (x: x0, y: y0),
                (x: x0 + size, y: y0),
                (x: x0 + size, y: y0 + size),
                (x: x0, y: y0 + size),
            ],
        );
        for band in 1..=3 {
            feature
                .properties
                .insert(format!("AVERAGE_{}", band), json!(average));
            feature.properties.insert(format!("STDDEV_{}", band), json!(1.0));
        }
        feature
    }

    fn tolerances() -> Tolerances {
        Tolerances {
            average: [10.0, 10.0, 10.0],
            std_dev: [5.0, 5.0, 5.0],
        }
    }

    #[test]
    fn test_shared_edges_of_adjacent_squares() {
        let a = square(1, 0.0, 0.0, 2.0, 0.0).geometry;
        let b = square(2, 2.0, 0.0, 2.0, 0.0).geometry;
        let edges = shared_edges(&a, &b);
        assert_eq!(edges.len(), 1);
        let chains = chain_edges(edges);
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].euclidean_length(), 2.0);
    }

    #[test]
    fn test_shared_edges_with_t_junction() {
        // b's edge spans two of a's vertices
        let a = polygon![
            (x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 1.0),
            (x: 2.0, y: 2.0), (x: 0.0, y: 2.0),
        ];
        let b = square(2, 2.0, -1.0, 4.0, 0.0).geometry;
        let chains = chain_edges(shared_edges(&a, &b));
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].euclidean_length(), 2.0);
    }

    #[test]
    fn test_chain_edges_joins_in_any_direction() {
        let edges = vec![
            Line::new(Coord { x: 1.0, y: 0.0 }, Coord { x: 2.0, y: 0.0 }),
            Line::new(Coord { x: 1.0, y: 0.0 }, Coord { x: 0.0, y: 0.0 }),
            Line::new(Coord { x: 2.0, y: 1.0 }, Coord { x: 2.0, y: 0.0 }),
            Line::new(Coord { x: 9.0, y: 9.0 }, Coord { x: 9.0, y: 8.0 }),
        ];
        let mut chains = chain_edges(edges);
        chains.sort_by_key(|c| c.0.len());
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[1].0.len(), 4);
        assert_eq!(chains[1].euclidean_length(), 3.0);
    }

    #[test]
    fn test_tolerances() {
        let a = SegmentStats::from_feature(&square(1, 0.0, 0.0, 1.0, 100.0)).unwrap();
        let similar = SegmentStats::from_feature(&square(2, 1.0, 0.0, 1.0, 105.0)).unwrap();
        let different = SegmentStats::from_feature(&square(3, 1.0, 0.0, 1.0, 150.0)).unwrap();
        assert!(!passes_tolerances(&a, &similar, Some(&tolerances())));
        assert!(passes_tolerances(&a, &different, Some(&tolerances())));
        assert!(passes_tolerances(&a, &similar, None));

        let mut missing = different;
        missing.average = [None; 3];
        assert!(!passes_tolerances(&a, &missing, Some(&tolerances())));
    }

    #[test]
    fn test_area_falls_back_to_geometry() {
        let stats = SegmentStats::from_feature(&square(1, 0.0, 0.0, 3.0, 0.0)).unwrap();
        assert_eq!(stats.area, 9.0);
    }

    #[test]
    fn test_extract_boundaries() {
        // 1 | 2 side by side, 3 below both; 4 far away
        let mut below = square(3, 0.0, -2.0, 2.0, 200.0);
        below.geometry = polygon![
            (x: 0.0, y: -2.0), (x: 4.0, y: -2.0), (x: 4.0, y: 0.0),
            (x: 2.0, y: 0.0), (x: 0.0, y: 0.0),
        ];
        let layer = PolygonLayer::new(
            "segments",
            vec![
                square(1, 0.0, 0.0, 2.0, 100.0),
                square(2, 2.0, 0.0, 2.0, 104.0),
                below,
                square(4, 50.0, 50.0, 1.0, 0.0),
            ],
        );
        let (boundaries, report) = extract_boundaries(&layer, Some(&tolerances()), 0.05);

        assert_eq!(report.neighbours, 3);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.created, 2);
        assert_eq!(boundaries.name, "segments_boundaries");
        let first = &boundaries.features[0];
        assert_eq!(first.extra.get("ID_LEFT"), Some(&json!(1)));
        assert_eq!(first.extra.get("ID_RIGHT"), Some(&json!(3)));
        assert_eq!(first.extra.get("AVERAGE1_R"), Some(&json!(200.0)));
        assert_eq!(first.extra.get("AREA_LEFT"), Some(&json!(4.0)));
        assert_eq!(first.geometry.euclidean_length(), 2.0);
    }

    #[test]
    fn test_overlapping_polygons_are_not_neighbours() {
        let layer = PolygonLayer::new(
            "segments",
            vec![square(1, 0.0, 0.0, 2.0, 0.0), square(2, 1.0, 0.0, 2.0, 100.0)],
        );
        let (boundaries, report) = extract_boundaries(&layer, None, 0.0);
        assert_eq!(report.neighbours, 0);
        assert!(boundaries.is_empty());
    }

    #[test]
    fn test_simplify_drops_collinear_vertices() {
        let line = line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.001), (x: 2.0, y: 0.0)];
        assert_eq!(line.simplify(&0.05).0.len(), 2);
    }
}
