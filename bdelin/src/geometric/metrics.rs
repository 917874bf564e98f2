use geo::{Coord, EuclideanLength, LineString};

use crate::error::{BoundaryError, Result};

/// Geometric attributes of a single line segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineMetrics {
    pub vertices: usize,
    pub length: f64,
    pub azimuth: f64,
    pub sinuosity: f64,
}

impl LineMetrics {
    /// Compute all metrics. Lines with fewer than two vertices are rejected.
    pub fn from_line(line: &LineString<f64>) -> Result<Self> {
        let (start, end) = endpoints(line)?;
        let length = line_length(line);
        Ok(LineMetrics {
            vertices: line.0.len(),
            length,
            azimuth: azimuth(start, end),
            sinuosity: sinuosity_from(length, start, end),
        })
    }
}

fn endpoints(line: &LineString<f64>) -> Result<(Coord<f64>, Coord<f64>)> {
    match (line.0.first(), line.0.last()) {
        (Some(start), Some(end)) if line.0.len() >= 2 => Ok((*start, *end)),
        _ => Err(BoundaryError::geometry(
            None,
            format!("line needs at least 2 vertices, has {}", line.0.len()),
        )),
    }
}

/// Accumulated Euclidean length along the vertices.
pub fn line_length(line: &LineString<f64>) -> f64 {
    line.euclidean_length()
}

/// Bearing in degrees in [0, 360) from `start` to `end`.
///
/// Uses the initial great-circle bearing with the first coordinate read as
/// latitude and the second as longitude. On projected coordinates the value
/// is only an orientation proxy, not a true bearing.
pub fn azimuth(start: Coord<f64>, end: Coord<f64>) -> f64 {
    let lat1 = start.x.to_radians();
    let lat2 = end.x.to_radians();
    let diff_long = (end.y - start.y).to_radians();

    let x = diff_long.sin() * lat2.cos();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * diff_long.cos();
    let initial_bearing = x.atan2(y).to_degrees();
    (initial_bearing + 360.0) % 360.0
}

/// Path length divided by the straight start-end distance.
///
/// Closed lines (start == end) yield 0 rather than infinity.
pub fn sinuosity(line: &LineString<f64>) -> Result<f64> {
    let (start, end) = endpoints(line)?;
    Ok(sinuosity_from(line_length(line), start, end))
}

fn sinuosity_from(length: f64, start: Coord<f64>, end: Coord<f64>) -> f64 {
    let chord = (end.x - start.x).hypot(end.y - start.y);
    if chord != 0.0 {
        length / chord
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::{coord, line_string};

    #[test]
    fn test_metrics_straight_line() {
        let line = line_string![(x: 0.0, y: 0.0), (x: 3.0, y: 4.0)];
        let metrics = LineMetrics::from_line(&line).unwrap();
        assert_eq!(metrics.vertices, 2);
        assert_relative_eq!(metrics.length, 5.0);
        assert_relative_eq!(metrics.sinuosity, 1.0);
    }

    #[test]
    fn test_sinuosity_of_bent_line() {
        let line = line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0), (x: 2.0, y: 0.0)];
        let s = sinuosity(&line).unwrap();
        assert_relative_eq!(s, 2.0_f64.sqrt(), epsilon = 1e-12);
        assert!(s >= 1.0);
    }

    #[test]
    fn test_sinuosity_closed_line_is_zero() {
        let line = line_string![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 0.0)
        ];
        assert_eq!(sinuosity(&line).unwrap(), 0.0);
    }

    #[test]
    fn test_sinuosity_at_least_one_for_open_lines() {
        let lines = [
            line_string![(x: 0.0, y: 0.0), (x: 5.0, y: 0.1), (x: 9.0, y: -3.0)],
            line_string![(x: 2.0, y: 2.0), (x: 2.0, y: 2.5)],
            line_string![(x: -1.0, y: 0.0), (x: 0.0, y: 4.0), (x: 1.0, y: 0.0), (x: 2.0, y: 4.0)],
        ];
        for line in &lines {
            assert!(sinuosity(line).unwrap() >= 1.0);
        }
    }

    #[test]
    fn test_single_point_rejected() {
        let line: LineString<f64> = vec![(1.0, 1.0)].into();
        assert!(matches!(
            LineMetrics::from_line(&line),
            Err(BoundaryError::Geometry { .. })
        ));
        let empty: LineString<f64> = LineString::new(vec![]);
        assert!(sinuosity(&empty).is_err());
    }

    #[test]
    fn test_azimuth_cardinal_directions() {
        // First coordinate is read as latitude
        let origin = coord! { x: 0.0, y: 0.0 };
        assert_relative_eq!(azimuth(origin, coord! { x: 1.0, y: 0.0 }), 0.0, epsilon = 1e-9);
        assert_relative_eq!(azimuth(origin, coord! { x: 0.0, y: 1.0 }), 90.0, epsilon = 1e-9);
        assert_relative_eq!(azimuth(origin, coord! { x: -1.0, y: 0.0 }), 180.0, epsilon = 1e-9);
        assert_relative_eq!(azimuth(origin, coord! { x: 0.0, y: -1.0 }), 270.0, epsilon = 1e-9);
    }

    #[test]
    fn test_azimuth_range() {
        let points = [-170.0, -45.5, -0.001, 0.0, 0.001, 12.3, 89.0, 179.9];
        for &x1 in &points {
            for &y1 in &points {
                for &x2 in &points {
                    let a = azimuth(coord! { x: x1 / 2.0, y: y1 }, coord! { x: x2 / 2.0, y: -y1 });
                    assert!((0.0..360.0).contains(&a), "azimuth {} out of range", a);
                }
            }
        }
    }
}
