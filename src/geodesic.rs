//! Geodesic computations on the WGS84 ellipsoid
//!
//! Wraps `geographiclib-rs` (Karney's algorithms) in an interface shaped
//! around this crate's point and unit types.  Everything here works in
//! degrees and meters; azimuths are clockwise from true north.

use std::sync::LazyLock;

use geographiclib_rs::{DirectGeodesic, Geodesic, InverseGeodesic, PolygonArea, Winding};

use crate::measure::{Degrees, Meters, SquareMeters, UnitOfMeasure};
use crate::point::GeoPoint;

static WGS84: LazyLock<Geodesic> = LazyLock::new(Geodesic::wgs84);

/// A solution to the direct problem in geodesy.
pub struct DirectSolution {
    /// Destination point.
    pub point2: GeoPoint,
}

/// A solution to the inverse problem in geodesy.
pub struct InverseSolution {
    /// Geodesic distance between the points.
    pub geo_distance: Meters<f64>,

    /// Azimuth of the geodesic as measured at point1.
    pub azimuth1: Degrees<f64>,

    /// Azimuth of the geodesic as measured at point2.
    pub azimuth2: Degrees<f64>,
}

/// Calculate a solution to the direct geodesic problem.
///
/// Given a start point, azimuth, and a geodesic distance, computes the point
/// where we end up.
pub fn geodesic_direct(
    point1: &GeoPoint,
    azimuth: Degrees<f64>,
    distance: Meters<f64>,
) -> DirectSolution {
    let (lat2, lon2) = WGS84.direct(
        point1.lat().value(),
        point1.lon().value(),
        azimuth.value(),
        distance.value(),
    );
    DirectSolution {
        point2: GeoPoint::new(Degrees(lon2), Degrees(lat2)),
    }
}

/// Calculate a solution to the inverse geodesic problem.
///
/// Finds the shortest geodesic between two points on the surface of WGS84.
/// Azimuths are normalized into [0, 360).
pub fn geodesic_inverse(point1: &GeoPoint, point2: &GeoPoint) -> InverseSolution {
    let (s12, azi1, azi2, _a12) = WGS84.inverse(
        point1.lat().value(),
        point1.lon().value(),
        point2.lat().value(),
        point2.lon().value(),
    );
    InverseSolution {
        geo_distance: Meters(s12),
        azimuth1: Degrees((azi1 + 360.0) % 360.0),
        azimuth2: Degrees((azi2 + 360.0) % 360.0),
    }
}

/// Geodesic perimeter and unsigned area of a closed ring of vertices.
///
/// The closing vertex may be present or absent; `PolygonArea` closes the
/// ring itself either way.
pub fn ring_perimeter_area(ring: &[GeoPoint]) -> (Meters<f64>, SquareMeters<f64>) {
    let mut pa = PolygonArea::new(&WGS84, Winding::CounterClockwise);
    for p in deduped_ring(ring) {
        pa.add_point(p.lat().value(), p.lon().value());
    }
    let (perimeter, area, _) = pa.compute(false);
    (Meters(perimeter), SquareMeters(area))
}

/// Signed geodesic area of a ring: positive for counter-clockwise winding,
/// negative for clockwise.  Used to normalize ring orientation.
pub fn ring_signed_area(ring: &[GeoPoint]) -> SquareMeters<f64> {
    let mut pa = PolygonArea::new(&WGS84, Winding::CounterClockwise);
    for p in deduped_ring(ring) {
        pa.add_point(p.lat().value(), p.lon().value());
    }
    let (_, area, _) = pa.compute(true);
    SquareMeters(area)
}

/// Skips the repeated closing vertex so it isn't counted twice.
fn deduped_ring(ring: &[GeoPoint]) -> &[GeoPoint] {
    match (ring.first(), ring.last()) {
        (Some(first), Some(last)) if ring.len() > 1 && first.same_location(last) => {
            &ring[..ring.len() - 1]
        }
        _ => ring,
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::{geodesic_direct, geodesic_inverse, ring_signed_area};
    use crate::measure::{Degrees, UnitOfMeasure};
    use crate::point::GeoPoint;

    fn pt(lon: f64, lat: f64) -> GeoPoint {
        GeoPoint::new(Degrees(lon), Degrees(lat))
    }

    #[test]
    fn inverse_equator_five_degrees() {
        let result = geodesic_inverse(&pt(0.0, 0.0), &pt(5.0, 5.0));
        assert_relative_eq!(result.geo_distance.value(), 784029.0, max_relative = 1e-5);
    }

    #[test]
    fn direct_reproduces_inverse_target() {
        let p1 = pt(-20.0, 10.0);
        let p2 = pt(40.0, 30.0);
        let inverse = geodesic_inverse(&p1, &p2);
        let direct = geodesic_direct(&p1, inverse.azimuth1, inverse.geo_distance);
        assert!(direct.point2.distance(&p2).value() < 1.0);
    }

    #[test]
    fn azimuths_normalized() {
        let result = geodesic_inverse(&pt(0.0, 10.0), &pt(-5.0, 5.0));
        assert!(result.azimuth1.value() >= 0.0 && result.azimuth1.value() < 360.0);
        assert!(result.azimuth2.value() >= 0.0 && result.azimuth2.value() < 360.0);
    }

    #[test]
    fn signed_area_flips_with_winding() {
        let ccw = [pt(0.0, 0.0), pt(1.0, 0.0), pt(1.0, 1.0), pt(0.0, 1.0)];
        let cw: Vec<_> = ccw.iter().rev().copied().collect();
        assert!(ring_signed_area(&ccw).value() > 0.0);
        assert!(ring_signed_area(&cw).value() < 0.0);
    }
}
