//! Geodesic line segments
//!
//! [`GeoSegment`] models the shortest-path arc between two points on WGS84.
//! Length and both azimuths are computed once at construction and refreshed
//! whenever an endpoint is replaced.  Orientation and intersection tests use
//! 3-D spherical cross products rather than planar determinants, which keeps
//! them correct near the poles and across the antimeridian.

use thiserror::Error;

use crate::geodesic::geodesic_inverse;
use crate::measure::{Degrees, Meters, UnitOfMeasure};
use crate::point::GeoPoint;

/// Latitudes above this are treated as at-pole: longitude differences are
/// meaningless there and no antimeridian crossing is reported.
const POLE_THRESHOLD: f64 = 89.9;

/// Segments shorter than this skip the golden-section search entirely.
const DEGENERATE_LENGTH: Meters<f64> = Meters(1e-3);

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("distance {distance} outside segment of length {length}")]
    OutOfRange {
        distance: Meters<f64>,
        length: Meters<f64>,
    },
    #[error("segments do not share an endpoint")]
    NoSharedEndpoint,
}

type Result<T> = std::result::Result<T, SegmentError>;

/// Which endpoint a distance along the segment is measured from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LineEnd {
    Start,
    End,
}

/// Winding of an ordered point triple on the sphere.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Orientation {
    Collinear,
    Clockwise,
    CounterClockwise,
}

/// Which side of a directed segment a point falls on.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SideOfLine {
    Left,
    Right,
    On,
}

/// A geodesic line segment between two geographic points.
#[derive(Clone, Copy, Debug)]
pub struct GeoSegment {
    start: GeoPoint,
    end: GeoPoint,
    length: Meters<f64>,
    forward_azimuth: Degrees<f64>,
    backward_azimuth: Degrees<f64>,
}

impl GeoSegment {
    pub fn new(start: GeoPoint, end: GeoPoint) -> GeoSegment {
        let inverse = geodesic_inverse(&start, &end);
        GeoSegment {
            start,
            end,
            length: inverse.geo_distance,
            forward_azimuth: inverse.azimuth1,
            backward_azimuth: Degrees((inverse.azimuth2.value() + 180.0) % 360.0),
        }
    }

    pub fn start(&self) -> GeoPoint {
        self.start
    }

    pub fn end(&self) -> GeoPoint {
        self.end
    }

    /// Geodesic length in meters.
    pub fn length(&self) -> Meters<f64> {
        self.length
    }

    /// Bearing from start toward end, clockwise from north in [0, 360).
    pub fn forward_azimuth(&self) -> Degrees<f64> {
        self.forward_azimuth
    }

    /// Bearing from end back toward start, in [0, 360).
    pub fn backward_azimuth(&self) -> Degrees<f64> {
        self.backward_azimuth
    }

    pub fn set_start(&mut self, start: GeoPoint) {
        *self = GeoSegment::new(start, self.end);
    }

    pub fn set_end(&mut self, end: GeoPoint) {
        *self = GeoSegment::new(self.start, end);
    }

    /// A copy with the endpoints swapped.
    pub fn reversed(&self) -> GeoSegment {
        GeoSegment::new(self.end, self.start)
    }

    /// Geodesic midpoint of the segment.
    pub fn midpoint(&self) -> GeoPoint {
        self.start.destination(self.length / 2.0, self.forward_azimuth)
    }

    /// The point at `distance` along the arc measured from the given end.
    pub fn point_at_distance(&self, distance: Meters<f64>, from: LineEnd) -> Result<GeoPoint> {
        if distance.value() < 0.0 || distance > self.length + Meters(1e-9) {
            return Err(SegmentError::OutOfRange {
                distance,
                length: self.length,
            });
        }
        let point = match from {
            LineEnd::Start => self.start.destination(distance, self.forward_azimuth),
            LineEnd::End => self.end.destination(distance, self.backward_azimuth),
        };
        Ok(point)
    }

    /// Minimum geodesic distance from `point` to any point of this segment.
    ///
    /// Golden-section search along the arc; the distance profile is
    /// unimodal on a geodesic segment.  Accuracy is 1 m or one millionth of
    /// the segment length, whichever is larger.
    pub fn distance_to_point(&self, point: &GeoPoint) -> Meters<f64> {
        if self.length < DEGENERATE_LENGTH {
            return point.distance(&self.start);
        }

        let len = self.length.value();
        let f = |t: f64| {
            let on_arc = self.start.destination(Meters(len * t), self.forward_azimuth);
            point.distance(&on_arc).value()
        };

        let tolerance = 1.0_f64.max(1e-6 * len);
        let gr = (5.0_f64.sqrt() - 1.0) / 2.0;
        let (mut a, mut b) = (0.0_f64, 1.0_f64);
        let mut c = b - gr * (b - a);
        let mut d = a + gr * (b - a);
        let mut fc = f(c);
        let mut fd = f(d);
        let mut iterations = 0;
        while (b - a) * len > tolerance && iterations < 100 {
            if fc < fd {
                b = d;
                d = c;
                fd = fc;
                c = b - gr * (b - a);
                fc = f(c);
            } else {
                a = c;
                c = d;
                fc = fd;
                d = a + gr * (b - a);
                fd = f(d);
            }
            iterations += 1;
        }

        let interior = fc.min(fd);
        let at_ends = point
            .distance(&self.start)
            .value()
            .min(point.distance(&self.end).value());
        Meters(interior.min(at_ends))
    }

    /// Whether this segment and `other` cross.
    ///
    /// With `ignore_shared_endpoints`, touching only at a common endpoint
    /// does not count; a collinear overlap extending beyond the shared
    /// endpoint still does.
    pub fn intersects(&self, other: &GeoSegment, ignore_shared_endpoints: bool) -> bool {
        let (p1, q1) = (self.start, self.end);
        let (p2, q2) = (other.start, other.end);

        let shares_endpoint = p1.same_location(&p2)
            || p1.same_location(&q2)
            || q1.same_location(&p2)
            || q1.same_location(&q2);

        let o1 = Self::orientation(&p1, &q1, &p2);
        let o2 = Self::orientation(&p1, &q1, &q2);
        let o3 = Self::orientation(&p2, &q2, &p1);
        let o4 = Self::orientation(&p2, &q2, &q1);

        if shares_endpoint {
            if !ignore_shared_endpoints {
                return true;
            }
            // Sharing an endpoint, two geodesics can only meet again if
            // they are collinear and overlap past the shared point.
            if o1 == Orientation::Collinear && o2 == Orientation::Collinear {
                let other_far = if p1.same_location(&p2) || q1.same_location(&p2) {
                    q2
                } else {
                    p2
                };
                let self_far = if p2.same_location(&p1) || q2.same_location(&p1) {
                    q1
                } else {
                    p1
                };
                return (Self::on_segment(&p1, &q1, &other_far)
                    && !other_far.same_location(&p1)
                    && !other_far.same_location(&q1))
                    || (Self::on_segment(&p2, &q2, &self_far)
                        && !self_far.same_location(&p2)
                        && !self_far.same_location(&q2));
            }
            return false;
        }

        if o1 != o2
            && o3 != o4
            && o1 != Orientation::Collinear
            && o2 != Orientation::Collinear
            && o3 != Orientation::Collinear
            && o4 != Orientation::Collinear
        {
            return true;
        }

        (o1 == Orientation::Collinear && Self::on_segment(&p1, &q1, &p2))
            || (o2 == Orientation::Collinear && Self::on_segment(&p1, &q1, &q2))
            || (o3 == Orientation::Collinear && Self::on_segment(&p2, &q2, &p1))
            || (o4 == Orientation::Collinear && Self::on_segment(&p2, &q2, &q1))
    }

    /// Non-reflex angle between this segment and `other` at their shared
    /// endpoint, in degrees [0, 180].
    pub fn smallest_angle_with(&self, other: &GeoSegment) -> Result<Degrees<f64>> {
        let (shared, self_far, other_far) = if self.start.same_location(&other.start) {
            (self.start, self.end, other.end)
        } else if self.start.same_location(&other.end) {
            (self.start, self.end, other.start)
        } else if self.end.same_location(&other.start) {
            (self.end, self.start, other.end)
        } else if self.end.same_location(&other.end) {
            (self.end, self.start, other.start)
        } else {
            return Err(SegmentError::NoSharedEndpoint);
        };

        let a1 = shared.forward_azimuth(&self_far).value();
        let a2 = shared.forward_azimuth(&other_far).value();
        let mut diff = (a1 - a2).abs() % 360.0;
        if diff > 180.0 {
            diff = 360.0 - diff;
        }
        Ok(Degrees(diff))
    }

    /// Winding of the triple (p, q, r) on the sphere, via the triple
    /// product of the points' unit vectors.
    pub fn orientation(p: &GeoPoint, q: &GeoPoint, r: &GeoPoint) -> Orientation {
        let u = unit_vector(p);
        let v = unit_vector(q);
        let w = unit_vector(r);
        let triple = cross(u, v)
            .iter()
            .zip(w.iter())
            .map(|(a, b)| a * b)
            .sum::<f64>();
        if triple.abs() < 1e-9 {
            Orientation::Collinear
        } else if triple > 0.0 {
            Orientation::CounterClockwise
        } else {
            Orientation::Clockwise
        }
    }

    /// Which side of this directed segment `point` falls on.
    pub fn side_of(&self, point: &GeoPoint) -> SideOfLine {
        match Self::orientation(&self.start, &self.end, point) {
            Orientation::CounterClockwise => SideOfLine::Left,
            Orientation::Clockwise => SideOfLine::Right,
            Orientation::Collinear => SideOfLine::On,
        }
    }

    /// Whether the two segments connect the same pair of points, in either
    /// direction.
    pub fn same_endpoints(&self, other: &GeoSegment) -> bool {
        (self.start.same_location(&other.start) && self.end.same_location(&other.end))
            || (self.start.same_location(&other.end) && self.end.same_location(&other.start))
    }

    /// Whether either endpoint of `other` coincides with an endpoint of
    /// this segment.
    pub fn shares_endpoint_with(&self, other: &GeoSegment) -> bool {
        self.start.same_location(&other.start)
            || self.start.same_location(&other.end)
            || self.end.same_location(&other.start)
            || self.end.same_location(&other.end)
    }

    pub fn min_lon(&self) -> f64 {
        self.start.lon().value().min(self.end.lon().value())
    }

    pub fn max_lon(&self) -> f64 {
        self.start.lon().value().max(self.end.lon().value())
    }

    pub fn min_lat(&self) -> f64 {
        self.start.lat().value().min(self.end.lat().value())
    }

    pub fn max_lat(&self) -> f64 {
        self.start.lat().value().max(self.end.lat().value())
    }

    /// Whether the segment logically crosses the ±180° meridian.
    ///
    /// True when the raw longitude difference exceeds the shortest
    /// wrapped difference; points at the poles never cross.
    pub fn crosses_antimeridian(&self) -> bool {
        if self.start.lat().value().abs() > POLE_THRESHOLD
            || self.end.lat().value().abs() > POLE_THRESHOLD
        {
            return false;
        }
        // An endpoint sitting exactly on the meridian touches it, which
        // is not a crossing and must not be split again.
        if self.start.lon().value().abs() == 180.0 || self.end.lon().value().abs() == 180.0 {
            return false;
        }
        let direct = (self.end.lon().value() - self.start.lon().value()).abs();
        let shortest = if direct > 180.0 { 360.0 - direct } else { direct };
        direct > shortest + 1e-10
    }

    /// Split a wrapping segment into two pieces meeting at the ±180°
    /// meridian.
    ///
    /// The crossing latitude is found by linear interpolation in
    /// longitude, which is adequate at quadtree granularity.  The eastern
    /// piece ends at +180°, the western piece starts at -180°, both at the
    /// same latitude.  A non-wrapping segment comes back unchanged.
    pub fn split_at_antimeridian(&self) -> Vec<GeoSegment> {
        if !self.crosses_antimeridian() {
            return vec![*self];
        }

        let start_lon = (self.start.lon().value() + 360.0) % 360.0;
        let end_lon = (self.end.lon().value() + 360.0) % 360.0;
        let start_lat = self.start.lat().value();
        let end_lat = self.end.lat().value();

        let ratio = (start_lon - 180.0).abs() / (end_lon - start_lon).abs();
        let crossing_lat = Degrees(start_lat + ratio * (end_lat - start_lat));

        let east = GeoPoint::new(Degrees(180.0), crossing_lat);
        let west = GeoPoint::new(Degrees(-180.0), crossing_lat);

        if self.start.lon().value() > 0.0 {
            // Eastern-hemisphere start runs up to +180, the remainder
            // continues from -180.
            vec![
                GeoSegment::new(self.start, east),
                GeoSegment::new(west, self.end),
            ]
        } else {
            vec![
                GeoSegment::new(self.start, west),
                GeoSegment::new(east, self.end),
            ]
        }
    }

    /// Collinear `r` lies within the angular bounding box of (p, q).
    fn on_segment(p: &GeoPoint, q: &GeoPoint, r: &GeoPoint) -> bool {
        let eps = 1e-9;
        r.lon().value() <= p.lon().value().max(q.lon().value()) + eps
            && r.lon().value() >= p.lon().value().min(q.lon().value()) - eps
            && r.lat().value() <= p.lat().value().max(q.lat().value()) + eps
            && r.lat().value() >= p.lat().value().min(q.lat().value()) - eps
    }
}

impl PartialEq for GeoSegment {
    /// Direction-sensitive equality: same start and same end.
    fn eq(&self, other: &Self) -> bool {
        self.start.same_location(&other.start) && self.end.same_location(&other.end)
    }
}

fn unit_vector(p: &GeoPoint) -> [f64; 3] {
    let lat = p.lat().to_radians();
    let lon = p.lon().to_radians();
    [
        lat.cos() * lon.cos(),
        lat.cos() * lon.sin(),
        lat.sin(),
    ]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;

    use super::{GeoSegment, LineEnd, Orientation};
    use crate::geo_point;
    use crate::measure::{Meters, UnitOfMeasure};
    use crate::point::GeoPoint;

    fn seg(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> GeoSegment {
        GeoSegment::new(geo_point!(lon1, lat1), geo_point!(lon2, lat2))
    }

    #[test]
    fn length_nonnegative_and_cached() {
        let s = seg(-77.0369, 38.9072, -74.0060, 40.7128);
        assert!(s.length().value() > 0.0);
        let d = s.start().distance(&s.end());
        assert_relative_eq!(s.length().value(), d.value(), max_relative = 1e-12);
    }

    #[test]
    fn endpoint_change_recomputes() {
        let mut s = seg(0.0, 0.0, 1.0, 0.0);
        let before = s.length();
        s.set_end(geo_point!(2.0, 0.0));
        assert!(s.length().value() > before.value() * 1.9);
    }

    #[test]
    fn point_at_distance_endpoints() {
        let s = seg(-10.0, 5.0, -9.0, 5.5);
        let at_zero = s.point_at_distance(Meters(0.0), LineEnd::Start).unwrap();
        assert_eq!(at_zero, s.start());
        let at_len = s.point_at_distance(s.length(), LineEnd::Start).unwrap();
        assert!(at_len.distance(&s.end()).value() < 1.0);
        let from_end = s.point_at_distance(Meters(0.0), LineEnd::End).unwrap();
        assert_eq!(from_end, s.end());
    }

    #[test]
    fn point_at_distance_out_of_range() {
        let s = seg(0.0, 0.0, 1.0, 0.0);
        assert!(s.point_at_distance(s.length() + Meters(10.0), LineEnd::Start).is_err());
        assert!(s.point_at_distance(Meters(-1.0), LineEnd::Start).is_err());
    }

    #[test]
    fn midpoint_equidistant() {
        let s = seg(-77.0369, 38.9072, -74.0060, 40.7128);
        let mid = s.midpoint();
        let to_start = mid.distance(&s.start()).value();
        let to_end = mid.distance(&s.end()).value();
        assert!((to_start - to_end).abs() < 1.0);
    }

    #[test]
    fn distance_to_point_on_segment_is_small() {
        let s = seg(0.0, 0.0, 2.0, 0.0);
        let mid = s.midpoint();
        assert!(s.distance_to_point(&mid).value() < 1.0);
    }

    #[test]
    fn distance_to_point_off_segment() {
        let s = seg(0.0, 0.0, 2.0, 0.0);
        // One degree north of the midpoint: roughly 110.6 km.
        let p = geo_point!(1.0, 1.0);
        let d = s.distance_to_point(&p).value();
        assert_relative_eq!(d, 110_574.0, max_relative = 0.01);
    }

    #[test]
    fn distance_to_point_nearest_endpoint() {
        let s = seg(0.0, 0.0, 1.0, 0.0);
        let p = geo_point!(3.0, 0.0);
        let d = s.distance_to_point(&p).value();
        let expected = p.distance(&s.end()).value();
        assert_relative_eq!(d, expected, max_relative = 1e-3);
    }

    #[test]
    fn crossing_segments_intersect() {
        let a = seg(-1.0, -1.0, 1.0, 1.0);
        let b = seg(-1.0, 1.0, 1.0, -1.0);
        assert!(a.intersects(&b, true));
        assert!(a.intersects(&b, false));
    }

    #[test]
    fn disjoint_segments_do_not_intersect() {
        let a = seg(0.0, 0.0, 1.0, 0.0);
        let b = seg(0.0, 2.0, 1.0, 2.0);
        assert!(!a.intersects(&b, true));
    }

    #[test]
    fn shared_endpoint_respects_flag() {
        let a = seg(0.0, 0.0, 1.0, 1.0);
        let b = seg(1.0, 1.0, 2.0, 0.0);
        assert!(!a.intersects(&b, true));
        assert!(a.intersects(&b, false));
    }

    #[test]
    fn collinear_overlap_detected() {
        let a = seg(0.0, 0.0, 2.0, 0.0);
        let b = seg(1.0, 0.0, 3.0, 0.0);
        assert!(a.intersects(&b, true));
    }

    #[test]
    fn orientation_basic() {
        let p = geo_point!(0.0, 0.0);
        let q = geo_point!(1.0, 0.0);
        let above = geo_point!(0.5, 1.0);
        let below = geo_point!(0.5, -1.0);
        assert_eq!(GeoSegment::orientation(&p, &q, &above), Orientation::CounterClockwise);
        assert_eq!(GeoSegment::orientation(&p, &q, &below), Orientation::Clockwise);
    }

    #[test]
    fn smallest_angle_requires_shared_endpoint() {
        let a = seg(0.0, 0.0, 1.0, 0.0);
        let b = seg(5.0, 5.0, 6.0, 5.0);
        assert!(a.smallest_angle_with(&b).is_err());
    }

    #[test]
    fn smallest_angle_right_angle() {
        let a = seg(0.0, 0.0, 1.0, 0.0);
        let b = seg(0.0, 0.0, 0.0, 1.0);
        let angle = a.smallest_angle_with(&b).unwrap();
        assert_relative_eq!(angle.value(), 90.0, epsilon = 0.1);
    }

    #[test]
    fn antimeridian_crossing_detected() {
        let wrapping = seg(179.0, 40.0, -179.0, 40.0);
        assert!(wrapping.crosses_antimeridian());
        let plain = seg(170.0, 40.0, 175.0, 40.0);
        assert!(!plain.crosses_antimeridian());
        let near_pole = seg(179.0, 89.95, -179.0, 89.95);
        assert!(!near_pole.crosses_antimeridian());
    }

    #[test]
    fn antimeridian_length_is_short_way() {
        let wrapping = seg(179.0, 40.0, -179.0, 40.0);
        // Two degrees of longitude at 40N, not the long way around.
        assert!((100_000.0..250_000.0).contains(&wrapping.length().value()));
    }

    #[test]
    fn split_at_antimeridian_meets_at_edges() {
        let wrapping = seg(179.0, 40.0, -179.0, 40.0);
        let pieces = wrapping.split_at_antimeridian();
        assert_eq!(pieces.len(), 2);
        assert_relative_eq!(pieces[0].end().lon().value(), 180.0);
        assert_relative_eq!(pieces[1].start().lon().value(), -180.0);
        assert_relative_eq!(
            pieces[0].end().lat().value(),
            pieces[1].start().lat().value(),
            epsilon = 1e-12
        );
        // Neither piece wraps on its own.
        assert!(!pieces[0].crosses_antimeridian());
        assert!(!pieces[1].crosses_antimeridian());
    }

    #[test]
    fn split_westward_crossing() {
        let wrapping = seg(-179.0, 10.0, 179.0, 20.0);
        let pieces = wrapping.split_at_antimeridian();
        assert_eq!(pieces.len(), 2);
        assert_relative_eq!(pieces[0].end().lon().value(), -180.0);
        assert_relative_eq!(pieces[1].start().lon().value(), 180.0);
        assert_relative_eq!(pieces[0].end().lat().value(), 15.0, epsilon = 1e-9);
    }

    #[test]
    fn split_noop_without_crossing() {
        let plain = seg(10.0, 10.0, 20.0, 20.0);
        assert_eq!(plain.split_at_antimeridian().len(), 1);
    }

    #[quickcheck]
    fn qc_split_pieces_meet_at_the_antimeridian(a: GeoPoint, b: GeoPoint) -> TestResult {
        let segment = GeoSegment::new(a, b);
        if !segment.crosses_antimeridian() {
            return TestResult::discard();
        }
        let pieces = segment.split_at_antimeridian();
        if pieces.len() != 2 {
            return TestResult::failed();
        }
        let meet_lons = [
            pieces[0].end().lon().value().abs(),
            pieces[1].start().lon().value().abs(),
        ];
        let lats_agree = (pieces[0].end().lat().value() - pieces[1].start().lat().value()).abs()
            < 1e-9;
        TestResult::from_bool(
            meet_lons.iter().all(|l| (l - 180.0).abs() < 1e-9)
                && lats_agree
                && !pieces[0].crosses_antimeridian()
                && !pieces[1].crosses_antimeridian(),
        )
    }
}
