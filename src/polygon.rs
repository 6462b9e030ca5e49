//! Water polygons with holes
//!
//! A [`Polygon`] is an outer ring (the navigable water body) plus zero or
//! more inner rings (landmasses, islands).  Rings are stored closed, with
//! the winding normalized at construction: outer rings counter-clockwise,
//! holes clockwise.  With one winding convention, antimeridian crossing has
//! a single definition and is cached alongside the envelope; both caches
//! are recomputed whenever a ring is replaced.

use thiserror::Error;

use crate::geodesic::{ring_perimeter_area, ring_signed_area};
use crate::measure::{Degrees, Meters, SquareMeters, UnitOfMeasure};
use crate::point::GeoPoint;
use crate::segment::{GeoSegment, Orientation, SideOfLine};

/// Cap on the number of interior samples taken per water-segment check.
const MAX_WATER_SAMPLES: usize = 200;

#[derive(Error, Debug)]
pub enum PolygonError {
    #[error("{ring} is degenerate: requires at least 3 unique points")]
    TooFewVertices { ring: &'static str },
    #[error("{ring} is degenerate: points are collinear")]
    CollinearRing { ring: &'static str },
    #[error("{ring} contains a non-finite coordinate")]
    NonFiniteCoordinate { ring: &'static str },
}

type Result<T> = std::result::Result<T, PolygonError>;

/// A polygon on the WGS84 ellipsoid: outer boundary plus inner holes.
#[derive(Clone, Debug)]
pub struct Polygon {
    outer: Vec<GeoPoint>,
    holes: Vec<Vec<GeoPoint>>,
    envelope: (GeoPoint, GeoPoint),
    crosses_antimeridian: bool,
}

impl Polygon {
    pub fn new(outer: Vec<GeoPoint>, holes: Vec<Vec<GeoPoint>>) -> Result<Polygon> {
        let outer = prepare_ring(outer, "outer boundary", false)?;
        let holes = holes
            .into_iter()
            .map(|hole| prepare_ring(hole, "hole", true))
            .collect::<Result<Vec<_>>>()?;

        let mut polygon = Polygon {
            outer,
            holes,
            envelope: (GeoPoint::default(), GeoPoint::default()),
            crosses_antimeridian: false,
        };
        polygon.recompute_caches();
        Ok(polygon)
    }

    /// Replace the outer boundary, revalidating and refreshing the cached
    /// envelope and antimeridian flag.
    pub fn set_outer(&mut self, outer: Vec<GeoPoint>) -> Result<()> {
        self.outer = prepare_ring(outer, "outer boundary", false)?;
        self.recompute_caches();
        Ok(())
    }

    /// Replace the holes, revalidating and refreshing the caches.
    pub fn set_holes(&mut self, holes: Vec<Vec<GeoPoint>>) -> Result<()> {
        self.holes = holes
            .into_iter()
            .map(|hole| prepare_ring(hole, "hole", true))
            .collect::<Result<Vec<_>>>()?;
        self.recompute_caches();
        Ok(())
    }

    /// The closed outer ring (last vertex repeats the first).
    pub fn outer(&self) -> &[GeoPoint] {
        &self.outer
    }

    /// The closed inner rings.
    pub fn holes(&self) -> &[Vec<GeoPoint>] {
        &self.holes
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.crosses_antimeridian
    }

    /// Envelope over every ring vertex, as (min corner, max corner).
    pub fn bounding_box(&self) -> (GeoPoint, GeoPoint) {
        self.envelope
    }

    /// Geodesic area with hole areas subtracted.
    pub fn area(&self) -> SquareMeters<f64> {
        let (_, outer_area) = ring_perimeter_area(&self.outer);
        let mut area = outer_area.value().abs();
        for hole in &self.holes {
            let (_, hole_area) = ring_perimeter_area(hole);
            area -= hole_area.value().abs();
        }
        SquareMeters(area)
    }

    /// Geodesic perimeter of the outer ring only.
    pub fn perimeter(&self) -> Meters<f64> {
        let (perimeter, _) = ring_perimeter_area(&self.outer);
        perimeter
    }

    /// Every edge of the polygon: outer ring first, then hole rings.
    pub fn edges(&self) -> impl Iterator<Item = GeoSegment> + '_ {
        ring_edges(&self.outer).chain(self.holes.iter().flat_map(|h| ring_edges(h)))
    }

    /// Edges of the hole rings only.
    pub fn hole_edges(&self) -> impl Iterator<Item = GeoSegment> + '_ {
        self.holes.iter().flat_map(|h| ring_edges(h))
    }

    /// True when `point` is inside the outer ring and not inside any hole.
    /// Boundary points count as inside the ring they lie on, so a point on
    /// a hole edge is not considered navigable water.
    pub fn is_point_inside(&self, point: &GeoPoint) -> bool {
        let shift = self.crosses_antimeridian;
        for hole in &self.holes {
            if ring_contains(hole, point, shift) {
                return false;
            }
        }
        ring_contains(&self.outer, point, shift)
    }

    /// Whether `point` coincides with a vertex of any ring.
    pub fn rings_contain(&self, point: &GeoPoint) -> bool {
        self.outer.iter().any(|v| v.same_location(point))
            || self
                .holes
                .iter()
                .any(|hole| hole.iter().any(|v| v.same_location(point)))
    }

    /// Whether a segment lying in this polygon stays in open water.
    ///
    /// A segment is rejected if it crosses a hole boundary away from a
    /// vertex, or if any sampled interior point falls inside a hole.  The
    /// sampling density scales with the smallest hole so that narrow
    /// islands cannot slip between samples.
    pub fn is_valid_water_segment(&self, segment: &GeoSegment) -> bool {
        if self.holes.is_empty() {
            return true;
        }

        for edge in self.hole_edges() {
            if segment.intersects(&edge, true) {
                return false;
            }
        }

        let min_diameter = self.min_hole_diameter();
        if min_diameter.value() <= 0.0 {
            return true;
        }
        let samples = ((segment.length().value() / (0.1 * min_diameter.value())).ceil()
            as usize)
            .clamp(2, MAX_WATER_SAMPLES);
        for i in 1..samples {
            let t = i as f64 / samples as f64;
            let probe = segment
                .start()
                .destination(segment.length() * t, segment.forward_azimuth());
            for hole in &self.holes {
                if ring_contains(hole, &probe, self.crosses_antimeridian) {
                    return false;
                }
            }
        }
        true
    }

    /// Clear navigable width around a reference segment inside this
    /// polygon: the minimum boundary clearance to port plus the minimum to
    /// starboard.
    pub fn max_clear_width(&self, reference: &GeoSegment) -> Meters<f64> {
        let mut left = f64::INFINITY;
        let mut right = f64::INFINITY;

        let mut take_ring = |ring: &[GeoPoint]| {
            for edge in ring_edges(ring) {
                let d_start = edge.distance_to_point(&reference.start()).value();
                let d_end = edge.distance_to_point(&reference.end()).value();
                for (vertex, d) in [(edge.start(), d_start), (edge.end(), d_end)] {
                    match reference.side_of(&vertex) {
                        SideOfLine::Left => left = left.min(d),
                        SideOfLine::Right => right = right.min(d),
                        SideOfLine::On => {}
                    }
                }
            }
        };

        take_ring(&self.outer);
        for hole in &self.holes {
            take_ring(hole);
        }

        Meters(left + right)
    }

    fn min_hole_diameter(&self) -> Meters<f64> {
        let mut min = f64::INFINITY;
        for hole in &self.holes {
            let (lo, hi) = ring_envelope(hole);
            min = min.min(lo.distance(&hi).value());
        }
        Meters(min)
    }

    fn recompute_caches(&mut self) {
        let (mut lo, mut hi) = ring_envelope(&self.outer);
        for hole in &self.holes {
            let (hlo, hhi) = ring_envelope(hole);
            lo = GeoPoint::new(
                Degrees(lo.lon().value().min(hlo.lon().value())),
                Degrees(lo.lat().value().min(hlo.lat().value())),
            );
            hi = GeoPoint::new(
                Degrees(hi.lon().value().max(hhi.lon().value())),
                Degrees(hi.lat().value().max(hhi.lat().value())),
            );
        }
        self.envelope = (lo, hi);
        self.crosses_antimeridian = ring_edges(&self.outer).any(|e| e.crosses_antimeridian())
            || self
                .holes
                .iter()
                .any(|h| ring_edges(h).any(|e| e.crosses_antimeridian()));
    }
}

/// Close, validate, and orient one ring.  `clockwise` selects hole
/// orientation; outer rings are normalized counter-clockwise.
fn prepare_ring(mut ring: Vec<GeoPoint>, label: &'static str, clockwise: bool) -> Result<Vec<GeoPoint>> {
    if ring
        .iter()
        .any(|p| !p.lon().value().is_finite() || !p.lat().value().is_finite())
    {
        return Err(PolygonError::NonFiniteCoordinate { ring: label });
    }

    // Auto-close.
    match (ring.first().copied(), ring.last().copied()) {
        (Some(first), Some(last)) if !first.same_location(&last) => ring.push(first),
        _ => {}
    }

    let unique = ring.len().saturating_sub(1);
    if unique < 3 {
        return Err(PolygonError::TooFewVertices { ring: label });
    }
    if unique == 3
        && GeoSegment::orientation(&ring[0], &ring[1], &ring[2]) == Orientation::Collinear
    {
        return Err(PolygonError::CollinearRing { ring: label });
    }

    let ccw = ring_signed_area(&ring).value() > 0.0;
    if ccw == clockwise {
        ring.reverse();
    }
    Ok(ring)
}

fn ring_edges(ring: &[GeoPoint]) -> impl Iterator<Item = GeoSegment> + '_ {
    ring.windows(2).map(|w| GeoSegment::new(w[0], w[1]))
}

fn ring_envelope(ring: &[GeoPoint]) -> (GeoPoint, GeoPoint) {
    let mut min_lon = f64::MAX;
    let mut min_lat = f64::MAX;
    let mut max_lon = f64::MIN;
    let mut max_lat = f64::MIN;
    for p in ring {
        min_lon = min_lon.min(p.lon().value());
        min_lat = min_lat.min(p.lat().value());
        max_lon = max_lon.max(p.lon().value());
        max_lat = max_lat.max(p.lat().value());
    }
    (
        GeoPoint::new(Degrees(min_lon), Degrees(min_lat)),
        GeoPoint::new(Degrees(max_lon), Degrees(max_lat)),
    )
}

/// Ray-cast point-in-ring test on longitude/latitude coordinates.
///
/// Boundary vertices are accepted up front.  When `shift` is set the ring
/// spans the antimeridian; all longitudes move into [0, 360) so the cast
/// never sees the wrap.
fn ring_contains(ring: &[GeoPoint], point: &GeoPoint, shift: bool) -> bool {
    if ring.iter().any(|v| v.same_location(point)) {
        return true;
    }

    let adjust = |lon: f64| if shift && lon < 0.0 { lon + 360.0 } else { lon };
    let px = adjust(point.lon().value());
    let py = point.lat().value();

    let mut inside = false;
    for w in ring.windows(2) {
        let x1 = adjust(w[0].lon().value());
        let y1 = w[0].lat().value();
        let x2 = adjust(w[1].lon().value());
        let y2 = w[1].lat().value();

        if (y1 > py) != (y2 > py) {
            let x_cross = x1 + (py - y1) / (y2 - y1) * (x2 - x1);
            if px < x_cross {
                inside = !inside;
            } else if (px - x_cross).abs() < 1e-12 {
                // On the edge itself.
                return true;
            }
        }
    }
    inside
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::Polygon;
    use crate::geo_point;
    use crate::measure::UnitOfMeasure;
    use crate::segment::GeoSegment;

    /// Water rectangle over the mid-Atlantic coast with one rectangular
    /// island hole.
    fn water_with_island() -> Polygon {
        let outer = vec![
            geo_point!(-76.0, 39.0),
            geo_point!(-72.0, 39.0),
            geo_point!(-72.0, 42.0),
            geo_point!(-76.0, 42.0),
        ];
        let hole = vec![
            geo_point!(-74.8, 40.3),
            geo_point!(-74.8, 40.7),
            geo_point!(-74.2, 40.7),
            geo_point!(-74.2, 40.3),
        ];
        Polygon::new(outer, vec![hole]).unwrap()
    }

    #[test]
    fn rings_closed_and_oriented() {
        let p = water_with_island();
        assert_eq!(p.outer().first().copied(), p.outer().last().copied());
        // Outer normalized CCW, hole CW.
        assert!(crate::geodesic::ring_signed_area(p.outer()).value() > 0.0);
        assert!(crate::geodesic::ring_signed_area(&p.holes()[0]).value() < 0.0);
    }

    #[test]
    fn point_in_polygon_with_hole() {
        let p = water_with_island();
        assert!(p.is_point_inside(&geo_point!(-74.0, 40.5)));
        assert!(!p.is_point_inside(&geo_point!(-74.5, 40.5))); // inside hole
        assert!(!p.is_point_inside(&geo_point!(-77.0, 40.0))); // outside
    }

    #[test]
    fn area_subtracts_holes() {
        let p = water_with_island();
        let outer_only = Polygon::new(p.outer().to_vec(), vec![]).unwrap();
        assert!(p.area().value() < outer_only.area().value());
        assert!(p.area().value() > 0.0);
    }

    #[test]
    fn perimeter_is_outer_only() {
        let p = water_with_island();
        let outer_only = Polygon::new(p.outer().to_vec(), vec![]).unwrap();
        assert_relative_eq!(
            p.perimeter().value(),
            outer_only.perimeter().value(),
            max_relative = 1e-12
        );
    }

    #[test]
    fn degenerate_rings_rejected() {
        assert!(Polygon::new(vec![geo_point!(0.0, 0.0), geo_point!(1.0, 0.0)], vec![]).is_err());
        let collinear = vec![
            geo_point!(0.0, 0.0),
            geo_point!(1.0, 0.0),
            geo_point!(2.0, 0.0),
        ];
        assert!(Polygon::new(collinear, vec![]).is_err());
        let nan = vec![
            geo_point!(0.0, f64::NAN),
            geo_point!(1.0, 0.0),
            geo_point!(1.0, 1.0),
        ];
        assert!(Polygon::new(nan, vec![]).is_err());
    }

    #[test]
    fn rings_contain_vertices() {
        let p = water_with_island();
        for v in p.outer() {
            assert!(p.rings_contain(v));
        }
        for v in &p.holes()[0] {
            assert!(p.rings_contain(v));
        }
        assert!(!p.rings_contain(&geo_point!(-74.0, 40.5)));
    }

    #[test]
    fn water_segment_through_hole_rejected() {
        let p = water_with_island();
        let through = GeoSegment::new(geo_point!(-75.0, 39.2), geo_point!(-73.0, 41.0));
        assert!(!p.is_valid_water_segment(&through));
        let clear = GeoSegment::new(geo_point!(-75.5, 39.5), geo_point!(-75.0, 39.2));
        assert!(p.is_valid_water_segment(&clear));
    }

    #[test]
    fn clear_width_bounded_by_boundaries() {
        let p = water_with_island();
        // A short east-west segment in open water south of the island.
        let reference = GeoSegment::new(geo_point!(-75.0, 39.5), geo_point!(-74.5, 39.5));
        let width = p.max_clear_width(&reference).value();
        assert!(width.is_finite());
        assert!(width > 0.0);
    }

    #[test]
    fn envelope_covers_rings() {
        let p = water_with_island();
        let (lo, hi) = p.bounding_box();
        assert_relative_eq!(lo.lon().value(), -76.0);
        assert_relative_eq!(lo.lat().value(), 39.0);
        assert_relative_eq!(hi.lon().value(), -72.0);
        assert_relative_eq!(hi.lat().value(), 42.0);
    }

    #[test]
    fn antimeridian_flag() {
        let p = water_with_island();
        assert!(!p.crosses_antimeridian());
        let wrapping = Polygon::new(
            vec![
                geo_point!(179.0, 10.0),
                geo_point!(-179.0, 10.0),
                geo_point!(-179.0, 12.0),
                geo_point!(179.0, 12.0),
            ],
            vec![],
        )
        .unwrap();
        assert!(wrapping.crosses_antimeridian());
    }
}
