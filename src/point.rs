//! Geodetic points on the WGS84 ellipsoid
//!
//! [`GeoPoint`] is a plain value type: two angular coordinates plus an
//! optional port dwell time.  Graph structures never share points by
//! reference; vertices are deduplicated through [`VertexKey`], coordinates
//! quantized to the point-equality tolerance grid.

use std::fmt::{Display, Formatter};

use crate::geodesic::{geodesic_direct, geodesic_inverse};
use crate::measure::{Degrees, Meters, Seconds, UnitOfMeasure};

/// Two points closer than this are considered the same location.
pub const POINT_TOLERANCE: Meters<f64> = Meters(0.1);

/// Quantization step for [`VertexKey`], roughly [`POINT_TOLERANCE`] of
/// longitude at the equator.
const KEY_GRID_DEGREES: f64 = 1e-6;

/// A point on the surface of the WGS84 ellipsoid.
///
/// Longitude is normalized into (-180, 180] on assignment, except that an
/// exact -180 is preserved: the antimeridian split logic distinguishes the
/// two edges of the map.  Latitude is clamped to [-90, 90].
#[derive(Clone, Copy, Debug, Default)]
pub struct GeoPoint {
    lon: Degrees<f64>,
    lat: Degrees<f64>,
    dwell: Option<Seconds<f64>>,
}

impl GeoPoint {
    pub fn new(lon: Degrees<f64>, lat: Degrees<f64>) -> GeoPoint {
        GeoPoint {
            lon: Degrees(normalize_longitude(lon.value())),
            lat: Degrees(lat.value().clamp(-90.0, 90.0)),
            dwell: None,
        }
    }

    /// Get point longitude
    pub fn lon(&self) -> Degrees<f64> {
        self.lon
    }

    /// Get point latitude
    pub fn lat(&self) -> Degrees<f64> {
        self.lat
    }

    pub fn set_longitude(&mut self, lon: Degrees<f64>) {
        self.lon = Degrees(normalize_longitude(lon.value()));
    }

    pub fn set_latitude(&mut self, lat: Degrees<f64>) {
        self.lat = Degrees(lat.value().clamp(-90.0, 90.0));
    }

    /// Geodesic distance to another point, in meters.
    pub fn distance(&self, other: &GeoPoint) -> Meters<f64> {
        geodesic_inverse(self, other).geo_distance
    }

    /// Bearing from this point toward `other`, clockwise from north in
    /// [0, 360).
    pub fn forward_azimuth(&self, other: &GeoPoint) -> Degrees<f64> {
        geodesic_inverse(self, other).azimuth1
    }

    /// Bearing at `other` looking back along the geodesic toward this
    /// point, in [0, 360).
    pub fn backward_azimuth(&self, other: &GeoPoint) -> Degrees<f64> {
        let azi2 = geodesic_inverse(self, other).azimuth2;
        Degrees((azi2.value() + 180.0) % 360.0)
    }

    /// The point reached by travelling `distance` along `heading`.
    pub fn destination(&self, distance: Meters<f64>, heading: Degrees<f64>) -> GeoPoint {
        geodesic_direct(self, heading, distance).point2
    }

    /// Geodesic midpoint between this point and `end`.
    pub fn midpoint_with(&self, end: &GeoPoint) -> GeoPoint {
        let inverse = geodesic_inverse(self, end);
        geodesic_direct(self, inverse.azimuth1, inverse.geo_distance / 2.0).point2
    }

    pub fn is_port(&self) -> bool {
        self.dwell.is_some()
    }

    /// Dwell time if the point is a port.
    pub fn dwell_time(&self) -> Option<Seconds<f64>> {
        self.dwell
    }

    pub fn mark_as_port(&mut self, dwell: Seconds<f64>) {
        self.dwell = Some(dwell);
    }

    pub fn mark_as_non_port(&mut self) {
        self.dwell = None;
    }

    /// Coordinate identity on the quantized tolerance grid, for use as a
    /// hash-map key.  Consistent with [`GeoPoint::same_location`] up to
    /// grid boundaries.
    pub fn key(&self) -> VertexKey {
        VertexKey {
            lon_q: (self.lon.value() / KEY_GRID_DEGREES).round() as i64,
            lat_q: (self.lat.value() / KEY_GRID_DEGREES).round() as i64,
        }
    }

    /// Whether `other` is within [`POINT_TOLERANCE`] of this point.
    ///
    /// A cheap coordinate-delta bound rejects distant pairs before paying
    /// for a geodesic inverse.
    pub fn same_location(&self, other: &GeoPoint) -> bool {
        let dlat = (self.lat.value() - other.lat.value()).abs();
        let mut dlon = (self.lon.value() - other.lon.value()).abs();
        if dlon > 180.0 {
            dlon = 360.0 - dlon;
        }
        // One degree of latitude is at least ~110.5 km, so 5e-5 deg is a
        // safe lower bound of several meters.
        let dlon_scaled = dlon * self.lat.to_radians().cos().abs();
        if dlat.max(dlon_scaled) > 5e-5 {
            return false;
        }
        self.distance(other) < POINT_TOLERANCE
    }
}

impl PartialEq for GeoPoint {
    fn eq(&self, other: &Self) -> bool {
        self.same_location(other)
    }
}

impl Display for GeoPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.5}, {:.5})", self.lon.value(), self.lat.value())
    }
}

/// Hashable vertex identity: coordinates quantized to the point-equality
/// tolerance grid.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct VertexKey {
    lon_q: i64,
    lat_q: i64,
}

/// An unordered pair of vertex identities, for caches keyed on segments
/// regardless of direction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct VertexPairKey(VertexKey, VertexKey);

impl VertexPairKey {
    pub fn new(a: VertexKey, b: VertexKey) -> Self {
        if (a.lon_q, a.lat_q) <= (b.lon_q, b.lat_q) {
            VertexPairKey(a, b)
        } else {
            VertexPairKey(b, a)
        }
    }
}

fn normalize_longitude(lon: f64) -> f64 {
    if (-180.0..=180.0).contains(&lon) {
        return lon;
    }
    let wrapped = ((lon % 360.0) + 540.0) % 360.0 - 180.0;
    if wrapped == -180.0 { 180.0 } else { wrapped }
}

/// Instantiate a `GeoPoint` with a tuple-like `(lon, lat)` syntax.
#[macro_export]
macro_rules! geo_point {
    ( $lon:expr, $lat:expr ) => {
        $crate::point::GeoPoint::new(
            $crate::measure::Degrees($lon),
            $crate::measure::Degrees($lat),
        )
    };
}
