//! Dubins-style path smoothing
//!
//! Replaces sharp corners in a planned route with circular arcs tangent to
//! the incoming and outgoing legs, respecting the ship's minimum turning
//! radius.  Corners at ports are never smoothed (ships stop there); when a
//! leg is too short for the configured radius, the radius shrinks toward a
//! floor before the corner is given up on.

use tracing::debug;

use crate::measure::{Degrees, Meters, UnitOfMeasure};
use crate::planner::PlannerResult;
use crate::point::GeoPoint;
use crate::segment::GeoSegment;

/// Configuration for arc replacement at corner waypoints.
#[derive(Clone, Copy, Debug)]
pub struct SmoothingConfig {
    /// The ship's turning radius.
    pub turning_radius: Meters<f64>,

    /// Spacing of generated waypoints along each arc.
    pub arc_step: Meters<f64>,

    /// Corners turning less than this are kept sharp.
    pub min_turn_angle: Degrees<f64>,

    /// Shrink the radius when a leg is too short for the full arc.
    pub allow_radius_reduction: bool,

    /// Floor for radius reduction; below it the corner is kept.
    pub min_radius: Meters<f64>,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        SmoothingConfig {
            turning_radius: Meters(100.0),
            arc_step: Meters(5.0),
            min_turn_angle: Degrees(5.0),
            allow_radius_reduction: true,
            min_radius: Meters(50.0),
        }
    }
}

pub struct PathSmoother;

impl PathSmoother {
    /// Smooth every eligible interior corner of a route.
    pub fn smooth_path(path: &PlannerResult, config: &SmoothingConfig) -> PlannerResult {
        if path.points.len() < 3 {
            return path.clone();
        }

        let mut smoothed = vec![path.points[0]];
        for i in 1..path.points.len() - 1 {
            let prev = &path.points[i - 1];
            let corner = &path.points[i];
            let next = &path.points[i + 1];

            if corner.is_port() {
                smoothed.push(*corner);
                continue;
            }

            let turn = turn_angle(prev, corner, next);
            if turn.value().abs() < config.min_turn_angle.value() {
                smoothed.push(*corner);
                continue;
            }

            match smooth_corner(prev, corner, next, config) {
                Some(arc) => smoothed.extend(arc),
                None => smoothed.push(*corner),
            }
        }
        smoothed.push(*path.points.last().expect("nonempty path"));

        let segments = smoothed
            .windows(2)
            .map(|w| GeoSegment::new(w[0], w[1]))
            .collect();
        PlannerResult {
            points: smoothed,
            segments,
        }
    }
}

/// Arc waypoints replacing one corner, tangent points included, or `None`
/// when the corner must stay sharp.
fn smooth_corner(
    prev: &GeoPoint,
    corner: &GeoPoint,
    next: &GeoPoint,
    config: &SmoothingConfig,
) -> Option<Vec<GeoPoint>> {
    let turn = turn_angle(prev, corner, next).value();
    let abs_turn = turn.abs();
    let turn_left = turn > 0.0;

    let incoming = prev.forward_azimuth(corner);
    let outgoing = corner.forward_azimuth(next);

    let tan_half_turn = (abs_turn / 2.0).to_radians().tan();
    if tan_half_turn > 100.0 {
        debug!("turn angle too sharp for an arc; keeping corner");
        return None;
    }

    let mut radius = config.turning_radius;
    let mut tangent_distance = radius * tan_half_turn;

    let dist_to_prev = corner.distance(prev);
    let dist_to_next = corner.distance(next);
    if tangent_distance > dist_to_prev || tangent_distance > dist_to_next {
        if !config.allow_radius_reduction {
            return None;
        }
        // Shrink to 90% of what fits, keeping a margin off the legs.
        let available = dist_to_prev.value().min(dist_to_next.value());
        radius = Meters(available * 0.9 / tan_half_turn);
        if radius < config.min_radius {
            debug!(
                required = radius.value(),
                floor = config.min_radius.value(),
                "reduced radius below floor; keeping corner"
            );
            return None;
        }
        tangent_distance = radius * tan_half_turn;
    }

    let tangent_in = corner.destination(tangent_distance, corner.forward_azimuth(prev));
    let tangent_out = corner.destination(tangent_distance, corner.forward_azimuth(next));

    let center = arc_center(corner, incoming, outgoing, radius, turn_left);
    let start_angle = center.forward_azimuth(&tangent_in);
    let end_angle = center.forward_azimuth(&tangent_out);

    // Left turns sweep counter-clockwise around the center.
    Some(arc_points(
        &center,
        radius,
        start_angle,
        end_angle,
        config.arc_step,
        !turn_left,
    ))
}

/// Signed heading change at a corner, in (-180, 180]; positive turns
/// port (left), negative starboard.
fn turn_angle(prev: &GeoPoint, corner: &GeoPoint, next: &GeoPoint) -> Degrees<f64> {
    let incoming = prev.forward_azimuth(corner).value();
    let outgoing = corner.forward_azimuth(next).value();
    Degrees(normalize_signed(outgoing - incoming))
}

/// Center of the tangent arc: along the turn bisector, offset 90°, at
/// distance R / cos(|δ|/2) from the corner.
fn arc_center(
    corner: &GeoPoint,
    incoming: Degrees<f64>,
    outgoing: Degrees<f64>,
    radius: Meters<f64>,
    turn_left: bool,
) -> GeoPoint {
    let diff = normalize_signed(outgoing.value() - incoming.value());
    let bisector = incoming.value() + diff / 2.0;
    let center_angle = if turn_left {
        bisector - 90.0
    } else {
        bisector + 90.0
    };

    let cos_half = ((diff.abs() / 2.0).to_radians().cos()).max(0.01);
    let center_distance = radius / cos_half;
    corner.destination(center_distance, Degrees(normalize_360(center_angle)))
}

/// Discretize an arc from `start_angle` to `end_angle` around `center`.
fn arc_points(
    center: &GeoPoint,
    radius: Meters<f64>,
    start_angle: Degrees<f64>,
    end_angle: Degrees<f64>,
    step: Meters<f64>,
    clockwise: bool,
) -> Vec<GeoPoint> {
    let start = normalize_360(start_angle.value());
    let end = normalize_360(end_angle.value());

    let mut sweep = if clockwise { start - end } else { end - start };
    if sweep < 0.0 {
        sweep += 360.0;
    }
    // A near-identical pair of angles can read as a full circle.
    if sweep > 359.0 && (start - end).abs() < 1.0 {
        sweep = (start - end).abs();
    }

    let arc_length = radius.value() * sweep.to_radians();
    let count = ((arc_length / step.value()).ceil() as usize).max(3);

    let mut points = Vec::with_capacity(count + 1);
    for i in 0..=count {
        let fraction = i as f64 / count as f64;
        let angle = if clockwise {
            start_angle.value() - fraction * sweep
        } else {
            start_angle.value() + fraction * sweep
        };
        points.push(center.destination(radius, Degrees(normalize_360(angle))));
    }
    points
}

fn normalize_signed(mut degrees: f64) -> f64 {
    degrees %= 360.0;
    if degrees > 180.0 {
        degrees -= 360.0;
    } else if degrees <= -180.0 {
        degrees += 360.0;
    }
    degrees
}

fn normalize_360(degrees: f64) -> f64 {
    degrees.rem_euclid(360.0)
}
