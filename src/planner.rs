//! Route planning over the hierarchy
//!
//! The planner snaps query endpoints to water, runs A* on the coarsest
//! level, then refines the result through geographic corridors down to
//! full resolution.  "No path" and "cancelled" are expected outcomes and
//! come back as an empty [`PlannerResult`], never as an error.

use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::corridor::Corridor;
use crate::hierarchy::Hierarchy;
use crate::measure::{Meters, UnitOfMeasure};
use crate::point::GeoPoint;
use crate::quadtree::Quadtree;
use crate::segment::GeoSegment;
use crate::smoother::{PathSmoother, SmoothingConfig};

/// Latitudes above this disable wrap-around reasoning.
const WRAP_POLE_THRESHOLD: f64 = 89.9;

/// How close to the map's east/west edge a vertex must be, in degrees, to
/// act as a wrap-around portal.
const WRAP_EDGE_DEGREES: f64 = 1.0;

/// Virtual A* node ids for the query endpoints.
const START_NODE: usize = usize::MAX;
const GOAL_NODE: usize = usize::MAX - 1;

/// Emitted after each leg of a multi-waypoint query.
#[derive(Clone, Copy, Debug)]
pub struct ProgressEvent {
    pub leg_index: usize,
    pub total_legs: usize,
    pub elapsed_seconds: f64,
}

/// Cooperative cancellation, optionally driven by a deadline.  Polled at
/// every A* pop; a fired token makes the query return an empty result.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    /// A token that fires on its own after `timeout`.
    pub fn with_deadline(timeout: Duration) -> CancelToken {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// An ordered route: waypoints plus the segments connecting them.
#[derive(Clone, Debug, Default)]
pub struct PlannerResult {
    pub points: Vec<GeoPoint>,
    pub segments: Vec<GeoSegment>,
}

impl PlannerResult {
    pub fn empty() -> PlannerResult {
        PlannerResult::default()
    }

    /// Valid routes have at least two points and exactly one fewer
    /// segment than points.  Anything else means "no path".
    pub fn is_valid(&self) -> bool {
        self.points.len() >= 2
            && !self.segments.is_empty()
            && self.segments.len() == self.points.len() - 1
    }

    pub fn total_length(&self) -> Meters<f64> {
        Meters(self.segments.iter().map(|s| s.length().value()).sum())
    }

    /// Connect an ordered point list with segments, reusing indexed
    /// polygon edges from `quadtree` where the path follows a coastline.
    pub fn from_points(points: Vec<GeoPoint>, quadtree: &Quadtree) -> PlannerResult {
        let segments = points
            .windows(2)
            .map(|w| match quadtree.find_segment(&w[0], &w[1]) {
                Some(stored) if stored.start().same_location(&w[0]) => stored,
                Some(stored) => stored.reversed(),
                None => GeoSegment::new(w[0], w[1]),
            })
            .collect();
        PlannerResult { points, segments }
    }
}

/// Hierarchical A* route planner borrowing an immutable [`Hierarchy`].
pub struct Planner<'a> {
    hierarchy: &'a Hierarchy,
}

impl<'a> Planner<'a> {
    pub fn new(hierarchy: &'a Hierarchy) -> Planner<'a> {
        Planner { hierarchy }
    }

    /// Shortest navigable route from `start` to `goal`.
    pub fn find_path(
        &self,
        start: &GeoPoint,
        goal: &GeoPoint,
        cancel: &CancelToken,
    ) -> PlannerResult {
        let began = Instant::now();
        let wrap_links = self.install_wrap_links(start, goal);
        let result = self.plan_leg(start, goal, cancel);
        for link in &wrap_links {
            self.hierarchy.oracle().remove_manual_edge(link);
        }
        debug!(
            valid = result.is_valid(),
            points = result.points.len(),
            elapsed = began.elapsed().as_secs_f64(),
            "path query finished"
        );
        result
    }

    /// [`Planner::find_path`] followed by turn smoothing.
    pub fn find_path_smoothed(
        &self,
        start: &GeoPoint,
        goal: &GeoPoint,
        config: &SmoothingConfig,
        cancel: &CancelToken,
    ) -> PlannerResult {
        let raw = self.find_path(start, goal, cancel);
        if !raw.is_valid() {
            return raw;
        }
        PathSmoother::smooth_path(&raw, config)
    }

    /// Plan through every waypoint in order, concatenating the legs and
    /// reporting progress after each.
    pub fn find_path_via(
        &self,
        waypoints: &[GeoPoint],
        cancel: &CancelToken,
        mut on_progress: impl FnMut(ProgressEvent),
    ) -> PlannerResult {
        let mut combined = PlannerResult::empty();
        if waypoints.len() < 2 {
            if let Some(only) = waypoints.first() {
                combined.points.push(*only);
            }
            return combined;
        }

        let began = Instant::now();
        let total_legs = waypoints.len() - 1;
        for leg_index in 0..total_legs {
            if cancel.is_cancelled() {
                return PlannerResult::empty();
            }
            let leg = self.find_path(&waypoints[leg_index], &waypoints[leg_index + 1], cancel);
            if !leg.is_valid() {
                info!(leg = leg_index, "leg has no route; abandoning query");
                return PlannerResult::empty();
            }

            if combined.points.is_empty() {
                combined.points.extend_from_slice(&leg.points);
                combined.segments.extend_from_slice(&leg.segments);
            } else {
                let junction = *combined.points.last().expect("nonempty");
                if junction.same_location(&leg.points[0]) {
                    // Drop the duplicated junction vertex.
                    combined.points.extend_from_slice(&leg.points[1..]);
                } else {
                    combined
                        .segments
                        .push(GeoSegment::new(junction, leg.points[0]));
                    combined.points.extend_from_slice(&leg.points);
                }
                combined.segments.extend_from_slice(&leg.segments);
            }

            on_progress(ProgressEvent {
                leg_index,
                total_legs,
                elapsed_seconds: began.elapsed().as_secs_f64(),
            });
        }
        combined
    }

    /// Relocate an endpoint outside navigable water onto the nearest
    /// polygon vertex.  Returns the effective point and whether snapping
    /// happened; `None` when no vertex exists at all.
    pub fn snap_to_water(&self, point: &GeoPoint) -> Option<(GeoPoint, bool)> {
        let level = self.hierarchy.level(0);
        if level.is_water(point) {
            return Some((*point, false));
        }
        level.quadtree().nearest_vertex(point).map(|v| (v, true))
    }

    fn plan_leg(&self, start: &GeoPoint, goal: &GeoPoint, cancel: &CancelToken) -> PlannerResult {
        let Some((effective_start, start_snapped)) = self.snap_to_water(start) else {
            return PlannerResult::empty();
        };
        let Some((effective_goal, goal_snapped)) = self.snap_to_water(goal) else {
            return PlannerResult::empty();
        };

        let mut result = self.hierarchical_search(&effective_start, &effective_goal, cancel);
        if !result.is_valid() {
            return result;
        }

        // Re-attach the original endpoints where the connection is clear.
        if start_snapped && self.hierarchy.is_visible(start, &effective_start, 0) {
            result.points.insert(0, *start);
            result
                .segments
                .insert(0, GeoSegment::new(*start, effective_start));
        }
        if goal_snapped && self.hierarchy.is_visible(&effective_goal, goal, 0) {
            result
                .segments
                .push(GeoSegment::new(effective_goal, *goal));
            result.points.push(*goal);
        }
        result
    }

    /// Coarse-to-fine search: A* at level 3, then corridor-restricted
    /// refinement at 2, 1, and 0.  No route at the coarsest level means
    /// no route at all; a failed refinement step falls back once to
    /// direct A* at level 0.
    fn hierarchical_search(
        &self,
        start: &GeoPoint,
        goal: &GeoPoint,
        cancel: &CancelToken,
    ) -> PlannerResult {
        let coarse = self.a_star_at_level(start, goal, 3, None, cancel);
        if cancel.is_cancelled() {
            return PlannerResult::empty();
        }
        if !coarse.is_valid() {
            debug!("no route at the coarsest level");
            return PlannerResult::empty();
        }

        let mut current = coarse;
        for target in (0..3).rev() {
            let level = self.hierarchy.level(target);
            let mut corridor = Corridor::around_path(&current.points, level);
            corridor.precompute_adjacency(level, self.hierarchy.oracle(), start, goal);
            let refined = self.a_star_at_level(start, goal, target, Some(&corridor), cancel);
            if cancel.is_cancelled() {
                return PlannerResult::empty();
            }
            if !refined.is_valid() {
                debug!(level = target, "corridor refinement failed; falling back");
                return self.a_star_at_level(start, goal, 0, None, cancel);
            }
            current = refined;
        }
        current
    }

    /// A* over one level's visibility graph, optionally restricted to a
    /// corridor.  Deterministic: ties on f break toward lower g, then
    /// lower vertex id.
    fn a_star_at_level(
        &self,
        start: &GeoPoint,
        goal: &GeoPoint,
        level_index: usize,
        corridor: Option<&Corridor>,
        cancel: &CancelToken,
    ) -> PlannerResult {
        let level = self.hierarchy.level(level_index);
        let quadtree = level.quadtree();

        if self.hierarchy.is_visible(start, goal, level_index) {
            return PlannerResult::from_points(vec![*start, *goal], quadtree);
        }

        let node_point = |id: usize| -> GeoPoint {
            match id {
                START_NODE => *start,
                GOAL_NODE => *goal,
                _ => level.vertices()[id],
            }
        };

        let manual_ids = |point: &GeoPoint| -> Vec<usize> {
            self.hierarchy
                .oracle()
                .manual_neighbors(point)
                .iter()
                .filter_map(|p| level.vertex_id(p))
                .collect()
        };

        let start_links: Vec<usize> = match corridor {
            Some(c) => {
                let mut links = c.start_links().to_vec();
                links.extend(manual_ids(start));
                links
            }
            None => {
                let mut links = self.visible_vertex_ids(start, level_index, None);
                links.extend(manual_ids(start));
                links
            }
        };

        let goal_sees = |id: usize| -> bool {
            match corridor {
                Some(c) => c.goal_links().contains(&id),
                None => self.hierarchy.is_visible(&node_point(id), goal, level_index),
            }
        };

        #[derive(PartialEq)]
        struct SearchState {
            f: f64,
            g: f64,
            id: usize,
        }
        impl Eq for SearchState {}
        impl PartialOrd for SearchState {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }
        impl Ord for SearchState {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                other
                    .f
                    .total_cmp(&self.f)
                    .then_with(|| other.g.total_cmp(&self.g))
                    .then_with(|| other.id.cmp(&self.id))
            }
        }

        let mut g_score: HashMap<usize, f64> = HashMap::new();
        let mut came_from: HashMap<usize, usize> = HashMap::new();
        let mut open = BinaryHeap::new();

        let h_start = start.distance(goal).value();
        g_score.insert(START_NODE, 0.0);
        open.push(SearchState {
            f: h_start,
            g: 0.0,
            id: START_NODE,
        });

        while let Some(SearchState { g, id, .. }) = open.pop() {
            if cancel.is_cancelled() {
                return PlannerResult::empty();
            }
            // Stale entry from a later improvement.
            if g > g_score.get(&id).copied().unwrap_or(f64::INFINITY) {
                continue;
            }
            if id == GOAL_NODE {
                return self.reconstruct(&came_from, start, goal, level_index);
            }

            let here = node_point(id);
            let mut neighbors: Vec<usize> = match id {
                START_NODE => start_links.clone(),
                _ => match corridor {
                    Some(c) => {
                        let mut n = c.neighbors(id).to_vec();
                        n.extend(manual_ids(&here));
                        n
                    }
                    None => {
                        let mut n = if level.has_adjacency() {
                            level.adjacency()[id].to_vec()
                        } else {
                            level.neighbors_for_vertex(id, self.hierarchy.oracle())
                        };
                        n.extend(manual_ids(&here));
                        n
                    }
                },
            };
            neighbors.sort_unstable();
            neighbors.dedup();

            if id != START_NODE && goal_sees(id) {
                neighbors.push(GOAL_NODE);
            }

            for neighbor in neighbors {
                let there = node_point(neighbor);
                let tentative = g + here.distance(&there).value();
                if tentative < g_score.get(&neighbor).copied().unwrap_or(f64::INFINITY) {
                    g_score.insert(neighbor, tentative);
                    came_from.insert(neighbor, id);
                    open.push(SearchState {
                        f: tentative + there.distance(goal).value(),
                        g: tentative,
                        id: neighbor,
                    });
                }
            }
        }

        PlannerResult::empty()
    }

    fn reconstruct(
        &self,
        came_from: &HashMap<usize, usize>,
        start: &GeoPoint,
        goal: &GeoPoint,
        level_index: usize,
    ) -> PlannerResult {
        let level = self.hierarchy.level(level_index);
        let mut ids = vec![GOAL_NODE];
        let mut current = GOAL_NODE;
        while let Some(&previous) = came_from.get(&current) {
            ids.push(previous);
            current = previous;
        }
        ids.reverse();

        let mut points: Vec<GeoPoint> = Vec::with_capacity(ids.len());
        for id in ids {
            let point = match id {
                START_NODE => *start,
                GOAL_NODE => *goal,
                _ => level.vertices()[id],
            };
            if points.last().is_none_or(|last| !last.same_location(&point)) {
                points.push(point);
            }
        }
        PlannerResult::from_points(points, level.quadtree())
    }

    /// Vertices visible from an arbitrary point at a level: the
    /// containing polygon's vertices when the point is in water,
    /// otherwise every vertex of the level, optionally restricted to a
    /// corridor.
    pub(crate) fn visible_vertex_ids(
        &self,
        point: &GeoPoint,
        level_index: usize,
        corridor: Option<&Corridor>,
    ) -> Vec<usize> {
        let level = self.hierarchy.level(level_index);
        let candidates: Vec<usize> = match level.containing_polygon(point) {
            Some(polygon_id) => (0..level.vertices().len())
                .filter(|&id| level.polygon_of_vertex(id) == polygon_id)
                .collect(),
            None => (0..level.vertices().len()).collect(),
        };
        candidates
            .into_iter()
            .filter(|&id| corridor.is_none_or(|c| c.contains_vertex(id)))
            .filter(|&id| {
                let vertex = level.vertices()[id];
                !vertex.same_location(point)
                    && self.hierarchy.is_visible(point, &vertex, level_index)
            })
            .collect()
    }

    /// When the shortest route plausibly wraps the antimeridian, link the
    /// endpoints to the vertices hugging the opposite map edge with
    /// query-scoped manual edges.  Returns the installed edges so the
    /// caller can remove them afterwards.
    fn install_wrap_links(&self, start: &GeoPoint, goal: &GeoPoint) -> Vec<GeoSegment> {
        if !should_cross_antimeridian(start, goal) {
            return Vec::new();
        }

        let level = self.hierarchy.level(0);
        let (map_lo, map_hi) = self.hierarchy.map_bounds();
        let mut installed = Vec::new();

        for point in [start, goal] {
            let eastbound = point.lon().value() >= 0.0;
            for vertex in level.vertices() {
                let near_west = vertex.lon().value() - map_lo.lon().value() < WRAP_EDGE_DEGREES;
                let near_east = map_hi.lon().value() - vertex.lon().value() < WRAP_EDGE_DEGREES;
                let portal = if eastbound { near_west } else { near_east };
                if portal && self.hierarchy.is_visible(point, vertex, 0) {
                    let link = GeoSegment::new(*point, *vertex);
                    self.hierarchy.oracle().add_manual_edge(link);
                    installed.push(link);
                }
            }
        }
        debug!(links = installed.len(), "wrap-around portals installed");
        installed
    }
}

/// Heuristic for a route that should wrap the ±180° meridian: endpoints
/// in opposite hemispheres, more than half the globe apart in raw
/// longitude, and away from the poles.
pub fn should_cross_antimeridian(start: &GeoPoint, goal: &GeoPoint) -> bool {
    let s = start.lon().value();
    let g = goal.lon().value();
    s.signum() != g.signum()
        && s.abs() + g.abs() > 180.0
        && start.lat().value().abs() < WRAP_POLE_THRESHOLD
        && goal.lat().value().abs() < WRAP_POLE_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::{CancelToken, Planner, PlannerResult, should_cross_antimeridian};
    use crate::geo_point;
    use crate::hierarchy::Hierarchy;
    use crate::measure::UnitOfMeasure;
    use crate::polygon::Polygon;

    fn water_with_island() -> Vec<Polygon> {
        vec![
            Polygon::new(
                vec![
                    geo_point!(-76.0, 39.0),
                    geo_point!(-72.0, 39.0),
                    geo_point!(-72.0, 42.0),
                    geo_point!(-76.0, 42.0),
                ],
                vec![vec![
                    geo_point!(-74.8, 40.3),
                    geo_point!(-74.8, 40.7),
                    geo_point!(-74.2, 40.7),
                    geo_point!(-74.2, 40.3),
                ]],
            )
            .unwrap(),
        ]
    }

    #[test]
    fn direct_route_in_open_water() {
        let hierarchy = Hierarchy::new(water_with_island());
        let result = hierarchy.find_path(&geo_point!(-75.5, 39.5), &geo_point!(-75.0, 39.2));
        assert!(result.is_valid());
        assert_eq!(result.points.len(), 2);
    }

    #[test]
    fn route_detours_around_island() {
        let hierarchy = Hierarchy::new(water_with_island());
        let start = geo_point!(-75.5, 39.5);
        let goal = geo_point!(-73.5, 41.5);
        let result = hierarchy.find_path(&start, &goal);
        assert!(result.is_valid());
        assert!(result.points.len() >= 3, "must route around the island");
        let direct = start.distance(&goal).value();
        assert!(
            result.total_length().value() > direct,
            "detour must exceed the direct geodesic"
        );
        // Invariant: segments connect consecutive points.
        assert_eq!(result.segments.len(), result.points.len() - 1);
        for (i, segment) in result.segments.iter().enumerate() {
            assert!(segment.start().same_location(&result.points[i]));
            assert!(segment.end().same_location(&result.points[i + 1]));
        }
    }

    #[test]
    fn identical_queries_identical_paths() {
        let hierarchy = Hierarchy::new(water_with_island());
        let start = geo_point!(-75.5, 39.5);
        let goal = geo_point!(-73.5, 41.5);
        let first = hierarchy.find_path(&start, &goal);
        let second = hierarchy.find_path(&start, &goal);
        assert_eq!(first.points.len(), second.points.len());
        for (a, b) in first.points.iter().zip(second.points.iter()) {
            assert!(a.same_location(b));
        }
    }

    #[test]
    fn endpoint_outside_water_is_snapped() {
        let hierarchy = Hierarchy::new(water_with_island());
        let planner = Planner::new(&hierarchy);
        // On the island (inside the hole): snaps to a hole vertex.
        let (snapped, was_snapped) = planner.snap_to_water(&geo_point!(-74.5, 40.5)).unwrap();
        assert!(was_snapped);
        assert!(hierarchy.level(0).vertex_id(&snapped).is_some());
        // Open water stays put.
        let (kept, was_snapped) = planner.snap_to_water(&geo_point!(-75.0, 39.5)).unwrap();
        assert!(!was_snapped);
        assert_eq!(kept, geo_point!(-75.0, 39.5));
    }

    #[test]
    fn cancelled_token_returns_empty() {
        let hierarchy = Hierarchy::new(water_with_island());
        let planner = Planner::new(&hierarchy);
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = planner.find_path(&geo_point!(-75.5, 39.5), &geo_point!(-73.5, 41.5), &cancel);
        assert!(!result.is_valid());
    }

    #[test]
    fn multi_waypoint_concatenates_without_duplicates() {
        let hierarchy = Hierarchy::new(water_with_island());
        let planner = Planner::new(&hierarchy);
        let waypoints = [
            geo_point!(-75.5, 39.5),
            geo_point!(-74.0, 39.5),
            geo_point!(-73.5, 41.5),
        ];
        let mut events = Vec::new();
        let result = planner.find_path_via(&waypoints, &CancelToken::new(), |e| events.push(e));
        assert!(result.is_valid());
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].total_legs, 2);
        assert!(events[1].elapsed_seconds >= events[0].elapsed_seconds);
        for w in result.points.windows(2) {
            assert!(!w[0].same_location(&w[1]), "duplicate junction vertex");
        }
    }

    #[test]
    fn empty_and_single_waypoint_queries() {
        let hierarchy = Hierarchy::new(water_with_island());
        let planner = Planner::new(&hierarchy);
        let none: PlannerResult =
            planner.find_path_via(&[], &CancelToken::new(), |_| {});
        assert!(!none.is_valid());
        let single = planner.find_path_via(&[geo_point!(-75.0, 39.5)], &CancelToken::new(), |_| {});
        assert!(!single.is_valid());
        assert_eq!(single.points.len(), 1);
    }

    #[test]
    fn wrap_heuristic() {
        assert!(should_cross_antimeridian(
            &geo_point!(179.0, 40.0),
            &geo_point!(-179.0, 40.0)
        ));
        assert!(!should_cross_antimeridian(
            &geo_point!(10.0, 40.0),
            &geo_point!(-10.0, 40.0)
        ));
        assert!(!should_cross_antimeridian(
            &geo_point!(179.0, 89.95),
            &geo_point!(-179.0, 89.95)
        ));
    }
}
