//! Line-of-sight queries against the obstacle index
//!
//! The oracle answers "does the geodesic AB avoid every polygon edge at
//! this level?".  Results are memoized per unordered vertex pair and level
//! behind a reader-writer lock, so concurrent queries share work.  A
//! manual-edge set lets callers force visibility for wrap-around links,
//! port approach channels, and operator overrides; mutating it invalidates
//! the whole cache.

use std::collections::HashMap;
use std::sync::RwLock;

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::debug;

use crate::iter_work;
use crate::measure::Meters;
use crate::point::{GeoPoint, VertexKey, VertexPairKey};
use crate::quadtree::Quadtree;
use crate::segment::GeoSegment;

/// Segments shorter than this are accepted as visible without testing.
const SHORT_SEGMENT: Meters<f64> = Meters(1.0);

/// Leaf-count threshold above which edge checks fan out to rayon.
const PARALLEL_LEAVES: usize = 1000;

#[derive(Default)]
struct ManualEdges {
    segments: Vec<GeoSegment>,
    connections: HashMap<VertexKey, Vec<GeoPoint>>,
}

/// Cached visibility decisions over a hierarchy's levels.
#[derive(Default)]
pub struct VisibilityOracle {
    cache: RwLock<HashMap<(VertexPairKey, u8), bool>>,
    manual: RwLock<ManualEdges>,
}

impl VisibilityOracle {
    pub fn new() -> VisibilityOracle {
        VisibilityOracle::default()
    }

    /// Can the geodesic from `a` to `b` be traversed at `level` without
    /// crossing an edge indexed in `quadtree`?
    pub fn is_visible(
        &self,
        a: &GeoPoint,
        b: &GeoPoint,
        level: usize,
        quadtree: &Quadtree,
    ) -> bool {
        if a.same_location(b) {
            return true;
        }
        self.is_segment_visible(&GeoSegment::new(*a, *b), level, quadtree)
    }

    /// Segment form of [`VisibilityOracle::is_visible`].
    pub fn is_segment_visible(
        &self,
        segment: &GeoSegment,
        level: usize,
        quadtree: &Quadtree,
    ) -> bool {
        if self.is_manual(segment) {
            return true;
        }

        let key = (
            VertexPairKey::new(segment.start().key(), segment.end().key()),
            level as u8,
        );
        if let Some(&cached) = self.cache.read().unwrap().get(&key) {
            return cached;
        }

        let visible = self.compute_visibility(segment, level, quadtree);
        self.cache.write().unwrap().insert(key, visible);
        visible
    }

    fn compute_visibility(&self, segment: &GeoSegment, level: usize, quadtree: &Quadtree) -> bool {
        // A wrapping probe is visible iff both halves are.
        if segment.crosses_antimeridian() {
            return segment
                .split_at_antimeridian()
                .iter()
                .all(|piece| self.is_segment_visible(piece, level, quadtree));
        }

        if segment.length() < SHORT_SEGMENT {
            return true;
        }

        let leaves = quadtree.intersecting_leaf_nodes_parallel(segment);

        let seg_min_lon = segment.min_lon();
        let seg_max_lon = segment.max_lon();
        let seg_min_lat = segment.min_lat();
        let seg_max_lat = segment.max_lat();

        let blocks = |edge: &GeoSegment| {
            // Edges meeting the probe at an endpoint never obstruct it.
            if edge.shares_endpoint_with(segment) {
                return false;
            }
            if edge.max_lon() < seg_min_lon
                || edge.min_lon() > seg_max_lon
                || edge.max_lat() < seg_min_lat
                || edge.min_lat() > seg_max_lat
            {
                return false;
            }
            segment.intersects(edge, true)
        };

        let obstructed = if leaves.len() > PARALLEL_LEAVES {
            iter_work!(leaves)
                .any(|&leaf| quadtree.segments_in_node(leaf).iter().any(|e| blocks(e)))
        } else {
            leaves
                .iter()
                .any(|&leaf| quadtree.segments_in_node(leaf).iter().any(|e| blocks(e)))
        };

        !obstructed
    }

    /// Register a segment as always visible at every level.
    pub fn add_manual_edge(&self, segment: GeoSegment) {
        let mut manual = self.manual.write().unwrap();
        manual
            .connections
            .entry(segment.start().key())
            .or_default()
            .push(segment.end());
        manual
            .connections
            .entry(segment.end().key())
            .or_default()
            .push(segment.start());
        manual.segments.push(segment);
        drop(manual);
        self.invalidate();
        debug!(start = %segment.start(), end = %segment.end(), "added manual edge");
    }

    /// Remove a previously registered manual edge.  Returns false when no
    /// matching edge was found.
    pub fn remove_manual_edge(&self, segment: &GeoSegment) -> bool {
        let mut manual = self.manual.write().unwrap();
        let before = manual.segments.len();
        manual.segments.retain(|s| !s.same_endpoints(segment));
        let removed = manual.segments.len() < before;
        if removed {
            if let Some(list) = manual.connections.get_mut(&segment.start().key()) {
                list.retain(|p| !p.same_location(&segment.end()));
            }
            if let Some(list) = manual.connections.get_mut(&segment.end().key()) {
                list.retain(|p| !p.same_location(&segment.start()));
            }
            drop(manual);
            self.invalidate();
        }
        removed
    }

    pub fn clear_manual_edges(&self) {
        *self.manual.write().unwrap() = ManualEdges::default();
        self.invalidate();
    }

    /// Endpoints manually linked to `point`.
    pub fn manual_neighbors(&self, point: &GeoPoint) -> Vec<GeoPoint> {
        self.manual
            .read()
            .unwrap()
            .connections
            .get(&point.key())
            .cloned()
            .unwrap_or_default()
    }

    /// Drop every cached decision.
    pub fn invalidate(&self) {
        self.cache.write().unwrap().clear();
    }

    fn is_manual(&self, segment: &GeoSegment) -> bool {
        self.manual
            .read()
            .unwrap()
            .segments
            .iter()
            .any(|s| s.same_endpoints(segment))
    }
}

#[cfg(test)]
mod tests {
    use super::VisibilityOracle;
    use crate::geo_point;
    use crate::polygon::Polygon;
    use crate::quadtree::Quadtree;
    use crate::segment::GeoSegment;

    fn water_with_island() -> Polygon {
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
        .unwrap()
    }

    #[test]
    fn segment_across_hole_not_visible() {
        let quadtree = Quadtree::from_polygons(&[water_with_island()]);
        let oracle = VisibilityOracle::new();
        // Crosses the hole's right edge near (-74.2, 40.58).
        assert!(!oracle.is_visible(&geo_point!(-75.0, 39.2), &geo_point!(-73.0, 41.0), 0, &quadtree));
        assert!(oracle.is_visible(&geo_point!(-75.5, 39.5), &geo_point!(-75.0, 39.2), 0, &quadtree));
    }

    #[test]
    fn identical_points_visible() {
        let quadtree = Quadtree::from_polygons(&[water_with_island()]);
        let oracle = VisibilityOracle::new();
        let p = geo_point!(-75.0, 40.0);
        assert!(oracle.is_visible(&p, &p, 0, &quadtree));
    }

    #[test]
    fn cache_returns_same_answer() {
        let quadtree = Quadtree::from_polygons(&[water_with_island()]);
        let oracle = VisibilityOracle::new();
        let a = geo_point!(-75.0, 39.2);
        let b = geo_point!(-73.0, 41.0);
        let first = oracle.is_visible(&a, &b, 0, &quadtree);
        let second = oracle.is_visible(&a, &b, 0, &quadtree);
        let reversed = oracle.is_visible(&b, &a, 0, &quadtree);
        assert_eq!(first, second);
        assert_eq!(first, reversed);
    }

    #[test]
    fn manual_edge_forces_visibility() {
        let quadtree = Quadtree::from_polygons(&[water_with_island()]);
        let oracle = VisibilityOracle::new();
        let a = geo_point!(-75.0, 39.2);
        let b = geo_point!(-73.0, 41.0);
        assert!(!oracle.is_visible(&a, &b, 0, &quadtree));

        oracle.add_manual_edge(GeoSegment::new(a, b));
        assert!(oracle.is_visible(&a, &b, 0, &quadtree));
        assert!(oracle.is_visible(&b, &a, 0, &quadtree));
        assert_eq!(oracle.manual_neighbors(&a).len(), 1);

        assert!(oracle.remove_manual_edge(&GeoSegment::new(b, a)));
        assert!(!oracle.is_visible(&a, &b, 0, &quadtree));
        assert!(oracle.manual_neighbors(&a).is_empty());
    }

    #[test]
    fn clear_manual_edges_invalidates() {
        let quadtree = Quadtree::from_polygons(&[water_with_island()]);
        let oracle = VisibilityOracle::new();
        let a = geo_point!(-75.0, 39.2);
        let b = geo_point!(-73.0, 41.0);
        oracle.add_manual_edge(GeoSegment::new(a, b));
        assert!(oracle.is_visible(&a, &b, 0, &quadtree));
        oracle.clear_manual_edges();
        assert!(!oracle.is_visible(&a, &b, 0, &quadtree));
    }

    #[test]
    fn antimeridian_probe_matches_split_halves() {
        // Open ocean: nothing indexed, everything visible.
        let quadtree = Quadtree::new();
        let oracle = VisibilityOracle::new();
        let east = geo_point!(179.0, 40.0);
        let west = geo_point!(-179.0, 40.0);
        let whole = oracle.is_visible(&east, &west, 0, &quadtree);
        let meet_east = geo_point!(180.0, 40.0);
        let meet_west = geo_point!(-180.0, 40.0);
        let halves = oracle.is_visible(&east, &meet_east, 0, &quadtree)
            && oracle.is_visible(&meet_west, &west, 0, &quadtree);
        assert_eq!(whole, halves);
    }
}
