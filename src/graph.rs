//! One level of the visibility-graph hierarchy
//!
//! A [`GraphLevel`] owns the polygon set at its simplification tolerance,
//! a quadtree over those polygons, the dense-id vertex table, and the
//! adjacency lists.  Level 0 keeps the original polygons; coarser levels
//! run Ramer-Douglas-Peucker on every ring with geodesic point-to-chord
//! distances, dropping rings that collapse below three unique vertices.

use std::collections::{BTreeSet, HashMap};

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::{debug, info};

use crate::iter_work;
use crate::measure::{Meters, UnitOfMeasure};
use crate::point::{GeoPoint, VertexKey};
use crate::polygon::Polygon;
use crate::quadtree::Quadtree;
use crate::segment::GeoSegment;
use crate::visibility::VisibilityOracle;

/// Simplification tolerances in meters, level 0 (full resolution) through
/// level 3 (coarsest).
pub const LEVEL_TOLERANCES: [f64; 4] = [0.0, 2000.0, 10_000.0, 50_000.0];

/// One level of the hierarchy: tolerance, simplified polygons, spatial
/// index, vertex table, and adjacency.
pub struct GraphLevel {
    pub(crate) level: usize,
    pub(crate) tolerance: Meters<f64>,
    pub(crate) polygons: Vec<Polygon>,
    pub(crate) quadtree: Quadtree,
    pub(crate) vertices: Vec<GeoPoint>,
    pub(crate) vertex_index: HashMap<VertexKey, usize>,
    /// Owning polygon of each vertex, by position in `polygons`.
    pub(crate) vertex_polygon: Vec<u32>,
    /// Ids of ring-consecutive vertices for each vertex.
    pub(crate) ring_neighbors: Vec<Vec<usize>>,
    pub(crate) adjacency: Vec<Vec<usize>>,
    pub(crate) adjacency_built: bool,
}

impl GraphLevel {
    /// Build the level's polygons, quadtree, and vertex table.  Adjacency
    /// is built separately; see [`GraphLevel::build_adjacency`].
    pub fn build(level: usize, tolerance: Meters<f64>, source: &[Polygon]) -> GraphLevel {
        let polygons: Vec<Polygon> = if tolerance.value() <= 0.0 {
            source.to_vec()
        } else {
            source
                .iter()
                .filter_map(|p| simplify_polygon(p, tolerance))
                .collect()
        };

        let quadtree = Quadtree::from_polygons(&polygons);

        let mut vertices = Vec::new();
        let mut vertex_index = HashMap::new();
        let mut vertex_polygon = Vec::new();
        let mut ring_neighbors: Vec<BTreeSet<usize>> = Vec::new();

        for (polygon_id, polygon) in polygons.iter().enumerate() {
            let mut intern_ring = |ring: &[GeoPoint]| {
                let open = &ring[..ring.len() - 1];
                let ids: Vec<usize> = open
                    .iter()
                    .map(|vertex| {
                        *vertex_index.entry(vertex.key()).or_insert_with(|| {
                            vertices.push(*vertex);
                            vertex_polygon.push(polygon_id as u32);
                            ring_neighbors.push(BTreeSet::new());
                            vertices.len() - 1
                        })
                    })
                    .collect();
                for (i, &id) in ids.iter().enumerate() {
                    let prev = ids[(i + ids.len() - 1) % ids.len()];
                    let next = ids[(i + 1) % ids.len()];
                    if prev != id {
                        ring_neighbors[id].insert(prev);
                    }
                    if next != id {
                        ring_neighbors[id].insert(next);
                    }
                }
            };

            intern_ring(polygon.outer());
            for hole in polygon.holes() {
                intern_ring(hole);
            }
        }

        debug!(
            level,
            polygons = polygons.len(),
            vertices = vertices.len(),
            "graph level built"
        );

        let vertex_count = vertices.len();
        GraphLevel {
            level,
            tolerance,
            polygons,
            quadtree,
            vertices,
            vertex_index,
            vertex_polygon,
            ring_neighbors: ring_neighbors.into_iter().map(|s| s.into_iter().collect()).collect(),
            adjacency: vec![Vec::new(); vertex_count],
            adjacency_built: false,
        }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn tolerance(&self) -> Meters<f64> {
        self.tolerance
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn quadtree(&self) -> &Quadtree {
        &self.quadtree
    }

    pub fn vertices(&self) -> &[GeoPoint] {
        &self.vertices
    }

    pub fn adjacency(&self) -> &[Vec<usize>] {
        &self.adjacency
    }

    pub fn has_adjacency(&self) -> bool {
        self.adjacency_built
    }

    /// Dense id of a vertex, if it is part of this level.
    pub fn vertex_id(&self, vertex: &GeoPoint) -> Option<usize> {
        self.vertex_index.get(&vertex.key()).copied()
    }

    /// Id of the polygon owning vertex `id`.
    pub fn polygon_of_vertex(&self, id: usize) -> usize {
        self.vertex_polygon[id] as usize
    }

    /// Whether `point` lies in navigable water at this level: inside some
    /// polygon's outer ring and outside its holes.
    pub fn is_water(&self, point: &GeoPoint) -> bool {
        self.polygons.iter().any(|p| p.is_point_inside(point))
    }

    /// Index of the polygon containing `point`, if any.
    pub fn containing_polygon(&self, point: &GeoPoint) -> Option<usize> {
        self.polygons.iter().position(|p| p.is_point_inside(point))
    }

    /// Compute the full symmetric adjacency for this level.
    ///
    /// Two vertices are neighbors when they are ring-consecutive, or when
    /// their geodesic midpoint lies in water and the oracle reports them
    /// mutually visible.  Per-vertex neighbor lists are computed in
    /// parallel and committed in one assignment.
    pub fn build_adjacency(&mut self, oracle: &VisibilityOracle) {
        let ids: Vec<usize> = (0..self.vertices.len()).collect();
        let lists: Vec<Vec<usize>> = {
            let this = &*self;
            iter_work!(ids)
                .map(|&i| this.neighbors_for_vertex(i, oracle))
                .collect()
        };

        // Symmetric closure: a sees b implies b sees a.
        let mut sets: Vec<BTreeSet<usize>> = lists.iter().map(|l| l.iter().copied().collect()).collect();
        for (i, list) in lists.iter().enumerate() {
            for &j in list {
                sets[j].insert(i);
            }
        }
        self.adjacency = sets.into_iter().map(|s| s.into_iter().collect()).collect();
        self.adjacency_built = true;

        let edge_count: usize = self.adjacency.iter().map(Vec::len).sum::<usize>() / 2;
        info!(level = self.level, edges = edge_count, "adjacency built");
    }

    /// Neighbor candidates for one vertex: ring neighbors plus every
    /// other vertex with a water midpoint and clear line of sight.
    pub(crate) fn neighbors_for_vertex(&self, i: usize, oracle: &VisibilityOracle) -> Vec<usize> {
        let mut neighbors: BTreeSet<usize> = self.ring_neighbors[i].iter().copied().collect();
        let vertex = self.vertices[i];
        for (j, other) in self.vertices.iter().enumerate() {
            if j == i || neighbors.contains(&j) {
                continue;
            }
            if self.candidate_pair_visible(&vertex, other, oracle) {
                neighbors.insert(j);
            }
        }
        neighbors.into_iter().collect()
    }

    /// The midpoint-in-water plus visibility test shared by full and
    /// corridor-restricted adjacency construction.
    pub(crate) fn candidate_pair_visible(
        &self,
        a: &GeoPoint,
        b: &GeoPoint,
        oracle: &VisibilityOracle,
    ) -> bool {
        let midpoint = a.midpoint_with(b);
        self.is_water(&midpoint) && oracle.is_visible(a, b, self.level, &self.quadtree)
    }
}

/// Simplify one polygon with Douglas-Peucker at the given tolerance.
/// Returns `None` when the outer ring degenerates; collapsed holes are
/// dropped individually.
fn simplify_polygon(polygon: &Polygon, tolerance: Meters<f64>) -> Option<Polygon> {
    let outer = simplify_ring(polygon.outer(), tolerance)?;
    let holes: Vec<Vec<GeoPoint>> = polygon
        .holes()
        .iter()
        .filter_map(|hole| simplify_ring(hole, tolerance))
        .collect();
    Polygon::new(outer, holes).ok()
}

/// Douglas-Peucker over a closed ring.  The shared first/last vertex
/// anchors the recursion; because the chord of a closed ring is
/// degenerate, the first split lands on the vertex farthest from the
/// anchor, which is exactly the behavior wanted for rings.
fn simplify_ring(ring: &[GeoPoint], tolerance: Meters<f64>) -> Option<Vec<GeoPoint>> {
    let simplified = rdp(ring, tolerance);
    let unique = simplified.len().saturating_sub(1);
    if unique < 3 {
        return None;
    }
    if unique == 3
        && GeoSegment::orientation(&simplified[0], &simplified[1], &simplified[2])
            == crate::segment::Orientation::Collinear
    {
        return None;
    }
    Some(simplified)
}

fn rdp(points: &[GeoPoint], tolerance: Meters<f64>) -> Vec<GeoPoint> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let chord = GeoSegment::new(points[0], points[points.len() - 1]);
    let mut index = 0;
    let mut dmax = 0.0;
    for (i, point) in points.iter().enumerate().take(points.len() - 1).skip(1) {
        let d = chord.distance_to_point(point).value();
        if d > dmax {
            index = i;
            dmax = d;
        }
    }

    if dmax > tolerance.value() {
        let mut head = rdp(&points[..=index], tolerance);
        head.pop();
        head.extend_from_slice(&rdp(&points[index..], tolerance));
        head
    } else {
        vec![points[0], points[points.len() - 1]]
    }
}

#[cfg(test)]
mod tests {
    use super::{GraphLevel, LEVEL_TOLERANCES, simplify_polygon};
    use crate::geo_point;
    use crate::measure::Meters;
    use crate::polygon::Polygon;
    use crate::visibility::VisibilityOracle;

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
    fn zero_tolerance_keeps_original() {
        let level = GraphLevel::build(0, Meters(LEVEL_TOLERANCES[0]), &[water_with_island()]);
        assert_eq!(level.polygons().len(), 1);
        assert_eq!(level.vertices().len(), 8);
    }

    #[test]
    fn rectangle_corners_survive_simplification() {
        // Corners of a rectangle deviate far from any chord, so moderate
        // tolerances keep all four.
        let level = GraphLevel::build(1, Meters(2000.0), &[water_with_island()]);
        assert_eq!(level.polygons().len(), 1);
        assert_eq!(level.polygons()[0].outer().len(), 5);
    }

    #[test]
    fn coarse_tolerance_drops_small_hole() {
        // The island is ~50 km by ~44 km; at 50 km tolerance it collapses.
        let coarse = simplify_polygon(&water_with_island(), Meters(50_000.0)).unwrap();
        assert!(coarse.holes().is_empty());
        // At 10 km it must survive.
        let mid = simplify_polygon(&water_with_island(), Meters(10_000.0)).unwrap();
        assert_eq!(mid.holes().len(), 1);
    }

    #[test]
    fn vertex_table_dense_and_consistent() {
        let level = GraphLevel::build(0, Meters(0.0), &[water_with_island()]);
        for (id, vertex) in level.vertices().iter().enumerate() {
            assert_eq!(level.vertex_id(vertex), Some(id));
            assert_eq!(level.polygon_of_vertex(id), 0);
        }
    }

    #[test]
    fn adjacency_symmetric_and_contains_ring_edges() {
        let mut level = GraphLevel::build(0, Meters(0.0), &[water_with_island()]);
        let oracle = VisibilityOracle::new();
        level.build_adjacency(&oracle);
        assert!(level.has_adjacency());

        let adjacency = level.adjacency();
        for (i, neighbors) in adjacency.iter().enumerate() {
            assert!(!neighbors.contains(&i));
            for &j in neighbors {
                assert!(adjacency[j].contains(&i), "asymmetric edge {i}-{j}");
            }
        }

        // Ring-consecutive outer vertices are adjacent by construction.
        let a = level.vertex_id(&geo_point!(-76.0, 39.0)).unwrap();
        let b = level.vertex_id(&geo_point!(-72.0, 39.0)).unwrap();
        assert!(adjacency[a].contains(&b));
    }

    #[test]
    fn hole_blocks_diagonal_adjacency() {
        let mut level = GraphLevel::build(0, Meters(0.0), &[water_with_island()]);
        let oracle = VisibilityOracle::new();
        level.build_adjacency(&oracle);
        // Opposite corners of the island hole see each other only through
        // land, so they must not be adjacent.
        let a = level.vertex_id(&geo_point!(-74.8, 40.3)).unwrap();
        let b = level.vertex_id(&geo_point!(-74.2, 40.7)).unwrap();
        assert!(!level.adjacency()[a].contains(&b));
    }

    #[test]
    fn water_check() {
        let level = GraphLevel::build(0, Meters(0.0), &[water_with_island()]);
        assert!(level.is_water(&geo_point!(-74.0, 40.5)));
        assert!(!level.is_water(&geo_point!(-74.5, 40.5)));
        assert_eq!(level.containing_polygon(&geo_point!(-74.0, 40.5)), Some(0));
        assert_eq!(level.containing_polygon(&geo_point!(-60.0, 20.0)), None);
    }
}
