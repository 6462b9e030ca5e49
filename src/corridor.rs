//! Refinement corridors
//!
//! A corridor restricts a finer level's search to the geographic
//! neighborhood of a coarser path: the coarse polyline's bounding box,
//! expanded by a portal margin, plus the finer level's vertices inside it.
//! `precompute_adjacency` then builds a local graph over exactly those
//! vertices (and the query endpoints), so the refining A* never touches
//! the rest of the planet.  One corridor lives for one refinement step.

use std::collections::{HashMap, HashSet};

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::debug;

use crate::graph::GraphLevel;
use crate::iter_work;
use crate::measure::UnitOfMeasure;
use crate::point::GeoPoint;
use crate::quadtree::GeoRect;
use crate::visibility::VisibilityOracle;

/// Longitude expansion around the coarse path, in degrees.
pub const PORTAL_ZONE_DEGREES: f64 = 3.0;

/// Latitude expansion around the coarse path, in degrees.
pub const PORTAL_LAT_TOLERANCE: f64 = 1.0;

/// Above this latitude the longitude window degenerates, so the corridor
/// opens to the full map width instead.
const POLAR_LATITUDE: f64 = 85.0;

/// A geographic box plus the local adjacency used to refine a coarse path
/// at a finer level.
pub struct Corridor {
    rect: GeoRect,
    /// Vertex ids of the target level that fall inside `rect`.
    members: HashSet<usize>,
    /// Local adjacency restricted to `members`, keyed by level vertex id.
    adjacency: HashMap<usize, Vec<usize>>,
    /// Members visible from the (possibly snapped) query endpoints.
    start_links: Vec<usize>,
    goal_links: Vec<usize>,
    has_adjacency: bool,
}

impl Corridor {
    /// Expand the coarse path's bounding box and collect the finer
    /// level's vertices inside it.
    pub fn around_path(coarse_points: &[GeoPoint], target: &GraphLevel) -> Corridor {
        let mut min_lon = f64::MAX;
        let mut min_lat = f64::MAX;
        let mut max_lon = f64::MIN;
        let mut max_lat = f64::MIN;
        for p in coarse_points {
            min_lon = min_lon.min(p.lon().value());
            min_lat = min_lat.min(p.lat().value());
            max_lon = max_lon.max(p.lon().value());
            max_lat = max_lat.max(p.lat().value());
        }

        let mut rect = GeoRect::new(min_lon, min_lat, max_lon, max_lat)
            .expanded(PORTAL_ZONE_DEGREES, PORTAL_LAT_TOLERANCE);
        if rect.max_lat > POLAR_LATITUDE || rect.min_lat < -POLAR_LATITUDE {
            // Longitude windows mean little at the poles.
            rect.min_lon = -180.0;
            rect.max_lon = 180.0;
        }

        let members: HashSet<usize> = target
            .vertices()
            .iter()
            .enumerate()
            .filter(|(_, v)| rect.contains(v))
            .map(|(id, _)| id)
            .collect();

        debug!(
            level = target.level(),
            members = members.len(),
            "corridor built"
        );

        Corridor {
            rect,
            members,
            adjacency: HashMap::new(),
            start_links: Vec::new(),
            goal_links: Vec::new(),
            has_adjacency: false,
        }
    }

    /// Pairwise visibility among corridor members plus links from the
    /// query endpoints, producing the sparse local graph the refining A*
    /// runs on.  When the level already has full adjacency it is simply
    /// restricted to the member set.
    pub fn precompute_adjacency(
        &mut self,
        level: &GraphLevel,
        oracle: &VisibilityOracle,
        start: &GeoPoint,
        goal: &GeoPoint,
    ) {
        let members: Vec<usize> = {
            let mut m: Vec<usize> = self.members.iter().copied().collect();
            m.sort_unstable();
            m
        };

        let lists: Vec<(usize, Vec<usize>)> = iter_work!(members)
            .map(|&i| {
                let neighbors: Vec<usize> = if level.has_adjacency() {
                    level.adjacency()[i]
                        .iter()
                        .copied()
                        .filter(|j| self.members.contains(j))
                        .collect()
                } else {
                    let vertex = level.vertices()[i];
                    members
                        .iter()
                        .copied()
                        .filter(|&j| {
                            j != i
                                && (level.ring_neighbors[i].contains(&j)
                                    || level.candidate_pair_visible(
                                        &vertex,
                                        &level.vertices()[j],
                                        oracle,
                                    ))
                        })
                        .collect()
                };
                (i, neighbors)
            })
            .collect();

        let mut adjacency: HashMap<usize, Vec<usize>> = lists.into_iter().collect();
        // Symmetric closure over the local graph.
        let pairs: Vec<(usize, usize)> = adjacency
            .iter()
            .flat_map(|(&i, ns)| ns.iter().map(move |&j| (j, i)))
            .collect();
        for (j, i) in pairs {
            let entry = adjacency.entry(j).or_default();
            if !entry.contains(&i) {
                entry.push(i);
            }
        }

        self.start_links = members
            .iter()
            .copied()
            .filter(|&i| oracle.is_visible(start, &level.vertices()[i], level.level(), level.quadtree()))
            .collect();
        self.goal_links = members
            .iter()
            .copied()
            .filter(|&i| oracle.is_visible(goal, &level.vertices()[i], level.level(), level.quadtree()))
            .collect();

        self.adjacency = adjacency;
        self.has_adjacency = true;
    }

    pub fn rect(&self) -> &GeoRect {
        &self.rect
    }

    pub fn contains_vertex(&self, id: usize) -> bool {
        self.members.contains(&id)
    }

    pub fn contains_point(&self, point: &GeoPoint) -> bool {
        self.rect.contains(point)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn has_adjacency(&self) -> bool {
        self.has_adjacency
    }

    /// Local neighbors of a member vertex.
    pub fn neighbors(&self, id: usize) -> &[usize] {
        self.adjacency.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Members reachable directly from the effective start point.
    pub fn start_links(&self) -> &[usize] {
        &self.start_links
    }

    /// Members with direct sight of the effective goal point.
    pub fn goal_links(&self) -> &[usize] {
        &self.goal_links
    }
}
