//! The four-level visibility-graph hierarchy
//!
//! Owns one [`GraphLevel`] per entry of [`LEVEL_TOLERANCES`] plus the
//! shared [`VisibilityOracle`].  Levels build in parallel; adjacency is
//! built eagerly for the coarse levels and deferred for level 0, whose
//! full adjacency is expensive enough to persist in a `.hvg_adj` cache
//! file keyed by a content hash of the polygon set.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

use crate::graph::{GraphLevel, LEVEL_TOLERANCES};
use crate::iter_work;
use crate::measure::{Degrees, Meters, UnitOfMeasure};
use crate::planner::{CancelToken, Planner, PlannerResult, ProgressEvent};
use crate::point::GeoPoint;
use crate::polygon::Polygon;
use crate::segment::GeoSegment;
use crate::visibility::VisibilityOracle;

pub const NUM_LEVELS: usize = LEVEL_TOLERANCES.len();

/// Magic prefix of a `.hvg_adj` adjacency cache file.
const CACHE_MAGIC: [u8; 8] = *b"HVGADJ\0\0";
const CACHE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("not an adjacency cache file")]
    BadMagic,
    #[error("unsupported adjacency cache version {0}")]
    UnsupportedVersion(u32),
    #[error("adjacency cache does not match the current polygon set")]
    Incompatible,
    #[error("level-0 adjacency has not been built")]
    NotBuilt,
}

type Result<T> = std::result::Result<T, CacheError>;

/// Four graph levels over one polygon set, from full resolution (level 0)
/// to coarsest (level 3).
pub struct Hierarchy {
    levels: Vec<GraphLevel>,
    oracle: VisibilityOracle,
}

impl Hierarchy {
    /// Build all levels and the adjacency of levels 1-3.  Level 0
    /// adjacency stays deferred until [`Hierarchy::build_level0_adjacency`]
    /// or [`Hierarchy::load_adjacency_cache`].
    pub fn new(polygons: Vec<Polygon>) -> Hierarchy {
        let indices: Vec<usize> = (0..NUM_LEVELS).collect();
        let mut levels: Vec<GraphLevel> = iter_work!(indices)
            .map(|&i| GraphLevel::build(i, Meters(LEVEL_TOLERANCES[i]), &polygons))
            .collect();

        let oracle = VisibilityOracle::new();
        for level in levels.iter_mut().skip(1) {
            level.build_adjacency(&oracle);
        }

        info!(
            levels = NUM_LEVELS,
            vertices_l0 = levels[0].vertices().len(),
            "hierarchy built"
        );
        Hierarchy { levels, oracle }
    }

    pub fn level(&self, index: usize) -> &GraphLevel {
        &self.levels[index]
    }

    pub fn oracle(&self) -> &VisibilityOracle {
        &self.oracle
    }

    /// The level-0 polygon set.
    pub fn polygons(&self) -> &[Polygon] {
        self.levels[0].polygons()
    }

    /// Lower-left and upper-right corners of the indexed map.
    pub fn map_bounds(&self) -> (GeoPoint, GeoPoint) {
        let quadtree = self.levels[0].quadtree();
        (quadtree.map_min_point(), quadtree.map_max_point())
    }

    /// Visibility between two points at the given level.
    pub fn is_visible(&self, a: &GeoPoint, b: &GeoPoint, level: usize) -> bool {
        self.oracle
            .is_visible(a, b, level, self.levels[level].quadtree())
    }

    /// Register an always-visible edge, applied at query time on every
    /// level.
    pub fn add_manual_edge(&self, segment: GeoSegment) {
        self.oracle.add_manual_edge(segment);
    }

    pub fn clear_manual_edges(&self) {
        self.oracle.clear_manual_edges();
    }

    /// Relocate a port coordinate onto the nearest full-resolution water
    /// vertex.
    pub fn snap_port_to_water(&self, port: &GeoPoint) -> Option<GeoPoint> {
        self.levels[0].quadtree().nearest_vertex(port)
    }

    /// Compute the full level-0 adjacency.  This is the expensive step
    /// the `.hvg_adj` cache exists to avoid.
    pub fn build_level0_adjacency(&mut self) {
        let Hierarchy { levels, oracle } = self;
        levels[0].build_adjacency(oracle);
    }

    /// Shortest navigable route between two points.
    pub fn find_path(&self, start: &GeoPoint, goal: &GeoPoint) -> PlannerResult {
        Planner::new(self).find_path(start, goal, &CancelToken::new())
    }

    /// Shortest route visiting every waypoint in order.
    pub fn find_path_via(&self, waypoints: &[GeoPoint]) -> PlannerResult {
        Planner::new(self).find_path_via(waypoints, &CancelToken::new(), |_: ProgressEvent| {})
    }

    /// Write the level-0 adjacency cache.
    ///
    /// Layout (little-endian): magic, u32 version, u64 polygon-set hash,
    /// u64 vertex count, per-vertex f64 lon / f64 lat / u32 polygon id,
    /// u64 edge count, per-edge u32 from / u32 to with to > from.
    pub fn save_adjacency_cache<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let level = &self.levels[0];
        if !level.has_adjacency() {
            return Err(CacheError::NotBuilt);
        }

        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(&CACHE_MAGIC)?;
        out.write_u32::<LittleEndian>(CACHE_VERSION)?;
        out.write_u64::<LittleEndian>(self.polygon_set_hash())?;

        let vertices = level.vertices();
        out.write_u64::<LittleEndian>(vertices.len() as u64)?;
        for (id, vertex) in vertices.iter().enumerate() {
            out.write_f64::<LittleEndian>(vertex.lon().value())?;
            out.write_f64::<LittleEndian>(vertex.lat().value())?;
            out.write_u32::<LittleEndian>(level.polygon_of_vertex(id) as u32)?;
        }

        let mut edges: Vec<(u32, u32)> = Vec::new();
        for (i, neighbors) in level.adjacency().iter().enumerate() {
            for &j in neighbors {
                if j > i {
                    edges.push((i as u32, j as u32));
                }
            }
        }
        out.write_u64::<LittleEndian>(edges.len() as u64)?;
        for (from, to) in edges {
            out.write_u32::<LittleEndian>(from)?;
            out.write_u32::<LittleEndian>(to)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Load a level-0 adjacency cache written by
    /// [`Hierarchy::save_adjacency_cache`].
    ///
    /// The magic, version, polygon-set hash, and every stored vertex must
    /// match the current hierarchy, otherwise the cache is rejected with
    /// [`CacheError::Incompatible`] and adjacency must be rebuilt.
    pub fn load_adjacency_cache<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let result = self.read_adjacency_cache(&mut BufReader::new(File::open(&path)?));
        if let Err(e) = &result {
            warn!(error = %e, "adjacency cache rejected; rebuild required");
        }
        result
    }

    fn read_adjacency_cache<R: Read>(&mut self, input: &mut R) -> Result<()> {
        let mut magic = [0u8; 8];
        input.read_exact(&mut magic)?;
        if magic != CACHE_MAGIC {
            return Err(CacheError::BadMagic);
        }
        let version = input.read_u32::<LittleEndian>()?;
        if version != CACHE_VERSION {
            return Err(CacheError::UnsupportedVersion(version));
        }
        if input.read_u64::<LittleEndian>()? != self.polygon_set_hash() {
            return Err(CacheError::Incompatible);
        }

        let level = &self.levels[0];
        let vertex_count = input.read_u64::<LittleEndian>()? as usize;
        if vertex_count != level.vertices().len() {
            return Err(CacheError::Incompatible);
        }
        for (id, expected) in level.vertices().iter().enumerate() {
            let lon = input.read_f64::<LittleEndian>()?;
            let lat = input.read_f64::<LittleEndian>()?;
            let polygon_id = input.read_u32::<LittleEndian>()? as usize;
            let stored = GeoPoint::new(Degrees(lon), Degrees(lat));
            if stored.key() != expected.key() || polygon_id != level.polygon_of_vertex(id) {
                return Err(CacheError::Incompatible);
            }
        }

        let edge_count = input.read_u64::<LittleEndian>()? as usize;
        let mut adjacency = vec![Vec::new(); vertex_count];
        for _ in 0..edge_count {
            let from = input.read_u32::<LittleEndian>()? as usize;
            let to = input.read_u32::<LittleEndian>()? as usize;
            if from >= vertex_count || to >= vertex_count || to <= from {
                return Err(CacheError::Incompatible);
            }
            // Symmetric closure is reconstructed here.
            adjacency[from].push(to);
            adjacency[to].push(from);
        }
        for list in &mut adjacency {
            list.sort_unstable();
        }

        let level = &mut self.levels[0];
        level.adjacency = adjacency;
        level.adjacency_built = true;
        info!(edges = edge_count, "level-0 adjacency cache loaded");
        Ok(())
    }

    /// Stable content hash of the polygon set: FNV-1a over the quantized
    /// ring coordinates, with polygons sorted by their byte image so that
    /// input order does not matter.
    pub fn polygon_set_hash(&self) -> u64 {
        let mut images: Vec<Vec<u8>> = self
            .polygons()
            .iter()
            .map(|polygon| {
                let mut bytes = Vec::new();
                let mut push_ring = |ring: &[GeoPoint]| {
                    for p in ring {
                        let lon_q = (p.lon().value() * 1e6).round() as i64;
                        let lat_q = (p.lat().value() * 1e6).round() as i64;
                        bytes.extend_from_slice(&lon_q.to_le_bytes());
                        bytes.extend_from_slice(&lat_q.to_le_bytes());
                    }
                };
                push_ring(polygon.outer());
                for hole in polygon.holes() {
                    push_ring(hole);
                }
                bytes
            })
            .collect();
        images.sort_unstable();

        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for image in images {
            for byte in image {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
            }
        }
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheError, Hierarchy, NUM_LEVELS};
    use crate::geo_point;
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
    fn builds_all_levels_with_coarse_adjacency() {
        let hierarchy = Hierarchy::new(water_with_island());
        for i in 1..NUM_LEVELS {
            assert!(hierarchy.level(i).has_adjacency(), "level {i}");
        }
        assert!(!hierarchy.level(0).has_adjacency());
        // 50 km tolerance drops the island, so level 3 has fewer vertices.
        assert!(hierarchy.level(3).vertices().len() < hierarchy.level(0).vertices().len());
    }

    #[test]
    fn map_bounds_cover_polygon() {
        let hierarchy = Hierarchy::new(water_with_island());
        let (lo, hi) = hierarchy.map_bounds();
        assert_eq!(lo, geo_point!(-76.0, 39.0));
        assert_eq!(hi, geo_point!(-72.0, 42.0));
    }

    #[test]
    fn snap_port_to_water_finds_vertex() {
        let hierarchy = Hierarchy::new(water_with_island());
        let snapped = hierarchy.snap_port_to_water(&geo_point!(-74.79, 40.31)).unwrap();
        assert_eq!(snapped, geo_point!(-74.8, 40.3));
    }

    #[test]
    fn polygon_set_hash_is_stable_and_discriminating() {
        let a = Hierarchy::new(water_with_island());
        let b = Hierarchy::new(water_with_island());
        assert_eq!(a.polygon_set_hash(), b.polygon_set_hash());

        let different = Hierarchy::new(vec![
            Polygon::new(
                vec![
                    geo_point!(-76.0, 39.0),
                    geo_point!(-72.0, 39.0),
                    geo_point!(-72.0, 42.0),
                    geo_point!(-76.0, 42.0),
                ],
                vec![],
            )
            .unwrap(),
        ]);
        assert_ne!(a.polygon_set_hash(), different.polygon_set_hash());
    }

    #[test]
    fn adjacency_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.hvg_adj");

        let mut hierarchy = Hierarchy::new(water_with_island());
        hierarchy.build_level0_adjacency();
        hierarchy.save_adjacency_cache(&path).unwrap();

        let mut fresh = Hierarchy::new(water_with_island());
        fresh.load_adjacency_cache(&path).unwrap();
        assert!(fresh.level(0).has_adjacency());
        assert_eq!(fresh.level(0).adjacency(), hierarchy.level(0).adjacency());
    }

    #[test]
    fn cache_round_trip_preserves_planner_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.hvg_adj");

        let mut built = Hierarchy::new(water_with_island());
        built.build_level0_adjacency();
        built.save_adjacency_cache(&path).unwrap();

        let mut loaded = Hierarchy::new(water_with_island());
        loaded.load_adjacency_cache(&path).unwrap();

        let start = geo_point!(-75.5, 39.5);
        let goal = geo_point!(-73.5, 41.5);
        let from_built = built.find_path(&start, &goal);
        let from_loaded = loaded.find_path(&start, &goal);
        assert!(from_built.is_valid());
        assert_eq!(from_built.points.len(), from_loaded.points.len());
        for (a, b) in from_built.points.iter().zip(from_loaded.points.iter()) {
            assert!(a.same_location(b));
        }
    }

    #[test]
    fn cache_rejected_for_different_polygons() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.hvg_adj");

        let mut hierarchy = Hierarchy::new(water_with_island());
        hierarchy.build_level0_adjacency();
        hierarchy.save_adjacency_cache(&path).unwrap();

        let mut other = Hierarchy::new(vec![
            Polygon::new(
                vec![
                    geo_point!(-76.0, 39.0),
                    geo_point!(-72.0, 39.0),
                    geo_point!(-72.0, 42.0),
                    geo_point!(-76.0, 42.0),
                ],
                vec![],
            )
            .unwrap(),
        ]);
        match other.load_adjacency_cache(&path) {
            Err(CacheError::Incompatible) => {}
            other_result => panic!("expected Incompatible, got {other_result:?}"),
        }
        assert!(!other.level(0).has_adjacency());
    }

    #[test]
    fn save_requires_built_adjacency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.hvg_adj");
        let hierarchy = Hierarchy::new(water_with_island());
        assert!(matches!(
            hierarchy.save_adjacency_cache(&path),
            Err(CacheError::NotBuilt)
        ));
    }

    #[test]
    fn truncated_cache_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.hvg_adj");

        let mut hierarchy = Hierarchy::new(water_with_island());
        hierarchy.build_level0_adjacency();
        hierarchy.save_adjacency_cache(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        let mut fresh = Hierarchy::new(water_with_island());
        assert!(matches!(
            fresh.load_adjacency_cache(&path),
            Err(CacheError::Io(_))
        ));
    }
}
