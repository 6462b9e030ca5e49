//! A library and CLI tool for geodesic sea-route planning.
//!
//! Computes shortest navigable routes between geographic waypoints on the
//! WGS84 ellipsoid, avoiding landmasses represented as polygons with
//! holes.  Builds on [geographiclib-rs](https://docs.rs/geographiclib-rs)
//! (Karney's geodesic algorithms) for all distance, azimuth, and area
//! computations.
//!
//! The pipeline: polygon edges are indexed in a [`quadtree::Quadtree`];
//! the [`visibility::VisibilityOracle`] answers line-of-sight queries
//! against it; a four-level [`hierarchy::Hierarchy`] of progressively
//! simplified polygons supports a coarse-to-fine A* in
//! [`planner::Planner`], which refines each coarse path through a
//! [`corridor::Corridor`] and can finish with turn smoothing in
//! [`smoother::PathSmoother`].
//!
//! See [`plan_route`] for the one-shot entry point used by small tools;
//! long-lived embedders should build one [`Hierarchy`] and query it
//! repeatedly.
//!
//! # Feature flags
//!
//! - `cli` enables the additional dependencies needed by the builder CLI
//! - `rayon` (default) parallelizes adjacency construction and large
//!   spatial queries

#[cfg(not(feature = "rayon"))]
macro_rules! iter_work {
    ($i:expr) => {
        $i.iter()
    };
}

#[cfg(feature = "rayon")]
macro_rules! iter_work {
    ($i:expr) => {
        $i.par_iter()
    };
}

pub(crate) use iter_work;

pub mod corridor;
pub mod geodesic;
pub mod graph;
pub mod hierarchy;
pub mod measure;
pub mod planner;
pub mod point;
pub mod polygon;
pub mod quadtree;
pub mod segment;
pub mod smoother;
pub mod visibility;

use thiserror::Error;

pub use crate::corridor::Corridor;
pub use crate::graph::{GraphLevel, LEVEL_TOLERANCES};
pub use crate::hierarchy::{CacheError, Hierarchy, NUM_LEVELS};
pub use crate::measure::{Degrees, Meters, Seconds, SquareMeters, UnitOfMeasure};
pub use crate::planner::{CancelToken, Planner, PlannerResult, ProgressEvent};
pub use crate::point::GeoPoint;
pub use crate::polygon::{Polygon, PolygonError};
pub use crate::quadtree::{GeoRect, Quadtree};
pub use crate::segment::{GeoSegment, LineEnd, Orientation, SegmentError};
pub use crate::smoother::{PathSmoother, SmoothingConfig};
pub use crate::visibility::VisibilityOracle;

#[derive(Error, Debug)]
pub enum SeaRouteError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("Invalid polygon geometry")]
    Geometry(#[from] PolygonError),
    #[error("Segment operation error")]
    Segment(#[from] SegmentError),
    #[error("Adjacency cache error")]
    Cache(#[from] CacheError),
}

pub type Result<T> = std::result::Result<T, SeaRouteError>;

/// Plan a single route over a polygon set.
///
/// Builds a throwaway [`Hierarchy`] and runs one query; embedders making
/// repeated queries should construct the hierarchy once instead.  An
/// empty result means no navigable route exists.
pub fn plan_route(polygons: Vec<Polygon>, start: &GeoPoint, goal: &GeoPoint) -> PlannerResult {
    Hierarchy::new(polygons).find_path(start, goal)
}
