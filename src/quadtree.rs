//! Spatial index of polygon edges
//!
//! A 4-ary tree over the map's lon/lat rectangle.  Nodes live in an arena
//! and address each other by index, so the tree is a flat `Vec` that can be
//! cleared wholesale and shared freely across threads once built.  A
//! segment is stored in every leaf whose rectangle its geometry touches
//! (intentional duplication, so leaf-local queries are complete); segments
//! that fit no child after subdivision stay at the parent.
//!
//! Segments that wrap the ±180° meridian are split into two pieces before
//! any insertion or query; see [`GeoSegment::split_at_antimeridian`].

use std::collections::{BinaryHeap, HashSet};
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::iter_work;
use crate::measure::{Degrees, UnitOfMeasure};
use crate::point::GeoPoint;
use crate::polygon::Polygon;
use crate::segment::GeoSegment;

/// Segments a leaf can hold before it subdivides.
const MAX_SEGMENTS_PER_NODE: usize = 100;

/// Subdivision stops below this depth even if a leaf is over capacity;
/// co-located duplicate segments would otherwise recurse without bound.
const MAX_SUBDIVISION_DEPTH: u32 = 24;

/// Indexed-segment count above which tree-wide queries fan out to rayon.
const PARALLEL_THRESHOLD: usize = 1000;

/// Tolerance for map-boundary proximity checks, in degrees.
const BOUNDARY_TOLERANCE: Degrees<f64> = Degrees(0.1);

/// Upper bound accepted for a serialized node's segment count; anything
/// larger is treated as stream corruption.
const MAX_SERIALIZED_SEGMENTS: u64 = 10_000_000;

/// An axis-aligned lon/lat rectangle.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct GeoRect {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl GeoRect {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> GeoRect {
        GeoRect {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    pub fn from_corners(lo: &GeoPoint, hi: &GeoPoint) -> GeoRect {
        GeoRect::new(
            lo.lon().value(),
            lo.lat().value(),
            hi.lon().value(),
            hi.lat().value(),
        )
    }

    pub fn contains(&self, p: &GeoPoint) -> bool {
        let lon = p.lon().value();
        let lat = p.lat().value();
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    pub fn intersects(&self, other: &GeoRect) -> bool {
        self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
            && self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
    }

    /// Grow by the given margins, clamped to valid coordinates.
    pub fn expanded(&self, dlon: f64, dlat: f64) -> GeoRect {
        GeoRect::new(
            (self.min_lon - dlon).max(-180.0),
            (self.min_lat - dlat).max(-90.0),
            (self.max_lon + dlon).min(180.0),
            (self.max_lat + dlat).min(90.0),
        )
    }
}

struct Node {
    min_point: GeoPoint,
    max_point: GeoPoint,
    segments: Vec<GeoSegment>,
    /// Quadrant children {NW=0, NE=1, SW=2, SE=3}; `None` for leaves.
    children: Option<[usize; 4]>,
    depth: u32,
}

impl Node {
    fn new(min_point: GeoPoint, max_point: GeoPoint, depth: u32) -> Node {
        Node {
            min_point,
            max_point,
            segments: Vec::new(),
            children: None,
            depth,
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    fn rect(&self) -> GeoRect {
        GeoRect::from_corners(&self.min_point, &self.max_point)
    }
}

/// Spatial index over the edges of a polygon set.
pub struct Quadtree {
    nodes: Vec<Node>,
}

const ROOT: usize = 0;

impl Quadtree {
    /// An empty tree over the whole world rectangle.
    pub fn new() -> Quadtree {
        Quadtree {
            nodes: vec![Node::new(
                GeoPoint::new(Degrees(-180.0), Degrees(-90.0)),
                GeoPoint::new(Degrees(180.0), Degrees(90.0)),
                0,
            )],
        }
    }

    /// Index every edge of every ring of the given polygons.  The root
    /// rectangle is the envelope of all vertices.
    pub fn from_polygons(polygons: &[Polygon]) -> Quadtree {
        let mut min_lon = f64::MAX;
        let mut min_lat = f64::MAX;
        let mut max_lon = f64::MIN;
        let mut max_lat = f64::MIN;
        let mut segments = Vec::new();
        for polygon in polygons {
            let (lo, hi) = polygon.bounding_box();
            min_lon = min_lon.min(lo.lon().value());
            min_lat = min_lat.min(lo.lat().value());
            max_lon = max_lon.max(hi.lon().value());
            max_lat = max_lat.max(hi.lat().value());
            segments.extend(polygon.edges());
        }
        if segments.is_empty() {
            return Quadtree::new();
        }

        let mut tree = Quadtree {
            nodes: vec![Node::new(
                GeoPoint::new(Degrees(min_lon), Degrees(min_lat)),
                GeoPoint::new(Degrees(max_lon), Degrees(max_lat)),
                0,
            )],
        };
        tree.nodes[ROOT].segments = segments;
        if tree.nodes[ROOT].segments.len() > MAX_SEGMENTS_PER_NODE {
            tree.subdivide(ROOT);
        }
        tree
    }

    /// Drop every node and segment, leaving an empty world-rect tree.
    pub fn clear(&mut self) {
        *self = Quadtree::new();
    }

    /// Number of segments stored, counting per-leaf duplicates.
    pub fn stored_segment_count(&self) -> usize {
        self.nodes.iter().map(|n| n.segments.len()).sum()
    }

    pub fn max_depth(&self) -> u32 {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    pub fn map_min_point(&self) -> GeoPoint {
        self.nodes[ROOT].min_point
    }

    pub fn map_max_point(&self) -> GeoPoint {
        self.nodes[ROOT].max_point
    }

    pub fn map_width(&self) -> Degrees<f64> {
        self.nodes[ROOT].max_point.lon() - self.nodes[ROOT].min_point.lon()
    }

    pub fn map_height(&self) -> Degrees<f64> {
        self.nodes[ROOT].max_point.lat() - self.nodes[ROOT].min_point.lat()
    }

    /// Whether a point sits within [`BOUNDARY_TOLERANCE`] of the map's
    /// east or west edge.
    pub fn is_near_boundary(&self, point: &GeoPoint) -> bool {
        let lon = point.lon().value();
        (lon - self.map_min_point().lon().value()).abs() <= BOUNDARY_TOLERANCE.value()
            || (lon - self.map_max_point().lon().value()).abs() <= BOUNDARY_TOLERANCE.value()
    }

    /// Insert one segment, splitting at the antimeridian first.
    pub fn insert(&mut self, segment: &GeoSegment) {
        for piece in segment.split_at_antimeridian() {
            self.insert_piece(piece, ROOT);
        }
    }

    fn insert_piece(&mut self, segment: GeoSegment, id: usize) {
        if !self.segment_touches_node(id, &segment) {
            return;
        }
        if self.nodes[id].is_leaf() {
            if self.nodes[id].segments.len() < MAX_SEGMENTS_PER_NODE
                || self.nodes[id].depth >= MAX_SUBDIVISION_DEPTH
            {
                self.nodes[id].segments.push(segment);
                return;
            }
            self.subdivide(id);
        }
        let children = self.nodes[id].children.expect("subdivided node");
        let mut placed = false;
        for child in children {
            if self.segment_touches_node(child, &segment) {
                self.insert_piece(segment, child);
                placed = true;
            }
        }
        if !placed {
            // Stuck segment: touches the parent but no child rectangle.
            self.nodes[id].segments.push(segment);
        }
    }

    /// Remove a segment (matched by endpoints, either direction) from
    /// every leaf holding it.  Returns false when nothing matched.
    pub fn delete(&mut self, segment: &GeoSegment) -> bool {
        let mut found = false;
        for piece in segment.split_at_antimeridian() {
            let leaves = self.nodes_touching_piece(&piece);
            for id in leaves {
                let node = &mut self.nodes[id];
                let before = node.segments.len();
                node.segments.retain(|s| !s.same_endpoints(&piece));
                found |= node.segments.len() < before;
            }
        }
        found
    }

    fn subdivide(&mut self, id: usize) {
        if !self.nodes[id].is_leaf()
            || self.nodes[id].segments.is_empty()
            || self.nodes[id].depth >= MAX_SUBDIVISION_DEPTH
        {
            return;
        }

        let min = self.nodes[id].min_point;
        let max = self.nodes[id].max_point;
        let depth = self.nodes[id].depth;
        let center_lon = (min.lon().value() + max.lon().value()) / 2.0;
        let center_lat = (min.lat().value() + max.lat().value()) / 2.0;

        let mut children = [0usize; 4];
        for (i, slot) in children.iter_mut().enumerate() {
            let (min_lon, max_lon) = if i % 2 == 0 {
                (min.lon().value(), center_lon)
            } else {
                (center_lon, max.lon().value())
            };
            let (min_lat, max_lat) = if i < 2 {
                (center_lat, max.lat().value())
            } else {
                (min.lat().value(), center_lat)
            };
            *slot = self.nodes.len();
            self.nodes.push(Node::new(
                GeoPoint::new(Degrees(min_lon), Degrees(min_lat)),
                GeoPoint::new(Degrees(max_lon), Degrees(max_lat)),
                depth + 1,
            ));
        }
        self.nodes[id].children = Some(children);

        let segments = std::mem::take(&mut self.nodes[id].segments);
        let mut stuck = Vec::new();
        for segment in segments {
            for piece in segment.split_at_antimeridian() {
                let mut distributed = false;
                for child in children {
                    if self.segment_touches_node(child, &piece) {
                        self.nodes[child].segments.push(piece);
                        distributed = true;
                        // No break: a piece may straddle several children.
                    }
                }
                if !distributed {
                    stuck.push(piece);
                }
            }
        }
        self.nodes[id].segments = stuck;

        for child in children {
            if self.nodes[child].segments.len() > MAX_SEGMENTS_PER_NODE {
                self.subdivide(child);
            }
        }
    }

    /// Leaf nodes whose rectangle the segment could cross.
    pub fn intersecting_leaf_nodes(&self, segment: &GeoSegment) -> Vec<usize> {
        let mut leaves = Vec::new();
        for piece in segment.split_at_antimeridian() {
            self.collect_intersecting_leaves(&piece, ROOT, &mut leaves);
        }
        leaves
    }

    /// Parallel variant of [`Quadtree::intersecting_leaf_nodes`]; falls
    /// back to the sequential walk for small trees.
    pub fn intersecting_leaf_nodes_parallel(&self, segment: &GeoSegment) -> Vec<usize> {
        if self.stored_segment_count() < PARALLEL_THRESHOLD {
            return self.intersecting_leaf_nodes(segment);
        }
        let Some(children) = self.nodes[ROOT].children else {
            return self.intersecting_leaf_nodes(segment);
        };

        let pieces = segment.split_at_antimeridian();
        let mut leaves: Vec<usize> = iter_work!(children)
            .map(|&child| {
                let mut local = Vec::new();
                for piece in &pieces {
                    self.collect_intersecting_leaves(piece, child, &mut local);
                }
                local
            })
            .flatten()
            .collect();
        // Stuck root segments still live at the root itself.
        for piece in &pieces {
            if !self.nodes[ROOT].segments.is_empty() && self.segment_touches_node(ROOT, piece) {
                leaves.push(ROOT);
                break;
            }
        }
        leaves
    }

    fn collect_intersecting_leaves(&self, segment: &GeoSegment, id: usize, out: &mut Vec<usize>) {
        if !self.segment_touches_node(id, segment) {
            return;
        }
        match self.nodes[id].children {
            None => out.push(id),
            Some(children) => {
                // Stuck segments at an internal node must still be seen.
                if !self.nodes[id].segments.is_empty() {
                    out.push(id);
                }
                for child in children {
                    self.collect_intersecting_leaves(segment, child, out);
                }
            }
        }
    }

    fn nodes_touching_piece(&self, piece: &GeoSegment) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_intersecting_leaves(piece, ROOT, &mut out);
        out
    }

    /// Segments stored at the given node (leaf contents, or the stuck
    /// segments of an internal node).
    pub fn segments_in_node(&self, id: usize) -> &[GeoSegment] {
        &self.nodes[id].segments
    }

    /// All indexed segments whose geometry touches `range`.
    pub fn segments_in_range(&self, range: &GeoRect) -> Vec<GeoSegment> {
        let mut found = Vec::new();
        self.range_query_helper(range, ROOT, &mut found);
        found
    }

    /// Parallel variant of [`Quadtree::segments_in_range`].
    pub fn segments_in_range_parallel(&self, range: &GeoRect) -> Vec<GeoSegment> {
        if self.stored_segment_count() < PARALLEL_THRESHOLD {
            return self.segments_in_range(range);
        }
        let mut candidates = Vec::new();
        self.collect_range_nodes(range, ROOT, &mut candidates);
        iter_work!(candidates)
            .map(|&id| {
                self.nodes[id]
                    .segments
                    .iter()
                    .filter(|s| segment_intersects_range(s, range))
                    .copied()
                    .collect::<Vec<_>>()
            })
            .flatten()
            .collect()
    }

    fn collect_range_nodes(&self, range: &GeoRect, id: usize, out: &mut Vec<usize>) {
        let node = &self.nodes[id];
        if !range.intersects(&node.rect()) {
            return;
        }
        if !node.segments.is_empty() {
            out.push(id);
        }
        if let Some(children) = node.children {
            for child in children {
                self.collect_range_nodes(range, child, out);
            }
        }
    }

    fn range_query_helper(&self, range: &GeoRect, id: usize, found: &mut Vec<GeoSegment>) {
        let node = &self.nodes[id];
        if !range.intersects(&node.rect()) {
            return;
        }
        for segment in &node.segments {
            if segment_intersects_range(segment, range) {
                found.push(*segment);
            }
        }
        if let Some(children) = node.children {
            for child in children {
                self.range_query_helper(range, child, found);
            }
        }
    }

    /// Unique segment endpoints lying inside `range`.
    pub fn vertices_in_range(&self, range: &GeoRect) -> Vec<GeoPoint> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for segment in self.segments_in_range(range) {
            for endpoint in [segment.start(), segment.end()] {
                if range.contains(&endpoint) && seen.insert(endpoint.key()) {
                    out.push(endpoint);
                }
            }
        }
        out
    }

    /// The indexed segment nearest to `point`, by true geodesic distance.
    ///
    /// Best-first search: nodes are expanded in order of a lower bound on
    /// their distance, and pruned once the bound exceeds the best hit.
    pub fn nearest_edge(&self, point: &GeoPoint) -> Option<GeoSegment> {
        let mut best: Option<(GeoSegment, f64)> = None;
        self.best_first(point, |node, best_distance| {
            let mut improved = None;
            let mut closest = best_distance;
            for segment in &node.segments {
                let d = segment.distance_to_point(point).value();
                if d < closest {
                    closest = d;
                    improved = Some((*segment, d));
                }
            }
            improved
        }, &mut best);
        best.map(|(segment, _)| segment)
    }

    /// The indexed vertex nearest to `point`.
    pub fn nearest_vertex(&self, point: &GeoPoint) -> Option<GeoPoint> {
        let mut best: Option<(GeoPoint, f64)> = None;
        self.best_first(point, |node, best_distance| {
            let candidate = if node.segments.len() > PARALLEL_THRESHOLD {
                iter_work!(node.segments)
                    .map(|segment| {
                        let ds = point.distance(&segment.start()).value();
                        let de = point.distance(&segment.end()).value();
                        if ds <= de {
                            (segment.start(), ds)
                        } else {
                            (segment.end(), de)
                        }
                    })
                    .min_by(|a, b| a.1.total_cmp(&b.1))
            } else {
                node.segments
                    .iter()
                    .map(|segment| {
                        let ds = point.distance(&segment.start()).value();
                        let de = point.distance(&segment.end()).value();
                        if ds <= de {
                            (segment.start(), ds)
                        } else {
                            (segment.end(), de)
                        }
                    })
                    .min_by(|a, b| a.1.total_cmp(&b.1))
            };
            candidate.filter(|(_, d)| *d < best_distance)
        }, &mut best);
        best.map(|(vertex, _)| vertex)
    }

    /// Generic best-first expansion over nodes ordered by rectangle
    /// lower-bound distance.  `visit` inspects one node's segments and
    /// returns an improvement if it beats the current best.
    fn best_first<T: Copy>(
        &self,
        point: &GeoPoint,
        mut visit: impl FnMut(&Node, f64) -> Option<(T, f64)>,
        best: &mut Option<(T, f64)>,
    ) {
        #[derive(PartialEq)]
        struct Entry {
            bound: f64,
            id: usize,
        }
        impl Eq for Entry {}
        impl PartialOrd for Entry {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }
        impl Ord for Entry {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                // Min-heap on the lower bound.
                other
                    .bound
                    .total_cmp(&self.bound)
                    .then_with(|| other.id.cmp(&self.id))
            }
        }

        let mut queue = BinaryHeap::new();
        queue.push(Entry { bound: 0.0, id: ROOT });

        while let Some(Entry { bound, id }) = queue.pop() {
            let best_distance = best.map_or(f64::INFINITY, |(_, d)| d);
            if bound >= best_distance {
                break;
            }
            let node = &self.nodes[id];
            if let Some(improved) = visit(node, best_distance) {
                *best = Some(improved);
            }
            if let Some(children) = node.children {
                for child in children {
                    let child_bound = self.distance_to_node_rect(point, child);
                    if child_bound < best.map_or(f64::INFINITY, |(_, d)| d) {
                        queue.push(Entry {
                            bound: child_bound,
                            id: child,
                        });
                    }
                }
            }
        }
    }

    /// Lower bound on the geodesic distance from `point` to anything in a
    /// node's rectangle: zero inside, else the minimum over the four
    /// corners and the four axis-aligned wall projections.
    fn distance_to_node_rect(&self, point: &GeoPoint, id: usize) -> f64 {
        let node = &self.nodes[id];
        if node.rect().contains(point) {
            return 0.0;
        }
        let min = node.min_point;
        let max = node.max_point;
        let candidates = [
            GeoPoint::new(min.lon(), min.lat()),
            GeoPoint::new(min.lon(), max.lat()),
            GeoPoint::new(max.lon(), min.lat()),
            GeoPoint::new(max.lon(), max.lat()),
            GeoPoint::new(point.lon(), min.lat()),
            GeoPoint::new(point.lon(), max.lat()),
            GeoPoint::new(min.lon(), point.lat()),
            GeoPoint::new(max.lon(), point.lat()),
        ];
        candidates
            .iter()
            .map(|corner| point.distance(corner).value())
            .fold(f64::INFINITY, f64::min)
    }

    /// Look up an indexed segment connecting the two points, in either
    /// direction.  Only leaves the synthetic segment could cross are
    /// searched.
    pub fn find_segment(&self, p1: &GeoPoint, p2: &GeoPoint) -> Option<GeoSegment> {
        let probe = GeoSegment::new(*p1, *p2);
        for id in self.intersecting_leaf_nodes(&probe) {
            for segment in &self.nodes[id].segments {
                if (segment.start().same_location(p1) && segment.end().same_location(p2))
                    || (segment.start().same_location(p2) && segment.end().same_location(p1))
                {
                    return Some(*segment);
                }
            }
        }
        None
    }

    /// Bounding-box plus edge-crossing test of a (pre-split) segment
    /// against a node's rectangle, with a second attempt on the split
    /// pieces for wrapping input.
    fn segment_touches_node(&self, id: usize, segment: &GeoSegment) -> bool {
        if self.rect_touches(id, segment) {
            return true;
        }
        if segment.crosses_antimeridian() {
            return segment
                .split_at_antimeridian()
                .iter()
                .any(|piece| self.rect_touches(id, piece));
        }
        false
    }

    fn rect_touches(&self, id: usize, segment: &GeoSegment) -> bool {
        let rect = self.nodes[id].rect();
        if rect.contains(&segment.start()) || rect.contains(&segment.end()) {
            return true;
        }
        // Cheap reject before building edge geodesics.
        let seg_rect = GeoRect::new(
            segment.min_lon(),
            segment.min_lat(),
            segment.max_lon(),
            segment.max_lat(),
        );
        if !rect.intersects(&seg_rect) {
            return false;
        }
        rect_edges(&rect)
            .iter()
            .any(|edge| segment.intersects(edge, false))
    }

    /// Serialize the tree, preorder, little-endian.
    pub fn serialize<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        self.serialize_node(out, Some(ROOT))
    }

    fn serialize_node<W: Write>(&self, out: &mut W, id: Option<usize>) -> std::io::Result<()> {
        let Some(id) = id else {
            out.write_u8(0)?;
            return Ok(());
        };
        let node = &self.nodes[id];
        out.write_u8(1)?;
        out.write_f64::<LittleEndian>(node.min_point.lon().value())?;
        out.write_f64::<LittleEndian>(node.min_point.lat().value())?;
        out.write_f64::<LittleEndian>(node.max_point.lon().value())?;
        out.write_f64::<LittleEndian>(node.max_point.lat().value())?;
        out.write_u64::<LittleEndian>(node.segments.len() as u64)?;
        for segment in &node.segments {
            out.write_f64::<LittleEndian>(segment.start().lon().value())?;
            out.write_f64::<LittleEndian>(segment.start().lat().value())?;
            out.write_f64::<LittleEndian>(segment.end().lon().value())?;
            out.write_f64::<LittleEndian>(segment.end().lat().value())?;
        }
        out.write_u8(node.is_leaf() as u8)?;
        match node.children {
            Some(children) => {
                for child in children {
                    self.serialize_node(out, Some(child))?;
                }
            }
            None => {
                for _ in 0..4 {
                    self.serialize_node(out, None)?;
                }
            }
        }
        Ok(())
    }

    /// Rebuild the tree from a stream produced by [`Quadtree::serialize`].
    /// The current contents are cleared first; on any read failure the
    /// tree is left cleared and the error surfaced.
    pub fn deserialize<R: Read>(&mut self, input: &mut R) -> std::io::Result<()> {
        self.clear();
        self.nodes.clear();
        match Self::deserialize_node(input, &mut self.nodes, 0) {
            Ok(Some(_)) => Ok(()),
            Ok(None) => {
                self.clear();
                Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "serialized quadtree has a null root",
                ))
            }
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    fn deserialize_node<R: Read>(
        input: &mut R,
        nodes: &mut Vec<Node>,
        depth: u32,
    ) -> std::io::Result<Option<usize>> {
        if input.read_u8()? == 0 {
            return Ok(None);
        }

        let min_lon = input.read_f64::<LittleEndian>()?;
        let min_lat = input.read_f64::<LittleEndian>()?;
        let max_lon = input.read_f64::<LittleEndian>()?;
        let max_lat = input.read_f64::<LittleEndian>()?;
        let id = nodes.len();
        nodes.push(Node::new(
            GeoPoint::new(Degrees(min_lon), Degrees(min_lat)),
            GeoPoint::new(Degrees(max_lon), Degrees(max_lat)),
            depth,
        ));

        let count = input.read_u64::<LittleEndian>()?;
        if count > MAX_SERIALIZED_SEGMENTS {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "implausible segment count in quadtree stream",
            ));
        }
        for _ in 0..count {
            let s_lon = input.read_f64::<LittleEndian>()?;
            let s_lat = input.read_f64::<LittleEndian>()?;
            let e_lon = input.read_f64::<LittleEndian>()?;
            let e_lat = input.read_f64::<LittleEndian>()?;
            nodes[id].segments.push(GeoSegment::new(
                GeoPoint::new(Degrees(s_lon), Degrees(s_lat)),
                GeoPoint::new(Degrees(e_lon), Degrees(e_lat)),
            ));
        }

        let is_leaf = input.read_u8()? != 0;
        let mut children = [None; 4];
        for slot in &mut children {
            *slot = Self::deserialize_node(input, nodes, depth + 1)?;
        }

        let present = children.iter().filter(|c| c.is_some()).count();
        match present {
            0 => {}
            4 if !is_leaf => {
                nodes[id].children =
                    Some([children[0].unwrap(), children[1].unwrap(), children[2].unwrap(), children[3].unwrap()]);
            }
            _ => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "inconsistent child records in quadtree stream",
                ));
            }
        }
        Ok(Some(id))
    }
}

impl Default for Quadtree {
    fn default() -> Self {
        Quadtree::new()
    }
}

/// Whether a segment touches an arbitrary query rectangle: an endpoint
/// inside, or a crossing with one of the rectangle's edges.
fn segment_intersects_range(segment: &GeoSegment, range: &GeoRect) -> bool {
    if range.contains(&segment.start()) || range.contains(&segment.end()) {
        return true;
    }
    rect_edges(range)
        .iter()
        .any(|edge| segment.intersects(edge, false))
}

fn rect_edges(rect: &GeoRect) -> [GeoSegment; 4] {
    let sw = GeoPoint::new(Degrees(rect.min_lon), Degrees(rect.min_lat));
    let se = GeoPoint::new(Degrees(rect.max_lon), Degrees(rect.min_lat));
    let nw = GeoPoint::new(Degrees(rect.min_lon), Degrees(rect.max_lat));
    let ne = GeoPoint::new(Degrees(rect.max_lon), Degrees(rect.max_lat));
    [
        GeoSegment::new(sw, se),
        GeoSegment::new(nw, ne),
        GeoSegment::new(sw, nw),
        GeoSegment::new(se, ne),
    ]
}
