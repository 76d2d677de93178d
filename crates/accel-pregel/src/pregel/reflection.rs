//! Reflection: running oversized shards through a fixed-capacity device
//!
//! When a shard has more vertices than the device can hold, each batch is
//! *reflected*: the vertices it touches are renumbered into a dense range
//! `[0, k)`, the batch runs against compact arrays of length `k`, and the
//! results are *deflected* (scattered) back to the original ids.
//!
//! ```text
//!  original ids         dense ids
//!  ┌────┬────┬────┐     ┌───┬───┬───┐
//!  │ 91 │ 17 │ 4  │ ──▶ │ 0 │ 1 │ 2 │   first-seen order
//!  └────┴────┴────┘     └───┴───┴───┘
//!    src  dst  dst        is_destination = [false, true, true]
//! ```
//!
//! Scatter-back only writes indices that were a destination in the batch: a
//! vertex seen only as a source holds a stale accumulator on the device and
//! must not overwrite the host copy.

use std::collections::HashMap;
use std::ops::Range;

use super::config::DeviceCapacity;
use super::vertex::{Edge, Vertex, VertexId};

/// Bijection between a sparse set of original ids and `[0, k)`
#[derive(Debug, Clone, Default)]
pub struct ReflectionIndex {
    forward: HashMap<VertexId, VertexId>,
    reverse: Vec<VertexId>,
    is_destination: Vec<bool>,
}

impl ReflectionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index over destinations only (apply-phase reflection)
    pub fn from_destinations(ids: impl IntoIterator<Item = VertexId>) -> Self {
        let mut index = Self::new();
        for id in ids {
            index.insert(id, true);
        }
        index
    }

    /// Dense id for `id`, assigning the next free slot on first sight
    pub fn insert(&mut self, id: VertexId, as_destination: bool) -> VertexId {
        if let Some(dense) = self.forward.get(&id) {
            self.is_destination[dense.index()] |= as_destination;
            return *dense;
        }
        let dense = VertexId::from(self.reverse.len());
        self.forward.insert(id, dense);
        self.reverse.push(id);
        self.is_destination.push(as_destination);
        dense
    }

    /// Remap an edge into the dense space
    pub fn reflect_edge(&mut self, edge: &Edge) -> Edge {
        let src = self.insert(edge.src, false);
        let dst = self.insert(edge.dst, true);
        Edge {
            src,
            dst,
            weight: edge.weight,
        }
    }

    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }

    pub fn contains(&self, id: VertexId) -> bool {
        self.forward.contains_key(&id)
    }

    pub fn dense(&self, id: VertexId) -> Option<VertexId> {
        self.forward.get(&id).copied()
    }

    pub fn original(&self, dense: VertexId) -> VertexId {
        self.reverse[dense.index()]
    }

    pub fn is_destination(&self, dense: VertexId) -> bool {
        self.is_destination[dense.index()]
    }

    pub fn originals(&self) -> &[VertexId] {
        &self.reverse
    }

    /// Compact copy of a per-vertex array, in dense order
    pub fn gather<T: Clone>(&self, source: &[T]) -> Vec<T> {
        self.reverse.iter().map(|id| source[id.index()].clone()).collect()
    }

    /// Compact vertex records carrying their dense ids
    pub fn gather_vertices(&self, source: &[Vertex]) -> Vec<Vertex> {
        self.reverse
            .iter()
            .enumerate()
            .map(|(dense, id)| Vertex {
                id: VertexId::from(dense),
                ..source[id.index()]
            })
            .collect()
    }

    /// Compact array where destinations copy `source` and the rest get `fallback`
    pub fn gather_destinations<T: Clone>(&self, source: &[T], fallback: &T) -> Vec<T> {
        self.reverse
            .iter()
            .zip(&self.is_destination)
            .map(|(id, dest)| {
                if *dest {
                    source[id.index()].clone()
                } else {
                    fallback.clone()
                }
            })
            .collect()
    }

    /// Write compact results back to their original ids, destinations only
    pub fn scatter<T: Clone>(&self, compact: &[T], target: &mut [T]) {
        for (dense, value) in compact.iter().enumerate() {
            if self.is_destination[dense] {
                target[self.reverse[dense].index()].clone_from(value);
            }
        }
    }

    /// Deflect active flags; vertex ids on the host are left untouched
    pub fn scatter_active(&self, compact: &[Vertex], target: &mut [Vertex]) {
        for (dense, vertex) in compact.iter().enumerate() {
            if self.is_destination[dense] {
                target[self.reverse[dense].index()].is_active = vertex.is_active;
            }
        }
    }
}

/// Decides when to reflect and cuts edge windows that fit the device
#[derive(Debug, Clone, Copy)]
pub struct ReflectionMapper {
    max_vertices: usize,
    max_edges: usize,
}

impl ReflectionMapper {
    pub fn new(capacity: &DeviceCapacity) -> Self {
        Self {
            max_vertices: capacity.max_vertices,
            max_edges: capacity.max_edges,
        }
    }

    pub fn needs_reflection(&self, vertex_count: usize) -> bool {
        vertex_count > self.max_vertices
    }

    /// Split `edges` into windows of at most `max_edges` edges touching at
    /// most `max_vertices` distinct vertices, each with its own index.
    pub fn edge_windows<'a>(&self, edges: &'a [Edge]) -> EdgeWindows<'a> {
        EdgeWindows {
            edges,
            pos: 0,
            max_vertices: self.max_vertices,
            max_edges: self.max_edges,
        }
    }

    /// Chunk size for apply-phase windows over destinations
    pub fn destination_window(&self, max_messages: usize) -> usize {
        self.max_vertices.min(max_messages)
    }
}

/// One reflected edge batch
#[derive(Debug, Clone)]
pub struct EdgeWindow {
    /// Position of the window in the shard's edge slice
    pub range: Range<usize>,
    pub index: ReflectionIndex,
    /// Window edges in dense ids
    pub edges: Vec<Edge>,
}

pub struct EdgeWindows<'a> {
    edges: &'a [Edge],
    pos: usize,
    max_vertices: usize,
    max_edges: usize,
}

impl Iterator for EdgeWindows<'_> {
    type Item = EdgeWindow;

    fn next(&mut self) -> Option<EdgeWindow> {
        if self.pos >= self.edges.len() {
            return None;
        }
        let start = self.pos;
        let mut index = ReflectionIndex::new();
        let mut reflected = Vec::new();

        while let Some(edge) = self.edges.get(self.pos) {
            if reflected.len() == self.max_edges {
                break;
            }
            let new_src = !index.contains(edge.src);
            let new_dst = edge.dst != edge.src && !index.contains(edge.dst);
            let grow = usize::from(new_src) + usize::from(new_dst);
            if index.len() + grow > self.max_vertices {
                break;
            }
            reflected.push(index.reflect_edge(edge));
            self.pos += 1;
        }

        Some(EdgeWindow {
            range: start..self.pos,
            index,
            edges: reflected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(src: u32, dst: u32) -> Edge {
        Edge::new(src, dst, 1.0)
    }

    #[test]
    fn test_first_seen_order_and_markers() {
        let mut index = ReflectionIndex::new();
        let a = index.reflect_edge(&e(91, 17));
        let b = index.reflect_edge(&e(17, 4));

        assert_eq!((a.src, a.dst), (VertexId(0), VertexId(1)));
        assert_eq!((b.src, b.dst), (VertexId(1), VertexId(2)));
        assert_eq!(index.originals(), &[VertexId(91), VertexId(17), VertexId(4)]);
        assert!(!index.is_destination(VertexId(0)));
        assert!(index.is_destination(VertexId(1)));
        assert!(index.is_destination(VertexId(2)));
        assert_eq!(index.dense(VertexId(4)), Some(VertexId(2)));
        assert_eq!(index.original(VertexId(2)), VertexId(4));
    }

    #[test]
    fn test_scatter_skips_source_only_vertices() {
        let mut index = ReflectionIndex::new();
        index.reflect_edge(&e(3, 1));

        let mut host = vec![10.0, 11.0, 12.0, 13.0];
        // Dense slot 0 (original 3) is source-only and holds junk
        index.scatter(&[-1.0, 99.0], &mut host);

        assert_eq!(host, vec![10.0, 99.0, 12.0, 13.0]);
    }

    #[test]
    fn test_gather_vertices_uses_dense_ids() {
        let vertices: Vec<Vertex> = (0u32..5).map(|i| Vertex::new(i).with_active(i % 2 == 0)).collect();
        let index = ReflectionIndex::from_destinations([VertexId(4), VertexId(1)]);

        let compact = index.gather_vertices(&vertices);
        assert_eq!(compact[0], Vertex::new(0u32).with_active(true));
        assert_eq!(compact[1], Vertex::new(1u32).with_active(false));

        let mut host = vertices.clone();
        let flipped: Vec<Vertex> = compact.iter().map(|v| v.with_active(!v.is_active)).collect();
        index.scatter_active(&flipped, &mut host);
        assert!(!host[4].is_active);
        assert!(host[1].is_active);
        assert_eq!(host[4].id, VertexId(4));
    }

    #[test]
    fn test_gather_destinations_uses_fallback_for_sources() {
        let mut index = ReflectionIndex::new();
        index.reflect_edge(&e(0, 2));
        let compact = index.gather_destinations(&[5, 6, 7], &0);
        assert_eq!(compact, vec![0, 7]);
    }

    #[test]
    fn test_windows_respect_vertex_capacity() {
        let mapper = ReflectionMapper::new(&DeviceCapacity::new(3, 10, 10, 4));
        let edges = vec![e(0, 1), e(1, 2), e(2, 3), e(3, 4), e(5, 5)];

        let windows: Vec<_> = mapper.edge_windows(&edges).collect();
        let ranges: Vec<_> = windows.iter().map(|w| w.range.clone()).collect();
        assert_eq!(ranges, vec![0..2, 2..4, 4..5]);
        assert!(windows.iter().all(|w| w.index.len() <= 3));
        assert_eq!(windows[2].index.len(), 1);
    }

    #[test]
    fn test_windows_respect_edge_capacity() {
        let mapper = ReflectionMapper::new(&DeviceCapacity::new(100, 2, 10, 4));
        let edges = vec![e(0, 1), e(0, 2), e(0, 3), e(0, 4), e(0, 5)];

        let sizes: Vec<usize> = mapper.edge_windows(&edges).map(|w| w.edges.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(mapper.needs_reflection(101));
        assert!(!mapper.needs_reflection(100));
    }
}
