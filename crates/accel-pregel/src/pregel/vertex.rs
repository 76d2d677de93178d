//! Vertex and edge records
//!
//! Vertex ids are dense: a vertex's id is its position in the canonical
//! vertex array and never changes during a run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense vertex identifier in `0..vertex_count`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VertexId(pub u32);

impl VertexId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Position of this vertex in per-vertex arrays
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for VertexId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<usize> for VertexId {
    fn from(id: usize) -> Self {
        Self(id as u32)
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Per-vertex bookkeeping shared by every worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertex {
    /// Stable position in the canonical vertex array
    pub id: VertexId,

    /// Whether the vertex changed materially in the last apply phase
    pub is_active: bool,

    /// Seed slot for algorithms with distinguished sources; `None` if not a seed
    pub init_index: Option<usize>,
}

impl Vertex {
    pub fn new(id: impl Into<VertexId>) -> Self {
        Self {
            id: id.into(),
            is_active: false,
            init_index: None,
        }
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.is_active = active;
        self
    }

    pub fn with_init_index(mut self, index: usize) -> Self {
        self.init_index = Some(index);
        self
    }

    pub fn is_seed(&self) -> bool {
        self.init_index.is_some()
    }
}

/// A directed, weighted edge
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub src: VertexId,
    pub dst: VertexId,
    pub weight: f64,
}

impl Edge {
    pub fn new(src: impl Into<VertexId>, dst: impl Into<VertexId>, weight: f64) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            weight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_builders() {
        let v = Vertex::new(3u32).with_active(true).with_init_index(0);
        assert_eq!(v.id, VertexId(3));
        assert!(v.is_active);
        assert!(v.is_seed());
        assert_eq!(v.id.index(), 3);
        assert_eq!(v.id.to_string(), "v3");
    }

    #[test]
    fn test_vertex_id_serializes_as_integer() {
        let json = serde_json::to_string(&Edge::new(0u32, 1u32, 0.5)).unwrap();
        assert_eq!(json, r#"{"src":0,"dst":1,"weight":0.5}"#);
    }
}
