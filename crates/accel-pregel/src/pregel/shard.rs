//! Graph and per-worker shards
//!
//! Every worker sees the full vertex set but only a contiguous slice of the
//! edge list. Slices are cut as `[(i * E) / W, ((i + 1) * E) / W)` so shard
//! sizes differ by at most one edge.

use std::ops::Range;

use super::error::EngineError;
use super::vertex::{Edge, Vertex, VertexId};

/// A fully loaded graph, before partitioning
#[derive(Debug, Clone)]
pub struct Graph {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    seeds: Vec<VertexId>,
    filtered: Vec<bool>,
}

impl Graph {
    /// Build a graph over `vertex_count` dense vertices.
    ///
    /// Fails with `IllegalParameter` if the vertex count is zero or an edge
    /// references a vertex outside `0..vertex_count`.
    pub fn new(vertex_count: usize, edges: Vec<Edge>) -> Result<Self, EngineError> {
        if vertex_count == 0 {
            return Err(EngineError::illegal("vertex count must be positive"));
        }
        if vertex_count > u32::MAX as usize {
            return Err(EngineError::illegal(format!(
                "vertex count {vertex_count} exceeds the id space"
            )));
        }
        if let Some(edge) = edges
            .iter()
            .find(|e| e.src.index() >= vertex_count || e.dst.index() >= vertex_count)
        {
            return Err(EngineError::illegal(format!(
                "edge {} -> {} references a vertex outside 0..{vertex_count}",
                edge.src, edge.dst
            )));
        }

        Ok(Self {
            vertices: (0..vertex_count).map(Vertex::new).collect(),
            edges,
            seeds: Vec::new(),
            filtered: vec![false; vertex_count],
        })
    }

    /// Mark seed vertices; the i-th seed gets `init_index = Some(i)`
    pub fn with_seeds(mut self, seeds: Vec<VertexId>) -> Result<Self, EngineError> {
        for v in &mut self.vertices {
            v.init_index = None;
        }
        for (slot, seed) in seeds.iter().enumerate() {
            let vertex = self
                .vertices
                .get_mut(seed.index())
                .ok_or_else(|| EngineError::illegal(format!("seed {seed} is not a vertex")))?;
            if vertex.init_index.is_some() {
                return Err(EngineError::illegal(format!("seed {seed} listed twice")));
            }
            vertex.init_index = Some(slot);
        }
        self.seeds = seeds;
        Ok(self)
    }

    /// Exclude vertices from message generation
    pub fn with_filtered(mut self, filtered: &[VertexId]) -> Result<Self, EngineError> {
        for id in filtered {
            let flag = self
                .filtered
                .get_mut(id.index())
                .ok_or_else(|| EngineError::illegal(format!("filtered vertex {id} is not a vertex")))?;
            *flag = true;
        }
        Ok(self)
    }

    /// Rewrite every edge weight as `1 / outDegree(src)`
    pub fn normalize_by_out_degree(&mut self) {
        let degrees = self.out_degrees();
        for edge in &mut self.edges {
            edge.weight = 1.0 / degrees[edge.src.index()] as f64;
        }
    }

    pub fn out_degrees(&self) -> Vec<u32> {
        let mut degrees = vec![0u32; self.vertices.len()];
        for edge in &self.edges {
            degrees[edge.src.index()] += 1;
        }
        degrees
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn seeds(&self) -> &[VertexId] {
        &self.seeds
    }

    pub fn filtered(&self) -> &[bool] {
        &self.filtered
    }

    /// Contiguous edge ranges for `workers` shards
    pub fn partition(&self, workers: usize) -> Result<Vec<Range<usize>>, EngineError> {
        let edges = self.edges.len();
        if workers == 0 {
            return Err(EngineError::illegal("worker count must be positive"));
        }
        if edges < workers {
            return Err(EngineError::illegal(format!(
                "{edges} edges cannot feed {workers} workers"
            )));
        }
        Ok((0..workers)
            .map(|i| (i * edges) / workers..((i + 1) * edges) / workers)
            .collect())
    }

    /// Cut the shard owned by `worker` for the given edge range
    pub fn shard(&self, worker: usize, range: Range<usize>) -> GraphShard {
        GraphShard {
            worker,
            vertices: self.vertices.clone(),
            edges: self.edges[range].to_vec(),
            filtered: self.filtered.clone(),
        }
    }
}

/// A worker's view of the graph: the shared vertex set plus a private edge slice
#[derive(Debug, Clone)]
pub struct GraphShard {
    worker: usize,
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    filtered: Vec<bool>,
}

impl GraphShard {
    /// Assemble a shard from transferred parts, validating counts.
    pub fn from_parts(
        worker: usize,
        vertex_count: usize,
        vertices: Vec<Vertex>,
        edges: Vec<Edge>,
        seeds: Vec<VertexId>,
        filtered: Vec<bool>,
    ) -> Result<Self, EngineError> {
        if vertex_count == 0 {
            return Err(EngineError::illegal("vertex count must be positive"));
        }
        if edges.is_empty() {
            return Err(EngineError::illegal(format!("worker {worker} received no edges")));
        }
        if vertices.len() != vertex_count || filtered.len() != vertex_count {
            return Err(EngineError::illegal(format!(
                "vertex count {vertex_count} disagrees with {} vertices / {} filter flags",
                vertices.len(),
                filtered.len()
            )));
        }
        if let Some((pos, v)) = vertices
            .iter()
            .enumerate()
            .find(|(pos, v)| v.id.index() != *pos)
        {
            return Err(EngineError::illegal(format!(
                "vertex at position {pos} carries id {}",
                v.id
            )));
        }
        if let Some(edge) = edges
            .iter()
            .find(|e| e.src.index() >= vertex_count || e.dst.index() >= vertex_count)
        {
            return Err(EngineError::illegal(format!(
                "edge {} -> {} references a vertex outside 0..{vertex_count}",
                edge.src, edge.dst
            )));
        }
        // Policies read seeds through `init_index`; the list must agree with it
        for (slot, seed) in seeds.iter().enumerate() {
            let vertex = vertices
                .get(seed.index())
                .ok_or_else(|| EngineError::illegal(format!("seed {seed} is not a vertex")))?;
            if vertex.init_index != Some(slot) {
                return Err(EngineError::illegal(format!(
                    "seed {seed} is slot {slot} but its vertex carries init index {:?}",
                    vertex.init_index
                )));
            }
        }

        Ok(Self {
            worker,
            vertices,
            edges,
            filtered,
        })
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn vertices_mut(&mut self) -> &mut [Vertex] {
        &mut self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn filtered(&self) -> &[bool] {
        &self.filtered
    }

    pub fn into_parts(self) -> (Vec<Vertex>, Vec<Edge>, Vec<bool>) {
        (self.vertices, self.edges, self.filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle(n: u32) -> Graph {
        let edges = (0..n).map(|i| Edge::new(i, (i + 1) % n, 1.0)).collect();
        Graph::new(n as usize, edges).unwrap()
    }

    #[test]
    fn test_graph_rejects_dangling_edge() {
        let err = Graph::new(2, vec![Edge::new(0u32, 2u32, 1.0)]).unwrap_err();
        assert!(matches!(err, EngineError::IllegalParameter(_)));
        assert!(Graph::new(0, vec![]).is_err());
    }

    #[test]
    fn test_seeds_set_init_index() {
        let g = cycle(4).with_seeds(vec![VertexId(2), VertexId(0)]).unwrap();
        assert_eq!(g.vertices()[2].init_index, Some(0));
        assert_eq!(g.vertices()[0].init_index, Some(1));
        assert_eq!(g.vertices()[1].init_index, None);

        assert!(cycle(4).with_seeds(vec![VertexId(9)]).is_err());
        assert!(cycle(4).with_seeds(vec![VertexId(1), VertexId(1)]).is_err());
    }

    #[test]
    fn test_normalize_by_out_degree() {
        let mut g = Graph::new(
            3,
            vec![
                Edge::new(0u32, 1u32, 7.0),
                Edge::new(0u32, 2u32, 7.0),
                Edge::new(1u32, 2u32, 7.0),
            ],
        )
        .unwrap();
        g.normalize_by_out_degree();
        let weights: Vec<f64> = g.edges().iter().map(|e| e.weight).collect();
        assert_eq!(weights, vec![0.5, 0.5, 1.0]);
    }

    #[test]
    fn test_partition_covers_all_edges() {
        let g = cycle(10);
        let ranges = g.partition(3).unwrap();
        assert_eq!(ranges, vec![0..3, 3..6, 6..10]);
        assert_eq!(ranges.iter().map(|r| r.len()).sum::<usize>(), 10);

        assert!(g.partition(0).is_err());
        assert!(g.partition(11).is_err());
    }

    #[test]
    fn test_shard_from_parts_validation() {
        let g = cycle(4);
        let shard = g.shard(0, 0..2);
        let (vertices, edges, filtered) = shard.into_parts();
        let seeds = g.seeds().to_vec();

        assert!(GraphShard::from_parts(0, 4, vertices.clone(), edges.clone(), seeds.clone(), filtered.clone()).is_ok());
        assert!(GraphShard::from_parts(0, 0, vec![], edges.clone(), vec![], vec![]).is_err());
        assert!(GraphShard::from_parts(0, 5, vertices.clone(), edges.clone(), seeds.clone(), filtered.clone()).is_err());
        assert!(GraphShard::from_parts(0, 4, vertices, vec![], seeds, filtered).is_err());
    }

    #[test]
    fn test_shard_seeds_must_match_init_index() {
        let g = cycle(4).with_seeds(vec![VertexId(2), VertexId(0)]).unwrap();
        let (vertices, edges, filtered) = g.shard(0, 0..4).into_parts();

        let ok = GraphShard::from_parts(0, 4, vertices.clone(), edges.clone(), g.seeds().to_vec(), filtered.clone());
        assert!(ok.is_ok());

        // Swapped order disagrees with the vertices' init indices
        let swapped = vec![VertexId(0), VertexId(2)];
        let err = GraphShard::from_parts(0, 4, vertices.clone(), edges.clone(), swapped, filtered.clone()).unwrap_err();
        assert!(matches!(err, EngineError::IllegalParameter(_)));

        assert!(GraphShard::from_parts(0, 4, vertices, edges, vec![VertexId(7)], filtered).is_err());
    }
}
