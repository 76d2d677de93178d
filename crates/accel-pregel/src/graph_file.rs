//! Whitespace-separated graph files
//!
//! ```text
//! vertex_count edge_count
//! src dst weight
//! ...
//! ```

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::pregel::{Edge, Graph};

#[derive(Debug, Error)]
pub enum GraphFileError {
    #[error("graph file {path} not found or unreadable: {source}")]
    Missing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("graph file declares {found} {what}, expected {expected}")]
    Mismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("malformed graph file: {0}")]
    Malformed(String),
}

impl GraphFileError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        GraphFileError::Malformed(msg.into())
    }

    /// Process exit code used by the `pregel-run` harness
    pub fn exit_code(&self) -> i32 {
        match self {
            GraphFileError::Missing { .. } => 4,
            GraphFileError::Mismatch { .. } | GraphFileError::Malformed(_) => 5,
        }
    }
}

/// Read a graph file and check its header against the caller's counts
pub fn load(path: impl AsRef<Path>, expected_vertices: usize, expected_edges: usize) -> Result<Graph, GraphFileError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| GraphFileError::Missing {
        path: path.to_path_buf(),
        source,
    })?;
    let graph = parse(&text, expected_vertices, expected_edges)?;
    tracing::debug!(
        path = %path.display(),
        vertices = graph.vertex_count(),
        edges = graph.edge_count(),
        "graph file loaded"
    );
    Ok(graph)
}

/// Parse graph-file text; see [`load`]
pub fn parse(text: &str, expected_vertices: usize, expected_edges: usize) -> Result<Graph, GraphFileError> {
    let mut tokens = text.split_whitespace();

    let vertex_count: usize = next_field(&mut tokens, "vertex count")?;
    if vertex_count != expected_vertices {
        return Err(GraphFileError::Mismatch {
            what: "vertices",
            expected: expected_vertices,
            found: vertex_count,
        });
    }
    let edge_count: usize = next_field(&mut tokens, "edge count")?;
    if edge_count != expected_edges {
        return Err(GraphFileError::Mismatch {
            what: "edges",
            expected: expected_edges,
            found: edge_count,
        });
    }

    let mut edges = Vec::with_capacity(edge_count);
    for i in 0..edge_count {
        let src: u32 = next_field(&mut tokens, &format!("source of edge {i}"))?;
        let dst: u32 = next_field(&mut tokens, &format!("destination of edge {i}"))?;
        let weight: f64 = next_field(&mut tokens, &format!("weight of edge {i}"))?;
        edges.push(Edge::new(src, dst, weight));
    }
    if let Some(extra) = tokens.next() {
        return Err(GraphFileError::malformed(format!(
            "trailing data after {edge_count} edges: '{extra}'"
        )));
    }

    Graph::new(vertex_count, edges).map_err(|e| GraphFileError::malformed(e.to_string()))
}

fn next_field<'a, T: std::str::FromStr>(
    tokens: &mut impl Iterator<Item = &'a str>,
    field: &str,
) -> Result<T, GraphFileError> {
    let token = tokens
        .next()
        .ok_or_else(|| GraphFileError::malformed(format!("missing {field}")))?;
    token
        .parse()
        .map_err(|_| GraphFileError::malformed(format!("invalid {field}: '{token}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_graph(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_cycle() {
        let file = write_graph("4 4\n0 1 1.0\n1 2 1.0\n2 3 1.0\n3 0 0.5\n");
        let graph = load(file.path(), 4, 4).unwrap();

        assert_eq!(graph.vertex_count(), 4);
        assert_eq!(graph.edge_count(), 4);
        assert_eq!(graph.edges()[3].weight, 0.5);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(dir.path().join("absent.txt"), 4, 4).unwrap_err();
        assert!(matches!(err, GraphFileError::Missing { .. }));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_header_mismatch() {
        let err = parse("4 4\n0 1 1\n1 2 1\n2 3 1\n3 0 1\n", 5, 4).unwrap_err();
        assert!(matches!(err, GraphFileError::Mismatch { what: "vertices", .. }));

        let err = parse("4 4\n0 1 1\n1 2 1\n2 3 1\n3 0 1\n", 4, 3).unwrap_err();
        assert!(matches!(err, GraphFileError::Mismatch { what: "edges", .. }));
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn test_malformed_bodies() {
        assert!(matches!(parse("2 2\n0 1 1.0\n", 2, 2), Err(GraphFileError::Malformed(_))));
        assert!(matches!(parse("2 1\n0 x 1.0\n", 2, 1), Err(GraphFileError::Malformed(_))));
        assert!(matches!(parse("2 1\n0 5 1.0\n", 2, 1), Err(GraphFileError::Malformed(_))));
        assert!(matches!(parse("2 1\n0 1 1.0 7\n", 2, 1), Err(GraphFileError::Malformed(_))));
        assert!(matches!(parse("", 2, 1), Err(GraphFileError::Malformed(_))));
    }
}
