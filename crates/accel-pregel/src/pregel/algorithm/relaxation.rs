//! Multi-source shortest-path relaxation (Bellman-Ford)
//!
//! Every vertex keeps one tentative distance per seed. A seed with
//! `init_index = Some(k)` starts at distance 0 in slot `k`; everything else
//! starts at infinity. Merging takes the element-wise minimum.

use serde::{Deserialize, Serialize};

use super::AlgorithmPolicy;
use crate::pregel::vertex::{Edge, Vertex};

/// Tentative distance from each seed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Distances(pub Vec<f64>);

impl Distances {
    pub fn unreachable(sources: usize) -> Self {
        Self(vec![f64::INFINITY; sources])
    }

    pub fn get(&self, source: usize) -> Option<f64> {
        self.0.get(source).copied()
    }
}

#[derive(Debug, Clone)]
pub struct Relaxation {
    sources: usize,
    threshold: f64,
}

impl Relaxation {
    pub fn new(sources: usize) -> Self {
        Self {
            sources,
            threshold: 0.0,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn sources(&self) -> usize {
        self.sources
    }
}

impl AlgorithmPolicy for Relaxation {
    type Value = Distances;
    type Message = Distances;

    fn name(&self) -> &'static str {
        "relaxation"
    }

    fn init(&self, vertex: &Vertex, _vertex_count: usize) -> Distances {
        let mut dist = Distances::unreachable(self.sources);
        if let Some(slot) = vertex.init_index.filter(|k| *k < self.sources) {
            dist.0[slot] = 0.0;
        }
        dist
    }

    fn initially_active(&self, vertex: &Vertex) -> bool {
        vertex.init_index.is_some_and(|k| k < self.sources)
    }

    fn identity(&self) -> Distances {
        Distances::unreachable(self.sources)
    }

    fn transform(&self, src: &Vertex, value: &Distances, edge: &Edge) -> Option<Distances> {
        if !src.is_active || value.0.iter().all(|d| d.is_infinite()) {
            return None;
        }
        Some(Distances(value.0.iter().map(|d| d + edge.weight).collect()))
    }

    fn merge(&self, acc: &mut Distances, message: &Distances) {
        for (a, m) in acc.0.iter_mut().zip(&message.0) {
            if *m < *a {
                *a = *m;
            }
        }
    }

    fn apply(&self, value: &mut Distances, incoming: &Distances) -> bool {
        let mut material = false;
        for (current, candidate) in value.0.iter_mut().zip(&incoming.0) {
            if *candidate < *current {
                material |= *current - *candidate > self.threshold;
                *current = *candidate;
            }
        }
        material
    }

    fn materiality(&self) -> f64 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_starts_at_zero() {
        let policy = Relaxation::new(2);
        let seed = Vertex::new(5u32).with_init_index(1);

        let value = policy.init(&seed, 10);
        assert_eq!(value.get(1), Some(0.0));
        assert_eq!(value.get(0), Some(f64::INFINITY));
        assert!(policy.initially_active(&seed));
        assert!(!policy.initially_active(&Vertex::new(0u32)));
    }

    #[test]
    fn test_unreachable_source_is_silent() {
        let policy = Relaxation::new(1);
        let src = Vertex::new(0u32).with_active(true);
        let edge = Edge::new(0u32, 1u32, 2.0);

        assert_eq!(policy.transform(&src, &Distances::unreachable(1), &edge), None);
        assert_eq!(
            policy.transform(&src, &Distances(vec![1.5]), &edge),
            Some(Distances(vec![3.5]))
        );
    }

    #[test]
    fn test_apply_only_improves() {
        let policy = Relaxation::new(2);
        let mut value = Distances(vec![3.0, 1.0]);

        assert!(policy.apply(&mut value, &Distances(vec![2.0, 4.0])));
        assert_eq!(value, Distances(vec![2.0, 1.0]));

        assert!(!policy.apply(&mut value, &Distances(vec![2.0, 1.0])));
        assert!(!policy.apply(&mut value, &policy.identity()));
    }
}
