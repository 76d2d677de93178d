//! Delta-based rank propagation (PageRank)
//!
//! Each vertex holds its accumulated rank and the delta it received in the
//! last round. Only the delta propagates: an active source sends
//! `damping * delta * weight` along each out-edge, and the receiver adds the
//! merged sum to its rank. Starting from `rank = delta = (1 - d) / n`, the rank
//! after `k` rounds on a graph with normalized weights is the `k`-th partial sum
//! of the PageRank power series.

use serde::{Deserialize, Serialize};

use super::AlgorithmPolicy;
use crate::pregel::vertex::{Edge, Vertex};

/// Default minimum delta for a vertex to stay active
pub const DEFAULT_RANK_THRESHOLD: f64 = 1e-10;

/// Rank and the pending delta received in the last round
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankValue {
    pub rank: f64,
    pub delta: f64,
}

#[derive(Debug, Clone)]
pub struct RankPropagation {
    damping: f64,
    threshold: f64,
}

impl RankPropagation {
    pub fn new(damping: f64) -> Self {
        Self {
            damping,
            threshold: DEFAULT_RANK_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn damping(&self) -> f64 {
        self.damping
    }
}

impl AlgorithmPolicy for RankPropagation {
    type Value = RankValue;
    type Message = f64;

    fn name(&self) -> &'static str {
        "rank"
    }

    fn init(&self, _vertex: &Vertex, vertex_count: usize) -> RankValue {
        let base = (1.0 - self.damping) / vertex_count as f64;
        RankValue {
            rank: base,
            delta: base,
        }
    }

    fn initially_active(&self, _vertex: &Vertex) -> bool {
        true
    }

    fn identity(&self) -> f64 {
        0.0
    }

    fn transform(&self, src: &Vertex, value: &RankValue, edge: &Edge) -> Option<f64> {
        if !src.is_active {
            return None;
        }
        Some(self.damping * value.delta * edge.weight)
    }

    fn merge(&self, acc: &mut f64, message: &f64) {
        *acc += *message;
    }

    fn reset_pending(&self, value: &mut RankValue) {
        value.delta = 0.0;
    }

    fn apply(&self, value: &mut RankValue, incoming: &f64) -> bool {
        value.delta += *incoming;
        value.rank += *incoming;
        incoming.abs() > self.threshold
    }

    fn materiality(&self) -> f64 {
        self.threshold
    }
}
