//! Label propagation (community detection)
//!
//! Each vertex starts labelled with its own id and, every round, adopts the
//! label carried by the most in-neighbours. Ties go to the smallest label so
//! the outcome does not depend on message order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::AlgorithmPolicy;
use crate::pregel::vertex::{Edge, Vertex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(pub u32);

/// Histogram of neighbour labels
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelVotes(pub BTreeMap<u32, u64>);

impl LabelVotes {
    pub fn single(label: u32) -> Self {
        Self(BTreeMap::from([(label, 1)]))
    }

    /// Label with the most votes, smallest label on ties
    pub fn winner(&self) -> Option<u32> {
        self.0
            .iter()
            .max_by(|(la, ca), (lb, cb)| ca.cmp(cb).then(lb.cmp(la)))
            .map(|(label, _)| *label)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LabelPropagation;

impl LabelPropagation {
    pub fn new() -> Self {
        Self
    }
}

impl AlgorithmPolicy for LabelPropagation {
    type Value = Label;
    type Message = LabelVotes;

    fn name(&self) -> &'static str {
        "label"
    }

    fn init(&self, vertex: &Vertex, _vertex_count: usize) -> Label {
        Label(vertex.id.0)
    }

    fn initially_active(&self, _vertex: &Vertex) -> bool {
        true
    }

    fn identity(&self) -> LabelVotes {
        LabelVotes::default()
    }

    // Every vertex votes every round: a vertex needs its full neighbourhood
    // to pick a label, not just the neighbours that changed.
    fn transform(&self, _src: &Vertex, value: &Label, _edge: &Edge) -> Option<LabelVotes> {
        Some(LabelVotes::single(value.0))
    }

    fn merge(&self, acc: &mut LabelVotes, message: &LabelVotes) {
        for (label, count) in &message.0 {
            *acc.0.entry(*label).or_insert(0) += count;
        }
    }

    fn apply(&self, value: &mut Label, incoming: &LabelVotes) -> bool {
        match incoming.winner() {
            Some(label) if label != value.0 => {
                value.0 = label;
                true
            }
            _ => false,
        }
    }

    fn materiality(&self) -> f64 {
        0.0
    }
}
