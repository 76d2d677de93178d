//! Algorithm policies
//!
//! An [`AlgorithmPolicy`] is the capability set the engine is parameterized
//! over: how an edge turns a source value into a message (`transform`), how
//! messages for the same destination combine (`merge`), and how a combined
//! message updates a vertex (`apply`).
//!
//! `merge` must be associative and commutative with `identity()` as its
//! neutral element. The engine folds messages in an unspecified order and
//! reuses the same rule to reconcile contributions from different workers.

pub mod label;
pub mod rank;
pub mod relaxation;

use serde::Serialize;
use std::fmt::Debug;

use super::vertex::{Edge, Vertex};

pub use label::{Label, LabelPropagation, LabelVotes};
pub use rank::{RankPropagation, RankValue};
pub use relaxation::{Distances, Relaxation};

/// Per-algorithm transform / merge / apply rules
pub trait AlgorithmPolicy: Send + Sync + 'static {
    /// Vertex payload held in the canonical vertex-value array
    type Value: Clone + Debug + PartialEq + Send + Sync + Serialize + 'static;

    /// Message payload, also used as the per-vertex accumulator
    type Message: Clone + Debug + PartialEq + Send + Sync + 'static;

    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Initial value for `vertex` in a graph of `vertex_count` vertices
    fn init(&self, vertex: &Vertex, vertex_count: usize) -> Self::Value;

    /// Whether `vertex` starts the run active
    fn initially_active(&self, vertex: &Vertex) -> bool;

    /// Neutral element of `merge`
    fn identity(&self) -> Self::Message;

    /// Message produced by `edge`, or `None` if the edge stays silent this round
    fn transform(&self, src: &Vertex, value: &Self::Value, edge: &Edge) -> Option<Self::Message>;

    /// Fold `message` into `acc`
    fn merge(&self, acc: &mut Self::Message, message: &Self::Message);

    /// Clear the pending part of a vertex value before `apply` runs on it
    fn reset_pending(&self, _value: &mut Self::Value) {}

    /// Apply a merged message; returns `true` if the change is material
    fn apply(&self, value: &mut Self::Value, incoming: &Self::Message) -> bool;

    /// Minimum change for `apply` to mark a vertex active. `apply` enforces
    /// it; the engine only reports it alongside run results.
    fn materiality(&self) -> f64;

    /// Initial values for every vertex, setting each vertex's active flag
    fn initialize(&self, vertices: &mut [Vertex]) -> Vec<Self::Value> {
        let count = vertices.len();
        vertices
            .iter_mut()
            .map(|v| {
                v.is_active = self.initially_active(v);
                self.init(v, count)
            })
            .collect()
    }
}
