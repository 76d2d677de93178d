//! Unbounded host-side executor

use tracing::debug;

use super::{check_lengths, ApplyStats, BatchExecutor, BatchStats};
use crate::pregel::algorithm::AlgorithmPolicy;
use crate::pregel::error::EngineError;
use crate::pregel::message::{Message, MessageSet, PendingSlots};
use crate::pregel::shard::GraphShard;
use crate::pregel::vertex::Vertex;

/// Processes the whole shard in a single pass with no capacity limits
#[derive(Debug, Clone)]
pub struct HostExecutor {
    worker: usize,
}

impl HostExecutor {
    pub fn new(worker: usize) -> Self {
        Self { worker }
    }
}

impl<P: AlgorithmPolicy> BatchExecutor<P> for HostExecutor {
    fn name(&self) -> &'static str {
        "host"
    }

    fn generate_merge(
        &mut self,
        policy: &P,
        shard: &GraphShard,
        values: &[P::Value],
        pending: &mut PendingSlots<P::Message>,
    ) -> Result<BatchStats, EngineError> {
        let vertex_count = shard.vertex_count();
        check_lengths(self.worker, vertex_count, values.len(), pending.len())?;

        let vertices = shard.vertices();
        let filtered = shard.filtered();
        let mut set = MessageSet::with_capacity(shard.edges().len());
        for edge in shard.edges() {
            let slot = if filtered[edge.src.index()] || filtered[edge.dst.index()] {
                None
            } else {
                let src = &vertices[edge.src.index()];
                policy
                    .transform(src, &values[edge.src.index()], edge)
                    .map(|value| Message::new(edge.src, edge.dst, value))
            };
            set.push_slot(slot);
        }

        for message in set.messages() {
            if message.dst.index() >= vertex_count {
                return Err(EngineError::InvalidDestination {
                    src: message.src,
                    dst: message.dst,
                    vertex_count,
                });
            }
            pending.fold(policy, message.dst, &message.value);
        }

        let stats = BatchStats {
            edges: set.len(),
            messages: set.message_count(),
            nulls: set.null_count(),
            batches: 1,
            reflected: 0,
        };
        debug!(worker = self.worker, messages = stats.messages, "host generate+merge done");
        Ok(stats)
    }

    fn apply(
        &mut self,
        policy: &P,
        vertices: &mut [Vertex],
        values: &mut [P::Value],
        pending: &PendingSlots<P::Message>,
    ) -> Result<ApplyStats, EngineError> {
        check_lengths(self.worker, vertices.len(), values.len(), pending.len())?;

        for v in vertices.iter_mut() {
            v.is_active = false;
        }

        let mut applied = 0;
        for (idx, (incoming, touched)) in pending.values().iter().zip(pending.touched()).enumerate() {
            if !touched {
                continue;
            }
            policy.reset_pending(&mut values[idx]);
            vertices[idx].is_active = policy.apply(&mut values[idx], incoming);
            applied += 1;
        }

        Ok(ApplyStats {
            active: vertices.iter().filter(|v| v.is_active).count(),
            messages: applied,
            batches: 1,
            reflected: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pregel::algorithm::{RankPropagation, RankValue};
    use crate::pregel::shard::Graph;
    use crate::pregel::vertex::{Edge, VertexId};

    #[test]
    fn test_filtered_vertices_produce_null_slots() {
        let graph = Graph::new(3, vec![Edge::new(0u32, 1u32, 1.0), Edge::new(1u32, 2u32, 1.0)])
            .unwrap()
            .with_filtered(&[VertexId(2)])
            .unwrap();
        let policy = RankPropagation::new(0.5);
        let mut shard = graph.shard(0, 0..2);
        let values = policy.initialize(shard.vertices_mut());
        let mut pending = PendingSlots::for_policy(&policy, 3);

        let stats = HostExecutor::new(0)
            .generate_merge(&policy, &shard, &values, &mut pending)
            .unwrap();

        assert_eq!(stats.edges, 2);
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.nulls, 1);
        assert!(pending.is_touched(VertexId(1)));
        assert!(!pending.is_touched(VertexId(2)));
    }

    #[test]
    fn test_empty_apply_is_idempotent() {
        let policy = RankPropagation::new(0.85);
        let mut vertices: Vec<Vertex> = (0u32..3).map(|i| Vertex::new(i).with_active(true)).collect();
        let mut values = vec![RankValue { rank: 0.3, delta: 0.1 }; 3];
        let before = values.clone();
        let pending = PendingSlots::for_policy(&policy, 3);

        let stats = HostExecutor::new(0)
            .apply(&policy, &mut vertices, &mut values, &pending)
            .unwrap();

        assert_eq!(stats.active, 0);
        assert_eq!(values, before);
        assert!(vertices.iter().all(|v| !v.is_active));
    }

    #[test]
    fn test_mismatched_lengths_are_rejected() {
        let policy = RankPropagation::new(0.85);
        let mut vertices: Vec<Vertex> = (0u32..3).map(Vertex::new).collect();
        let mut values = vec![RankValue { rank: 0.0, delta: 0.0 }; 2];
        let pending = PendingSlots::for_policy(&policy, 3);

        let err = HostExecutor::new(0)
            .apply(&policy, &mut vertices, &mut values, &pending)
            .unwrap_err();
        assert!(matches!(err, EngineError::IllegalParameter(_)));
    }
}
