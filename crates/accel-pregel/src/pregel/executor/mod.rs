//! Batch executors
//!
//! A [`BatchExecutor`] runs one worker's generate+merge and apply phases.
//! Two strategies sit behind the same trait:
//!
//! - [`DeviceExecutor`]: pushes fixed-capacity batches through a simulated
//!   accelerator, reflecting batches when the shard outgrows the device
//! - [`HostExecutor`]: processes the whole shard in one unbounded pass; the
//!   reference every device run must agree with

pub mod device;
pub mod host;

use serde::Serialize;

use super::algorithm::AlgorithmPolicy;
use super::config::{EngineConfig, ExecutorKind};
use super::error::EngineError;
use super::message::PendingSlots;
use super::shard::GraphShard;
use super::vertex::Vertex;

pub use device::DeviceExecutor;
pub use host::HostExecutor;

/// Counters from a generate+merge pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Edges processed
    pub edges: usize,
    /// Message slots holding a message
    pub messages: usize,
    /// Null sentinel slots
    pub nulls: usize,
    /// Edge batches sent through the executor
    pub batches: usize,
    /// Batches that ran in reflected (compact) space
    pub reflected: usize,
}

impl BatchStats {
    pub fn absorb(&mut self, other: &BatchStats) {
        self.edges += other.edges;
        self.messages += other.messages;
        self.nulls += other.nulls;
        self.batches += other.batches;
        self.reflected += other.reflected;
    }
}

/// Counters from an apply pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyStats {
    /// Vertices left active
    pub active: usize,
    /// Merged messages applied
    pub messages: usize,
    pub batches: usize,
    pub reflected: usize,
}

/// Strategy that drives a worker's generate, merge and apply phases
pub trait BatchExecutor<P: AlgorithmPolicy>: Send {
    fn name(&self) -> &'static str;

    /// Generate one message slot per shard edge and fold the messages into
    /// `pending`. `pending` must already hold the identity element.
    fn generate_merge(
        &mut self,
        policy: &P,
        shard: &GraphShard,
        values: &[P::Value],
        pending: &mut PendingSlots<P::Message>,
    ) -> Result<BatchStats, EngineError>;

    /// Clear every active flag, then apply each touched pending slot to its
    /// vertex and mark the vertex active on material change.
    fn apply(
        &mut self,
        policy: &P,
        vertices: &mut [Vertex],
        values: &mut [P::Value],
        pending: &PendingSlots<P::Message>,
    ) -> Result<ApplyStats, EngineError>;

    /// Free executor-owned resources
    fn release(&mut self) {}
}

/// Executor for `worker` as selected by the config
pub fn build_executor<P: AlgorithmPolicy>(config: &EngineConfig, worker: usize) -> Box<dyn BatchExecutor<P>> {
    match config.executor {
        ExecutorKind::Device => Box::new(DeviceExecutor::new(worker, config.capacity)),
        ExecutorKind::Host => Box::new(HostExecutor::new(worker)),
    }
}

pub(crate) fn check_lengths(
    worker: usize,
    vertex_count: usize,
    values: usize,
    pending: usize,
) -> Result<(), EngineError> {
    if values != vertex_count || pending != vertex_count {
        return Err(EngineError::illegal(format!(
            "worker {worker}: {vertex_count} vertices but {values} values and {pending} pending slots"
        )));
    }
    Ok(())
}
