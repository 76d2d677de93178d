//! Pregel Engine with Batched Accelerator Execution
//!
//! This module implements a bulk-synchronous vertex-centric graph engine whose
//! per-worker compute phases run through a capacity-bounded device.
//! Key concepts:
//!
//! - **AlgorithmPolicy**: transform/merge/apply triple defining an algorithm
//! - **Shard**: the full vertex set plus a contiguous slice of the edge list
//! - **BatchExecutor**: device (batched, reflected) or host execution
//! - **Reflection**: compact re-indexing of a batch that outgrows the device
//! - **Aggregation**: reconciling per-worker partial updates into one state
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    IterationDriver                           │
//! │   canonical values ──Arc──► update ──► request ──► report    │
//! │        ▲                                            │        │
//! │        └──────── CrossWorkerAggregator ◄────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//!        │ command channel (one OS thread per worker)
//!        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Worker: GraphShard + BatchExecutor                          │
//! │  ┌──────────┐   ┌──────────┐   ┌──────────┐                 │
//! │  │ generate │ → │  merge   │ → │  apply   │  per batch /    │
//! │  │  kernel  │   │  kernel  │   │  kernel  │  reflection     │
//! │  └──────────┘   └──────────┘   └──────────┘  window         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod vertex;
pub mod shard;
pub mod message;
pub mod algorithm;
pub mod config;
pub mod error;
pub mod device;
pub mod reflection;
pub mod executor;
pub mod aggregate;
pub mod worker;
pub mod runtime;

// Re-exports
pub use vertex::{Edge, Vertex, VertexId};
pub use shard::{Graph, GraphShard};
pub use message::{Message, MessageSet, PendingSlots};
pub use algorithm::{
    AlgorithmPolicy, Distances, Label, LabelPropagation, LabelVotes, RankPropagation, RankValue, Relaxation,
};
pub use config::{DeviceCapacity, EngineConfig, ExecutorKind};
pub use error::{DeviceError, EngineError};
pub use device::{Device, DeviceBuffer};
pub use reflection::{ReflectionIndex, ReflectionMapper};
pub use executor::{build_executor, ApplyStats, BatchExecutor, BatchStats, DeviceExecutor, HostExecutor};
pub use aggregate::{AggregateSummary, CrossWorkerAggregator, VertexUpdate, WorkerReport};
pub use worker::{ShardTransfer, WorkerHandle, WorkerTransport};
pub use runtime::{DriverState, IterationDriver, IterationStats, RunResult, StopReason};
