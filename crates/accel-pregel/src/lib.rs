//! accel-pregel: a Pregel-style bulk-synchronous graph engine that runs each
//! worker's compute phases through a batched, capacity-bounded accelerator.
//!
//! The [`pregel`] module holds the engine; [`graph_file`] reads the plain-text
//! graph format used by the `pregel-run` harness.

pub mod graph_file;
pub mod pregel;

pub use graph_file::GraphFileError;
pub use pregel::{
    AlgorithmPolicy, DeviceCapacity, EngineConfig, EngineError, ExecutorKind, Graph, IterationDriver, RunResult,
};
