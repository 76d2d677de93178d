//! Error types for the Pregel engine
//!
//! Every detected error aborts the run. There is no retry path: configuration
//! errors are reported before any worker or device work starts, and transport,
//! device and data errors move the driver into its `Failed` state.

use std::time::Duration;
use thiserror::Error;

use super::vertex::VertexId;

/// Failures raised by a (simulated) accelerator device.
///
/// Each variant carries the operation that failed so the worker can surface a
/// diagnostic code alongside the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("[{code}] buffer '{buffer}' cannot hold {requested} elements (capacity {capacity})", code = DeviceError::CAPACITY)]
    CapacityExceeded {
        buffer: &'static str,
        requested: usize,
        capacity: usize,
    },

    #[error("[{code}] buffer '{buffer}' holds {device} elements but host side expects {host}", code = DeviceError::LENGTH)]
    LengthMismatch {
        buffer: &'static str,
        device: usize,
        host: usize,
    },

    #[error("[{code}] kernel '{kernel}' dispatched over {requested} items (parallel width {width})", code = DeviceError::LAUNCH)]
    LaunchTooWide {
        kernel: &'static str,
        requested: usize,
        width: usize,
    },

    #[error("[{code}] kernel '{kernel}' failed: {reason}", code = DeviceError::KERNEL)]
    KernelFailed {
        kernel: &'static str,
        reason: String,
    },
}

impl DeviceError {
    pub const CAPACITY: &'static str = "E_CAPACITY";
    pub const LENGTH: &'static str = "E_LENGTH";
    pub const LAUNCH: &'static str = "E_LAUNCH";
    pub const KERNEL: &'static str = "E_KERNEL";

    /// Diagnostic code of the failing operation
    pub fn code(&self) -> &'static str {
        match self {
            DeviceError::CapacityExceeded { .. } => Self::CAPACITY,
            DeviceError::LengthMismatch { .. } => Self::LENGTH,
            DeviceError::LaunchTooWide { .. } => Self::LAUNCH,
            DeviceError::KernelFailed { .. } => Self::KERNEL,
        }
    }
}

/// Errors that can occur while running the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// A count or size argument was zero or inconsistent
    #[error("illegal parameter: {0}")]
    IllegalParameter(String),

    /// Engine configuration failed validation
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The worker could not be reached or its channel is gone
    #[error("connection to worker {worker} failed: {reason}")]
    Connection { worker: usize, reason: String },

    /// A command was issued out of order (e.g. `request` before `transfer`)
    #[error("protocol violation on worker {worker}: {reason}")]
    Protocol { worker: usize, reason: String },

    /// Device transfer or kernel dispatch failed
    #[error("device failure on worker {worker}: {source}")]
    Device {
        worker: usize,
        #[source]
        source: DeviceError,
    },

    /// A message or report addressed a vertex outside the vertex set
    #[error("invalid destination {dst} from {src} (vertex count {vertex_count})")]
    InvalidDestination {
        src: VertexId,
        dst: VertexId,
        vertex_count: usize,
    },

    /// A worker did not finish its iteration in time
    #[error("iteration {iteration} timed out after {elapsed:?}")]
    Timeout { iteration: usize, elapsed: Duration },

    /// A worker failed for a reason not covered above
    #[error("worker {worker} failed: {reason}")]
    WorkerFailed { worker: usize, reason: String },
}

impl EngineError {
    pub fn illegal(msg: impl Into<String>) -> Self {
        EngineError::IllegalParameter(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Config(msg.into())
    }

    pub fn connection(worker: usize, reason: impl Into<String>) -> Self {
        EngineError::Connection {
            worker,
            reason: reason.into(),
        }
    }

    pub fn protocol(worker: usize, reason: impl Into<String>) -> Self {
        EngineError::Protocol {
            worker,
            reason: reason.into(),
        }
    }

    pub fn device(worker: usize, source: DeviceError) -> Self {
        EngineError::Device { worker, source }
    }

    pub fn worker_failed(worker: usize, reason: impl Into<String>) -> Self {
        EngineError::WorkerFailed {
            worker,
            reason: reason.into(),
        }
    }

    /// Process exit code used by the `pregel-run` harness
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Connection { .. } => 2,
            EngineError::IllegalParameter(_) | EngineError::Config(_) => 3,
            EngineError::Protocol { .. }
            | EngineError::Device { .. }
            | EngineError::InvalidDestination { .. }
            | EngineError::Timeout { .. }
            | EngineError::WorkerFailed { .. } => 6,
        }
    }

    /// Diagnostic code for device failures, if any
    pub fn diagnostic_code(&self) -> Option<&'static str> {
        match self {
            EngineError::Device { source, .. } => Some(source.code()),
            _ => None,
        }
    }
}
