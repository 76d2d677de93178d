//! Engine configuration
//!
//! Configuration is built once, validated, and handed to the driver. Device
//! capacity constants bound every batch: smaller values force more reflection
//! passes (lower peak memory, more overhead), larger values need more device
//! memory.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::EngineError;

/// Fixed capacity of the accelerator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceCapacity {
    /// Maximum vertices resident on the device per batch
    pub max_vertices: usize,

    /// Maximum edges per generate batch
    pub max_edges: usize,

    /// Maximum merged messages per apply batch
    pub max_messages: usize,

    /// Items per kernel dispatch
    pub parallel_width: usize,
}

impl Default for DeviceCapacity {
    fn default() -> Self {
        Self {
            max_vertices: 1 << 20,
            max_edges: 1 << 22,
            max_messages: 1 << 22,
            parallel_width: num_cpus::get().max(1) * 256,
        }
    }
}

impl DeviceCapacity {
    pub fn new(max_vertices: usize, max_edges: usize, max_messages: usize, parallel_width: usize) -> Self {
        Self {
            max_vertices,
            max_edges,
            max_messages,
            parallel_width,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        // A reflected edge window must fit both endpoints of at least one edge
        if self.max_vertices < 2 {
            return Err(EngineError::config(format!(
                "max_vertices must be at least 2, got {}",
                self.max_vertices
            )));
        }
        if self.max_edges == 0 || self.max_messages == 0 || self.parallel_width == 0 {
            return Err(EngineError::config(
                "max_edges, max_messages and parallel_width must be positive",
            ));
        }
        Ok(())
    }

    /// Size of the device message buffer; it serves both phases
    pub fn message_buffer_len(&self) -> usize {
        self.max_edges.max(self.max_messages)
    }
}

/// Which batch executor strategy workers run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// Capacity-bounded accelerator with batching and reflection
    #[default]
    Device,
    /// Unbounded host computation in one pass
    Host,
}

/// Configuration for an engine run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Iterations after which the run stops even if vertices are still active
    pub max_iterations: usize,

    /// Number of edge shards / workers
    pub workers: usize,

    pub executor: ExecutorKind,

    pub capacity: DeviceCapacity,

    /// Upper bound on one iteration across all workers
    #[serde(with = "humantime_serde")]
    pub iteration_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            workers: 1,
            executor: ExecutorKind::Device,
            capacity: DeviceCapacity::default(),
            iteration_timeout: Duration::from_secs(300),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_executor(mut self, executor: ExecutorKind) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_capacity(mut self, capacity: DeviceCapacity) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_iteration_timeout(mut self, timeout: Duration) -> Self {
        self.iteration_timeout = timeout;
        self
    }

    /// Load a YAML config file; missing fields fall back to defaults
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, EngineError> {
        let config: Self =
            serde_yaml::from_str(text).map_err(|e| EngineError::config(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.workers == 0 {
            return Err(EngineError::illegal("worker count must be positive"));
        }
        if self.iteration_timeout.is_zero() {
            return Err(EngineError::config("iteration_timeout must be positive"));
        }
        self.capacity.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.executor, ExecutorKind::Device);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_max_iterations(3)
            .with_workers(4)
            .with_executor(ExecutorKind::Host)
            .with_capacity(DeviceCapacity::new(8, 16, 16, 4))
            .with_iteration_timeout(Duration::from_secs(5));

        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.workers, 4);
        assert_eq!(config.capacity.message_buffer_len(), 16);
    }

    #[test]
    fn test_capacity_validation() {
        assert!(DeviceCapacity::new(1, 4, 4, 2).validate().is_err());
        assert!(DeviceCapacity::new(2, 0, 4, 2).validate().is_err());
        assert!(DeviceCapacity::new(2, 1, 1, 1).validate().is_ok());

        let config = EngineConfig::new().with_workers(0);
        assert!(matches!(config.validate(), Err(EngineError::IllegalParameter(_))));
    }

    #[test]
    fn test_yaml_round_trip_with_partial_fields() {
        let yaml = r#"
max_iterations: 25
executor: host
capacity:
  max_vertices: 64
  parallel_width: 8
iteration_timeout: 90s
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.max_iterations, 25);
        assert_eq!(config.executor, ExecutorKind::Host);
        assert_eq!(config.capacity.max_vertices, 64);
        assert_eq!(config.capacity.parallel_width, 8);
        assert_eq!(config.capacity.max_edges, DeviceCapacity::default().max_edges);
        assert_eq!(config.iteration_timeout, Duration::from_secs(90));
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn test_yaml_rejects_invalid_capacity() {
        let err = EngineConfig::from_yaml_str("capacity:\n  max_vertices: 1\n").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
