//! Iteration driver
//!
//! Owns the canonical vertex state and runs the bulk-synchronous loop:
//!
//! 1. partition edges, spawn one worker per shard, transfer initial state
//! 2. per iteration: update every worker with the canonical snapshot, request
//!    an iteration from all of them concurrently and join (the barrier)
//! 3. aggregate the reports, stop when nothing is active or the iteration
//!    budget is spent
//!
//! Any worker error fails the run; all workers are shut down either way.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::aggregate::{AggregateSummary, CrossWorkerAggregator, ReportFor, WorkerReport};
use super::algorithm::AlgorithmPolicy;
use super::config::EngineConfig;
use super::error::EngineError;
use super::executor::{build_executor, BatchStats};
use super::shard::Graph;
use super::vertex::Vertex;
use super::worker::{ShardTransfer, WorkerHandle, WorkerTransport};

/// Driver lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DriverState {
    Init,
    Running { iteration: usize },
    Converged,
    Failed,
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// No vertex is active
    Quiescent,
    /// `max_iterations` reached with vertices still active
    IterationLimit,
}

/// Per-iteration counters, summed over workers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationStats {
    pub iteration: usize,
    pub active: usize,
    pub touched: usize,
    pub contested: usize,
    pub messages: usize,
    pub nulls: usize,
    pub batches: usize,
    /// Generate batches that ran through a reflection window
    pub reflected: usize,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl IterationStats {
    fn collect<V, M>(
        iteration: usize,
        summary: &AggregateSummary,
        reports: &[WorkerReport<V, M>],
        elapsed: Duration,
    ) -> Self {
        let mut generate = BatchStats::default();
        for report in reports {
            generate.absorb(&report.generate);
        }
        Self {
            iteration,
            active: summary.active,
            touched: summary.touched,
            contested: summary.contested,
            messages: generate.messages,
            nulls: generate.nulls,
            batches: generate.batches,
            reflected: generate.reflected,
            elapsed,
        }
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunResult<V> {
    pub values: Vec<V>,
    pub vertices: Vec<Vertex>,
    pub iterations: usize,
    pub state: DriverState,
    pub reason: StopReason,
    /// Threshold the policy's `apply` used to judge activity
    pub materiality: f64,
    pub stats: Vec<IterationStats>,
}

/// Drives a policy over a graph across a set of workers
pub struct IterationDriver<P: AlgorithmPolicy> {
    policy: Arc<P>,
    config: EngineConfig,
    state: DriverState,
}

impl<P: AlgorithmPolicy> IterationDriver<P> {
    pub fn new(policy: P, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            policy: Arc::new(policy),
            config,
            state: DriverState::Init,
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Spawn `config.workers` thread-backed workers and run to completion
    pub async fn run(&mut self, graph: &Graph) -> Result<RunResult<P::Value>, EngineError> {
        // Fail before spawning anything if the graph cannot be split
        graph.partition(self.config.workers)?;

        let mut workers: Vec<Box<dyn WorkerTransport<P>>> = Vec::with_capacity(self.config.workers);
        for worker in 0..self.config.workers {
            let executor = build_executor::<P>(&self.config, worker);
            match WorkerHandle::spawn(worker, Arc::clone(&self.policy), executor) {
                Ok(handle) => workers.push(Box::new(handle)),
                Err(e) => {
                    self.state = DriverState::Failed;
                    shutdown_all(&workers, self.config.iteration_timeout).await;
                    return Err(e);
                }
            }
        }
        self.run_with_workers(graph, workers).await
    }

    /// Run over caller-supplied workers; the edge list is split evenly among them
    pub async fn run_with_workers(
        &mut self,
        graph: &Graph,
        workers: Vec<Box<dyn WorkerTransport<P>>>,
    ) -> Result<RunResult<P::Value>, EngineError> {
        self.state = DriverState::Init;
        let outcome = self.drive(graph, &workers).await;
        shutdown_all(&workers, self.config.iteration_timeout).await;

        match outcome {
            Ok(result) => {
                self.state = DriverState::Converged;
                info!(
                    iterations = result.iterations,
                    reason = ?result.reason,
                    workers = workers.len(),
                    "run converged"
                );
                Ok(result)
            }
            Err(e) => {
                self.state = DriverState::Failed;
                warn!(error = %e, "run failed");
                Err(e)
            }
        }
    }

    async fn drive(
        &mut self,
        graph: &Graph,
        workers: &[Box<dyn WorkerTransport<P>>],
    ) -> Result<RunResult<P::Value>, EngineError> {
        let ranges = graph.partition(workers.len())?;
        let vertex_count = graph.vertex_count();
        let mut vertices = graph.vertices().to_vec();
        let mut values = self.policy.initialize(&mut vertices);

        let transfers = workers.iter().zip(ranges).map(|(worker, range)| {
            let payload = ShardTransfer {
                values: values.clone(),
                vertices: vertices.clone(),
                edges: graph.edges()[range].to_vec(),
                seeds: graph.seeds().to_vec(),
                filtered: graph.filtered().to_vec(),
                vertex_count,
            };
            async move {
                worker.connect().await?;
                worker.transfer(payload).await?;
                worker.disconnect().await
            }
        });
        join_all(transfers)
            .await
            .into_iter()
            .collect::<Result<Vec<()>, EngineError>>()?;

        info!(
            algorithm = self.policy.name(),
            materiality = self.policy.materiality(),
            vertices = vertex_count,
            edges = graph.edge_count(),
            workers = workers.len(),
            "shards transferred"
        );

        let aggregator = CrossWorkerAggregator::new(self.policy.as_ref());
        let mut stats = Vec::new();
        let mut iteration = 0;
        let reason = loop {
            if !vertices.iter().any(|v| v.is_active) {
                break StopReason::Quiescent;
            }
            if iteration >= self.config.max_iterations {
                break StopReason::IterationLimit;
            }
            iteration += 1;
            self.state = DriverState::Running { iteration };

            let started = Instant::now();
            let reports = self
                .round(workers, iteration, Arc::new(values.clone()), Arc::new(vertices.clone()))
                .await?;
            let summary = aggregator.aggregate(&mut values, &mut vertices, &reports)?;

            let round_stats = IterationStats::collect(iteration, &summary, &reports, started.elapsed());
            info!(
                iteration,
                active = round_stats.active,
                messages = round_stats.messages,
                batches = round_stats.batches,
                reflected = round_stats.reflected,
                "iteration complete"
            );
            stats.push(round_stats);
        };

        Ok(RunResult {
            values,
            vertices,
            iterations: iteration,
            state: DriverState::Converged,
            reason,
            materiality: self.policy.materiality(),
            stats,
        })
    }

    /// One barrier-synchronized round across all workers
    async fn round(
        &self,
        workers: &[Box<dyn WorkerTransport<P>>],
        iteration: usize,
        values: Arc<Vec<P::Value>>,
        vertices: Arc<Vec<Vertex>>,
    ) -> Result<Vec<ReportFor<P>>, EngineError> {
        let started = Instant::now();
        let requests = workers.iter().map(|worker| {
            let values = Arc::clone(&values);
            let vertices = Arc::clone(&vertices);
            async move {
                worker.connect().await?;
                worker.update(values, vertices).await?;
                let report = worker.request(iteration).await?;
                worker.disconnect().await?;
                if report.worker != worker.worker() || report.iteration != iteration {
                    return Err(EngineError::protocol(
                        worker.worker(),
                        format!(
                            "report labelled worker {} iteration {} answered iteration {iteration}",
                            report.worker, report.iteration
                        ),
                    ));
                }
                Ok(report)
            }
        });

        let outcomes = tokio::time::timeout(self.config.iteration_timeout, join_all(requests))
            .await
            .map_err(|_| EngineError::Timeout {
                iteration,
                elapsed: started.elapsed(),
            })?;
        outcomes.into_iter().collect()
    }
}

async fn shutdown_all<P: AlgorithmPolicy>(workers: &[Box<dyn WorkerTransport<P>>], limit: Duration) {
    let shutdowns = join_all(workers.iter().map(|w| async move { (w.worker(), w.shutdown().await) }));
    match tokio::time::timeout(limit, shutdowns).await {
        Ok(results) => {
            for (worker, result) in results {
                if let Err(e) = result {
                    warn!(worker, error = %e, "worker shutdown failed");
                }
            }
        }
        Err(_) => warn!(workers = workers.len(), "worker shutdown timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pregel::algorithm::RankPropagation;
    use crate::pregel::config::ExecutorKind;
    use crate::pregel::vertex::Edge;

    fn cycle(n: u32) -> Graph {
        let edges = (0..n).map(|i| Edge::new(i, (i + 1) % n, 1.0)).collect();
        let mut g = Graph::new(n as usize, edges).unwrap();
        g.normalize_by_out_degree();
        g
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = IterationDriver::new(RankPropagation::new(0.85), EngineConfig::new().with_workers(0))
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::IllegalParameter(_)));
    }

    #[tokio::test]
    async fn test_run_stops_at_iteration_limit() {
        let config = EngineConfig::new().with_max_iterations(3).with_executor(ExecutorKind::Host);
        let mut driver = IterationDriver::new(RankPropagation::new(0.5), config).unwrap();

        let result = driver.run(&cycle(4)).await.unwrap();

        assert_eq!(result.iterations, 3);
        assert_eq!(result.reason, StopReason::IterationLimit);
        assert_eq!(result.materiality, crate::pregel::algorithm::rank::DEFAULT_RANK_THRESHOLD);
        assert_eq!(result.stats.len(), 3);
        assert_eq!(driver.state(), DriverState::Converged);
        assert!(result.stats.iter().all(|s| s.messages == 4));
    }

    #[tokio::test]
    async fn test_too_many_workers_fails_before_spawning() {
        let config = EngineConfig::new().with_workers(5);
        let mut driver = IterationDriver::new(RankPropagation::new(0.5), config).unwrap();

        let err = driver.run(&cycle(4)).await.unwrap_err();
        assert!(matches!(err, EngineError::IllegalParameter(_)));
    }

    #[tokio::test]
    async fn test_quiescent_graph_runs_zero_iterations() {
        use crate::pregel::algorithm::Relaxation;

        // No seeds, so no vertex starts active
        let mut driver = IterationDriver::new(Relaxation::new(0), EngineConfig::new()).unwrap();
        let result = driver.run(&cycle(3)).await.unwrap();

        assert_eq!(result.iterations, 0);
        assert_eq!(result.reason, StopReason::Quiescent);
        assert!(result.stats.is_empty());
    }
}
