//! Worker control protocol
//!
//! Each worker owns one edge shard, its executor and every device buffer the
//! executor allocates. It runs on a dedicated OS thread and is driven through
//! a typed command channel:
//!
//! | Command      | Effect                                                   |
//! |--------------|----------------------------------------------------------|
//! | `connect`    | open a session                                           |
//! | `transfer`   | install the shard and its initial vertex values          |
//! | `update`     | overwrite the local vertex state with the canonical copy |
//! | `request`    | run generate+merge+apply once and report touched vertices|
//! | `disconnect` | close the session                                        |
//! | `shutdown`   | release resources and stop the thread                    |
//!
//! Everything except `connect` and `shutdown` requires an open session. A
//! closed channel surfaces as a connection failure.

use async_trait::async_trait;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::aggregate::{ReportFor, VertexUpdate, WorkerReport};
use super::algorithm::AlgorithmPolicy;
use super::error::EngineError;
use super::executor::BatchExecutor;
use super::message::PendingSlots;
use super::shard::GraphShard;
use super::vertex::{Edge, Vertex, VertexId};

const COMMAND_QUEUE_DEPTH: usize = 8;

/// Initial shard state sent with `transfer`
#[derive(Debug, Clone)]
pub struct ShardTransfer<V> {
    pub values: Vec<V>,
    pub vertices: Vec<Vertex>,
    pub edges: Vec<Edge>,
    pub seeds: Vec<VertexId>,
    pub filtered: Vec<bool>,
    pub vertex_count: usize,
}

/// Driver-side view of a worker
#[async_trait]
pub trait WorkerTransport<P: AlgorithmPolicy>: Send + Sync {
    fn worker(&self) -> usize;

    async fn connect(&self) -> Result<(), EngineError>;

    async fn transfer(&self, payload: ShardTransfer<P::Value>) -> Result<(), EngineError>;

    async fn update(&self, values: Arc<Vec<P::Value>>, vertices: Arc<Vec<Vertex>>) -> Result<(), EngineError>;

    /// Run one iteration and return the worker's report
    async fn request(&self, iteration: usize) -> Result<ReportFor<P>, EngineError>;

    async fn disconnect(&self) -> Result<(), EngineError>;

    async fn shutdown(&self) -> Result<(), EngineError>;
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

enum Command<P: AlgorithmPolicy> {
    Connect {
        reply: Reply<()>,
    },
    Transfer {
        payload: ShardTransfer<P::Value>,
        reply: Reply<()>,
    },
    Update {
        values: Arc<Vec<P::Value>>,
        vertices: Arc<Vec<Vertex>>,
        reply: Reply<()>,
    },
    Request {
        iteration: usize,
        reply: Reply<ReportFor<P>>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Channel-backed handle to a worker thread
pub struct WorkerHandle<P: AlgorithmPolicy> {
    worker: usize,
    tx: mpsc::Sender<Command<P>>,
}

impl<P: AlgorithmPolicy> WorkerHandle<P> {
    /// Start a worker thread owning `executor`
    pub fn spawn(worker: usize, policy: Arc<P>, executor: Box<dyn BatchExecutor<P>>) -> Result<Self, EngineError> {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let server = WorkerServer {
            worker,
            policy,
            executor,
            connected: false,
            state: None,
        };
        std::thread::Builder::new()
            .name(format!("pregel-worker-{worker}"))
            .spawn(move || server.run(rx))
            .map_err(|e| EngineError::connection(worker, format!("cannot start worker thread: {e}")))?;

        debug!(worker, "worker thread started");
        Ok(Self { worker, tx })
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command<P>) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| EngineError::connection(self.worker, "worker channel closed"))?;
        rx.await
            .map_err(|_| EngineError::connection(self.worker, "worker dropped the reply"))?
    }
}

#[async_trait]
impl<P: AlgorithmPolicy> WorkerTransport<P> for WorkerHandle<P> {
    fn worker(&self) -> usize {
        self.worker
    }

    async fn connect(&self) -> Result<(), EngineError> {
        self.call(|reply| Command::Connect { reply }).await
    }

    async fn transfer(&self, payload: ShardTransfer<P::Value>) -> Result<(), EngineError> {
        self.call(|reply| Command::Transfer { payload, reply }).await
    }

    async fn update(&self, values: Arc<Vec<P::Value>>, vertices: Arc<Vec<Vertex>>) -> Result<(), EngineError> {
        self.call(|reply| Command::Update {
            values,
            vertices,
            reply,
        })
        .await
    }

    async fn request(&self, iteration: usize) -> Result<ReportFor<P>, EngineError> {
        self.call(|reply| Command::Request { iteration, reply }).await
    }

    async fn disconnect(&self) -> Result<(), EngineError> {
        self.call(|reply| Command::Disconnect { reply }).await
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        self.call(|reply| Command::Shutdown { reply }).await
    }
}

struct ShardState<P: AlgorithmPolicy> {
    shard: GraphShard,
    values: Vec<P::Value>,
    pending: PendingSlots<P::Message>,
}

struct WorkerServer<P: AlgorithmPolicy> {
    worker: usize,
    policy: Arc<P>,
    executor: Box<dyn BatchExecutor<P>>,
    connected: bool,
    state: Option<ShardState<P>>,
}

impl<P: AlgorithmPolicy> WorkerServer<P> {
    fn run(mut self, mut rx: mpsc::Receiver<Command<P>>) {
        while let Some(command) = rx.blocking_recv() {
            match command {
                Command::Connect { reply } => {
                    self.connected = true;
                    let _ = reply.send(Ok(()));
                }
                Command::Transfer { payload, reply } => {
                    let _ = reply.send(self.transfer(payload));
                }
                Command::Update {
                    values,
                    vertices,
                    reply,
                } => {
                    let _ = reply.send(self.update(&values, &vertices));
                }
                Command::Request { iteration, reply } => {
                    match std::panic::catch_unwind(AssertUnwindSafe(|| self.request(iteration))) {
                        Ok(result) => {
                            if let Err(e) = &result {
                                warn!(worker = self.worker, iteration, error = %e, "iteration failed");
                            }
                            let _ = reply.send(result);
                        }
                        Err(panic) => {
                            // Shard state may be half-updated; the worker does not serve again
                            let reason = panic_message(panic.as_ref());
                            error!(worker = self.worker, iteration, reason = %reason, "worker panicked");
                            let _ = reply.send(Err(EngineError::worker_failed(
                                self.worker,
                                format!("panicked in iteration {iteration}: {reason}"),
                            )));
                            break;
                        }
                    }
                }
                Command::Disconnect { reply } => {
                    let result = self.require_session("disconnect").map(|_| self.connected = false);
                    let _ = reply.send(result);
                }
                Command::Shutdown { reply } => {
                    self.executor.release();
                    self.state = None;
                    self.connected = false;
                    let _ = reply.send(Ok(()));
                    break;
                }
            }
        }
        debug!(worker = self.worker, "worker thread exiting");
    }

    fn require_session(&self, command: &str) -> Result<(), EngineError> {
        if !self.connected {
            return Err(EngineError::protocol(self.worker, format!("'{command}' without a session")));
        }
        Ok(())
    }

    fn transfer(&mut self, payload: ShardTransfer<P::Value>) -> Result<(), EngineError> {
        self.require_session("transfer")?;
        let ShardTransfer {
            values,
            vertices,
            edges,
            seeds,
            filtered,
            vertex_count,
        } = payload;

        if let Some(state) = &self.state {
            if state.shard.vertex_count() != vertex_count {
                return Err(EngineError::illegal(format!(
                    "vertex count {vertex_count} differs from transferred shard ({})",
                    state.shard.vertex_count()
                )));
            }
        }
        if values.len() != vertex_count {
            return Err(EngineError::illegal(format!(
                "{} values for vertex count {vertex_count}",
                values.len()
            )));
        }

        let shard = GraphShard::from_parts(self.worker, vertex_count, vertices, edges, seeds, filtered)?;
        info!(
            worker = self.worker,
            vertices = vertex_count,
            edges = shard.edges().len(),
            executor = self.executor.name(),
            "shard transferred"
        );
        self.state = Some(ShardState {
            pending: PendingSlots::for_policy(self.policy.as_ref(), vertex_count),
            shard,
            values,
        });
        Ok(())
    }

    fn update(&mut self, values: &[P::Value], vertices: &[Vertex]) -> Result<(), EngineError> {
        self.require_session("update")?;
        let worker = self.worker;
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| EngineError::protocol(worker, "'update' before 'transfer'"))?;

        let expected = state.shard.vertex_count();
        if values.is_empty() || values.len() != expected || vertices.len() != expected {
            return Err(EngineError::illegal(format!(
                "update carries {} values / {} vertices, shard has {expected}",
                values.len(),
                vertices.len()
            )));
        }
        state.values.clone_from_slice(values);
        state.shard.vertices_mut().copy_from_slice(vertices);
        Ok(())
    }

    fn request(&mut self, iteration: usize) -> Result<ReportFor<P>, EngineError> {
        self.require_session("request")?;
        let worker = self.worker;
        let policy = self.policy.as_ref();
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| EngineError::protocol(worker, "'request' before 'transfer'"))?;

        state.pending.reset(&policy.identity());
        let generate = self
            .executor
            .generate_merge(policy, &state.shard, &state.values, &mut state.pending)?;
        let apply = self
            .executor
            .apply(policy, state.shard.vertices_mut(), &mut state.values, &state.pending)?;

        let pending = &state.pending;
        let updates = state
            .shard
            .vertices()
            .iter()
            .filter(|v| pending.is_touched(v.id))
            .map(|v| VertexUpdate {
                id: v.id,
                value: state.values[v.id.index()].clone(),
                merged: pending.values()[v.id.index()].clone(),
                is_active: v.is_active,
            })
            .collect::<Vec<_>>();

        // Local flags are reported; the next `update` delivers canonical ones
        for v in state.shard.vertices_mut() {
            v.is_active = false;
        }

        debug!(
            worker,
            iteration,
            touched = updates.len(),
            active = apply.active,
            "iteration finished"
        );
        Ok(WorkerReport {
            worker,
            iteration,
            updates,
            generate,
            apply,
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
