//! Capacity-bounded accelerator executor
//!
//! # Generate + merge
//!
//! ```text
//!  shard edges ──chunk(max_edges)──▶ upload ──▶ generate ──▶ merge ──┐
//!                                              (per edge)  (per dst) │
//!                        pending slots ◀──────── download ◀──────────┘
//! ```
//!
//! Without reflection the vertex, value and accumulator arrays stay resident
//! for the whole pass and only edges stream through. With reflection every
//! window gets its own compact arrays; accumulators for the window's
//! destinations are seeded from the host slots so messages fold in the same
//! order as the unreflected path and results stay bit-identical.
//!
//! # Apply
//!
//! Touched pending slots become one merged message per vertex and stream
//! through in batches of `max_messages`, applied against resident (or
//! reflected) vertex values.

use rayon::prelude::*;
use tracing::{debug, trace};

use super::{check_lengths, ApplyStats, BatchExecutor, BatchStats};
use crate::pregel::algorithm::AlgorithmPolicy;
use crate::pregel::config::DeviceCapacity;
use crate::pregel::device::{Device, DeviceBuffer};
use crate::pregel::error::{DeviceError, EngineError};
use crate::pregel::message::{Message, PendingSlots};
use crate::pregel::reflection::{ReflectionIndex, ReflectionMapper};
use crate::pregel::shard::GraphShard;
use crate::pregel::vertex::{Edge, Vertex, VertexId};

type Slot<M> = Option<Message<M>>;

/// Executor backed by a simulated fixed-capacity device
pub struct DeviceExecutor<P: AlgorithmPolicy> {
    worker: usize,
    device: Device,
    mapper: ReflectionMapper,
    vertices: DeviceBuffer<Vertex>,
    values: DeviceBuffer<P::Value>,
    filtered: DeviceBuffer<bool>,
    edges: DeviceBuffer<Edge>,
    messages: DeviceBuffer<Slot<P::Message>>,
    merged: DeviceBuffer<P::Message>,
    touched: DeviceBuffer<bool>,
}

impl<P: AlgorithmPolicy> DeviceExecutor<P> {
    pub fn new(worker: usize, capacity: DeviceCapacity) -> Self {
        Self {
            worker,
            device: Device::new(capacity),
            mapper: ReflectionMapper::new(&capacity),
            vertices: DeviceBuffer::allocate("vertices", capacity.max_vertices),
            values: DeviceBuffer::allocate("values", capacity.max_vertices),
            filtered: DeviceBuffer::allocate("filtered", capacity.max_vertices),
            edges: DeviceBuffer::allocate("edges", capacity.max_edges),
            messages: DeviceBuffer::allocate("messages", capacity.message_buffer_len()),
            merged: DeviceBuffer::allocate("merged", capacity.max_vertices),
            touched: DeviceBuffer::allocate("touched", capacity.max_vertices),
        }
    }

    pub fn capacity(&self) -> &DeviceCapacity {
        self.device.capacity()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    fn fail(&self, source: DeviceError) -> EngineError {
        EngineError::device(self.worker, source)
    }

    /// Generate and merge the edges currently resident in `self.edges`
    fn run_edge_batch(&mut self, policy: &P, stats: &mut BatchStats) -> Result<(), EngineError> {
        let worker = self.worker;
        generate_kernel(
            &mut self.device,
            policy,
            self.vertices.as_slice(),
            self.values.as_slice(),
            self.filtered.as_slice(),
            self.edges.as_slice(),
            &mut self.messages,
        )
        .map_err(|e| EngineError::device(worker, e))?;

        let slots = self.messages.as_slice();
        let produced = slots.iter().filter(|s| s.is_some()).count();
        stats.edges += slots.len();
        stats.messages += produced;
        stats.nulls += slots.len() - produced;
        stats.batches += 1;

        merge_kernel(
            &mut self.device,
            worker,
            policy,
            self.messages.as_slice(),
            self.merged.as_mut_slice(),
            self.touched.as_mut_slice(),
        )
    }

    fn generate_resident(
        &mut self,
        policy: &P,
        shard: &GraphShard,
        values: &[P::Value],
        pending: &mut PendingSlots<P::Message>,
        stats: &mut BatchStats,
    ) -> Result<(), EngineError> {
        self.vertices.upload(shard.vertices()).map_err(|e| self.fail(e))?;
        self.values.upload(values).map_err(|e| self.fail(e))?;
        self.filtered.upload(shard.filtered()).map_err(|e| self.fail(e))?;
        self.merged.upload(pending.values()).map_err(|e| self.fail(e))?;
        self.touched.upload(pending.touched()).map_err(|e| self.fail(e))?;

        let max_edges = self.capacity().max_edges;
        for batch in shard.edges().chunks(max_edges) {
            self.edges.upload(batch).map_err(|e| self.fail(e))?;
            self.run_edge_batch(policy, stats)?;
        }

        let (host_values, host_touched) = pending.parts_mut();
        self.merged.download(host_values).map_err(|e| self.fail(e))?;
        self.touched.download(host_touched).map_err(|e| self.fail(e))?;
        Ok(())
    }

    fn generate_reflected(
        &mut self,
        policy: &P,
        shard: &GraphShard,
        values: &[P::Value],
        pending: &mut PendingSlots<P::Message>,
        stats: &mut BatchStats,
    ) -> Result<(), EngineError> {
        let identity = policy.identity();
        for window in self.mapper.edge_windows(shard.edges()) {
            let index = &window.index;
            trace!(
                worker = self.worker,
                edges = window.edges.len(),
                vertices = index.len(),
                "reflected edge window"
            );

            self.vertices
                .upload_vec(index.gather_vertices(shard.vertices()))
                .map_err(|e| self.fail(e))?;
            self.values.upload_vec(index.gather(values)).map_err(|e| self.fail(e))?;
            self.filtered
                .upload_vec(index.gather(shard.filtered()))
                .map_err(|e| self.fail(e))?;
            self.merged
                .upload_vec(index.gather_destinations(pending.values(), &identity))
                .map_err(|e| self.fail(e))?;
            self.touched
                .upload_vec(index.gather_destinations(pending.touched(), &false))
                .map_err(|e| self.fail(e))?;
            self.edges.upload(&window.edges).map_err(|e| self.fail(e))?;

            self.run_edge_batch(policy, stats)?;
            stats.reflected += 1;

            let mut compact_values = vec![identity.clone(); index.len()];
            let mut compact_touched = vec![false; index.len()];
            self.merged.download(&mut compact_values).map_err(|e| self.fail(e))?;
            self.touched.download(&mut compact_touched).map_err(|e| self.fail(e))?;

            let (host_values, host_touched) = pending.parts_mut();
            index.scatter(&compact_values, host_values);
            index.scatter(&compact_touched, host_touched);
        }
        Ok(())
    }

    fn apply_resident(
        &mut self,
        policy: &P,
        vertices: &mut [Vertex],
        values: &mut [P::Value],
        pending: &PendingSlots<P::Message>,
        stats: &mut ApplyStats,
    ) -> Result<(), EngineError> {
        self.vertices.upload(vertices).map_err(|e| self.fail(e))?;
        self.values.upload(values).map_err(|e| self.fail(e))?;

        let max_messages = self.capacity().max_messages;
        for batch in pending.to_message_set().drain_batches(max_messages) {
            stats.messages += batch.len();
            stats.batches += 1;
            self.messages
                .upload_vec(batch.into_iter().map(Some).collect())
                .map_err(|e| self.fail(e))?;
            apply_kernel(
                &mut self.device,
                self.worker,
                policy,
                self.messages.as_slice(),
                self.vertices.as_mut_slice(),
                self.values.as_mut_slice(),
            )?;
        }

        self.vertices.download(vertices).map_err(|e| self.fail(e))?;
        self.values.download(values).map_err(|e| self.fail(e))?;
        Ok(())
    }

    fn apply_reflected(
        &mut self,
        policy: &P,
        vertices: &mut [Vertex],
        values: &mut [P::Value],
        pending: &PendingSlots<P::Message>,
        stats: &mut ApplyStats,
    ) -> Result<(), EngineError> {
        let window = self.mapper.destination_window(self.capacity().max_messages);
        for batch in pending.to_message_set().drain_batches(window) {
            let index = ReflectionIndex::from_destinations(batch.iter().map(|m| m.dst));
            let reflected: Vec<Slot<P::Message>> = batch
                .into_iter()
                .enumerate()
                .map(|(dense, m)| {
                    let dense = VertexId::from(dense);
                    Some(Message::new(dense, dense, m.value))
                })
                .collect();
            stats.messages += reflected.len();
            stats.batches += 1;
            stats.reflected += 1;

            self.vertices
                .upload_vec(index.gather_vertices(vertices))
                .map_err(|e| self.fail(e))?;
            self.values.upload_vec(index.gather(values)).map_err(|e| self.fail(e))?;
            self.messages.upload_vec(reflected).map_err(|e| self.fail(e))?;

            apply_kernel(
                &mut self.device,
                self.worker,
                policy,
                self.messages.as_slice(),
                self.vertices.as_mut_slice(),
                self.values.as_mut_slice(),
            )?;

            let mut compact_vertices = index.gather_vertices(vertices);
            let mut compact_values = index.gather(values);
            self.vertices.download(&mut compact_vertices).map_err(|e| self.fail(e))?;
            self.values.download(&mut compact_values).map_err(|e| self.fail(e))?;

            index.scatter_active(&compact_vertices, vertices);
            index.scatter(&compact_values, values);
        }
        Ok(())
    }
}

impl<P: AlgorithmPolicy> BatchExecutor<P> for DeviceExecutor<P> {
    fn name(&self) -> &'static str {
        "device"
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

        let mut stats = BatchStats::default();
        if self.mapper.needs_reflection(vertex_count) {
            self.generate_reflected(policy, shard, values, pending, &mut stats)?;
        } else {
            self.generate_resident(policy, shard, values, pending, &mut stats)?;
        }

        debug!(
            worker = self.worker,
            edges = stats.edges,
            messages = stats.messages,
            batches = stats.batches,
            reflected = stats.reflected,
            "device generate+merge done"
        );
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

        let mut stats = ApplyStats::default();
        if self.mapper.needs_reflection(vertices.len()) {
            self.apply_reflected(policy, vertices, values, pending, &mut stats)?;
        } else {
            self.apply_resident(policy, vertices, values, pending, &mut stats)?;
        }
        stats.active = vertices.iter().filter(|v| v.is_active).count();

        debug!(
            worker = self.worker,
            applied = stats.messages,
            active = stats.active,
            batches = stats.batches,
            "device apply done"
        );
        Ok(stats)
    }

    fn release(&mut self) {
        self.vertices.release();
        self.values.release();
        self.filtered.release();
        self.edges.release();
        self.messages.release();
        self.merged.release();
        self.touched.release();
    }
}

/// One slot per edge; edges touching a filtered vertex yield the null sentinel
fn generate_kernel<P: AlgorithmPolicy>(
    device: &mut Device,
    policy: &P,
    vertices: &[Vertex],
    values: &[P::Value],
    filtered: &[bool],
    edges: &[Edge],
    out: &mut DeviceBuffer<Slot<P::Message>>,
) -> Result<(), DeviceError> {
    out.fill(edges.len(), None)?;
    let slots = out.as_mut_slice();
    device.launch("generate", edges.len(), |range| {
        slots[range.clone()]
            .par_iter_mut()
            .zip(edges[range].par_iter())
            .for_each(|(slot, edge)| {
                let (s, d) = (edge.src.index(), edge.dst.index());
                if filtered[s] || filtered[d] {
                    return;
                }
                *slot = policy
                    .transform(&vertices[s], &values[s], edge)
                    .map(|value| Message::new(edge.src, edge.dst, value));
            });
        Ok(())
    })
}

/// Fold message slots into per-destination accumulators, in slot order
fn merge_kernel<P: AlgorithmPolicy>(
    device: &mut Device,
    worker: usize,
    policy: &P,
    messages: &[Slot<P::Message>],
    merged: &mut [P::Message],
    touched: &mut [bool],
) -> Result<(), EngineError> {
    let mut invalid = None;
    let result = device.launch("merge", messages.len(), |range| {
        for message in messages[range].iter().flatten() {
            let idx = message.dst.index();
            if idx >= merged.len() {
                invalid = Some((message.src, message.dst));
                return Err(DeviceError::KernelFailed {
                    kernel: "merge",
                    reason: format!("destination {} out of range", message.dst),
                });
            }
            policy.merge(&mut merged[idx], &message.value);
            touched[idx] = true;
        }
        Ok(())
    });
    finish_launch(worker, result, invalid, merged.len())
}

/// Apply merged messages to their destination vertices
fn apply_kernel<P: AlgorithmPolicy>(
    device: &mut Device,
    worker: usize,
    policy: &P,
    messages: &[Slot<P::Message>],
    vertices: &mut [Vertex],
    values: &mut [P::Value],
) -> Result<(), EngineError> {
    let mut invalid = None;
    let result = device.launch("apply", messages.len(), |range| {
        for message in messages[range].iter().flatten() {
            let idx = message.dst.index();
            if idx >= values.len() {
                invalid = Some((message.src, message.dst));
                return Err(DeviceError::KernelFailed {
                    kernel: "apply",
                    reason: format!("destination {} out of range", message.dst),
                });
            }
            policy.reset_pending(&mut values[idx]);
            vertices[idx].is_active = policy.apply(&mut values[idx], &message.value);
        }
        Ok(())
    });
    finish_launch(worker, result, invalid, values.len())
}

fn finish_launch(
    worker: usize,
    result: Result<(), DeviceError>,
    invalid: Option<(VertexId, VertexId)>,
    vertex_count: usize,
) -> Result<(), EngineError> {
    match (result, invalid) {
        (Ok(()), _) => Ok(()),
        (Err(_), Some((src, dst))) => Err(EngineError::InvalidDestination {
            src,
            dst,
            vertex_count,
        }),
        (Err(e), None) => Err(EngineError::device(worker, e)),
    }
}
