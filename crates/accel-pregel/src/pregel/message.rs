//! Messages, message sets and per-vertex pending accumulators
//!
//! Generation writes exactly one slot per edge into a [`MessageSet`]: either a
//! message or the null sentinel (`None`) when the edge produced nothing this
//! round. Null slots are skipped when the set is drained into batches.

use super::algorithm::AlgorithmPolicy;
use super::vertex::VertexId;

/// A single message travelling along an edge
#[derive(Debug, Clone, PartialEq)]
pub struct Message<M> {
    pub src: VertexId,
    pub dst: VertexId,
    pub value: M,
}

impl<M> Message<M> {
    pub fn new(src: VertexId, dst: VertexId, value: M) -> Self {
        Self { src, dst, value }
    }
}

/// Append-only ordered sequence of message slots
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSet<M> {
    slots: Vec<Option<Message<M>>>,
}

impl<M> Default for MessageSet<M> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<M> MessageSet<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, message: Message<M>) {
        self.slots.push(Some(message));
    }

    /// Record that an edge produced no message
    pub fn push_null(&mut self) {
        self.slots.push(None);
    }

    pub fn push_slot(&mut self, slot: Option<Message<M>>) {
        self.slots.push(slot);
    }

    /// Number of slots, including null sentinels
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn message_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn null_count(&self) -> usize {
        self.len() - self.message_count()
    }

    pub fn slots(&self) -> &[Option<Message<M>>] {
        &self.slots
    }

    /// Non-null messages in insertion order
    pub fn messages(&self) -> impl Iterator<Item = &Message<M>> {
        self.slots.iter().flatten()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Drain the set into batches of at most `batch_size` non-null messages.
    ///
    /// Null sentinels never occupy a batch position.
    pub fn drain_batches(self, batch_size: usize) -> MessageBatches<M> {
        MessageBatches {
            inner: self.slots.into_iter(),
            batch_size: batch_size.max(1),
        }
    }
}

impl<M> FromIterator<Option<Message<M>>> for MessageSet<M> {
    fn from_iter<I: IntoIterator<Item = Option<Message<M>>>>(iter: I) -> Self {
        Self {
            slots: iter.into_iter().collect(),
        }
    }
}

/// Iterator returned by [`MessageSet::drain_batches`]
pub struct MessageBatches<M> {
    inner: std::vec::IntoIter<Option<Message<M>>>,
    batch_size: usize,
}

impl<M> Iterator for MessageBatches<M> {
    type Item = Vec<Message<M>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut batch = Vec::with_capacity(self.batch_size);
        for message in self.inner.by_ref().flatten() {
            batch.push(message);
            if batch.len() == self.batch_size {
                break;
            }
        }
        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}

/// Per-vertex accumulators for one iteration.
///
/// Every slot starts at the policy's identity element. `touched` records
/// whether at least one message was merged into the slot this round.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSlots<M> {
    values: Vec<M>,
    touched: Vec<bool>,
}

impl<M: Clone> PendingSlots<M> {
    pub fn new(vertex_count: usize, identity: M) -> Self {
        Self {
            values: vec![identity; vertex_count],
            touched: vec![false; vertex_count],
        }
    }

    pub fn for_policy<P>(policy: &P, vertex_count: usize) -> Self
    where
        P: AlgorithmPolicy<Message = M>,
    {
        Self::new(vertex_count, policy.identity())
    }

    /// Reset every slot to the policy's identity element
    pub fn reset(&mut self, identity: &M) {
        for v in &mut self.values {
            v.clone_from(identity);
        }
        self.touched.fill(false);
    }

    /// Merge a message value into the slot of `dst`
    pub fn fold<P>(&mut self, policy: &P, dst: VertexId, value: &M)
    where
        P: AlgorithmPolicy<Message = M>,
    {
        let idx = dst.index();
        policy.merge(&mut self.values[idx], value);
        self.touched[idx] = true;
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, id: VertexId) -> Option<&M> {
        let idx = id.index();
        if *self.touched.get(idx)? {
            Some(&self.values[idx])
        } else {
            None
        }
    }

    pub fn is_touched(&self, id: VertexId) -> bool {
        self.touched.get(id.index()).copied().unwrap_or(false)
    }

    pub fn touched_count(&self) -> usize {
        self.touched.iter().filter(|t| **t).count()
    }

    pub fn values(&self) -> &[M] {
        &self.values
    }

    pub fn touched(&self) -> &[bool] {
        &self.touched
    }

    /// Mutable access to both arrays, for device downloads and scatter-back
    pub fn parts_mut(&mut self) -> (&mut [M], &mut [bool]) {
        (&mut self.values, &mut self.touched)
    }

    /// One merged message per touched vertex, in vertex order.
    ///
    /// Merged messages carry their destination as source: the originating
    /// edges are gone once values are folded.
    pub fn to_message_set(&self) -> MessageSet<M> {
        self.values
            .iter()
            .zip(&self.touched)
            .enumerate()
            .filter(|(_, (_, touched))| **touched)
            .map(|(i, (value, _))| {
                let id = VertexId::from(i);
                Some(Message::new(id, id, value.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pregel::algorithm::RankPropagation;

    fn msg(dst: u32, value: f64) -> Message<f64> {
        Message::new(VertexId(0), VertexId(dst), value)
    }

    #[test]
    fn test_message_set_counts_nulls() {
        let mut set = MessageSet::new();
        set.push(msg(1, 0.5));
        set.push_null();
        set.push(msg(2, 0.25));

        assert_eq!(set.len(), 3);
        assert_eq!(set.message_count(), 2);
        assert_eq!(set.null_count(), 1);
        assert_eq!(set.messages().count(), 2);
    }

    #[test]
    fn test_drain_batches_skips_nulls() {
        let mut set = MessageSet::new();
        for i in 0..5 {
            set.push(msg(i, i as f64));
            set.push_null();
        }

        let batches: Vec<_> = set.drain_batches(2).collect();
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(batches.iter().flatten().all(|m| m.value == m.dst.0 as f64));
    }

    #[test]
    fn test_drain_batches_all_null() {
        let set: MessageSet<f64> = (0..4).map(|_| None).collect();
        assert_eq!(set.drain_batches(3).count(), 0);
    }

    #[test]
    fn test_pending_slots_fold_and_reset() {
        let policy = RankPropagation::new(0.85);
        let mut pending = PendingSlots::for_policy(&policy, 3);

        pending.fold(&policy, VertexId(1), &0.25);
        pending.fold(&policy, VertexId(1), &0.5);

        assert_eq!(pending.get(VertexId(1)), Some(&0.75));
        assert_eq!(pending.get(VertexId(0)), None);
        assert_eq!(pending.touched_count(), 1);

        let set = pending.to_message_set();
        assert_eq!(set.len(), 1);
        assert_eq!(set.messages().next().unwrap().dst, VertexId(1));

        pending.reset(&0.0);
        assert_eq!(pending.touched_count(), 0);
        assert_eq!(pending.values(), &[0.0, 0.0, 0.0]);
    }
}
