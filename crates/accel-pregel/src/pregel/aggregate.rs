//! Cross-worker aggregation
//!
//! Workers own disjoint edge slices over the same vertex space, so a vertex
//! may receive partial updates from several workers in one iteration. Each
//! worker reports every vertex it touched; the aggregator reconciles the
//! reports into one canonical value per vertex:
//!
//! - touched by one worker: the reported value is adopted verbatim
//! - touched by several: their merged accumulators are folded with the
//!   policy's `merge` (in worker order) and applied once to the canonical value
//! - touched by none: the canonical value is kept
//!
//! The canonical active flag is the OR of the reporting workers' flags, and
//! for contested vertices also of the merged apply's own materiality.

use serde::Serialize;

use super::algorithm::AlgorithmPolicy;
use super::error::EngineError;
use super::executor::{ApplyStats, BatchStats};
use super::vertex::{Vertex, VertexId};

/// A worker's result for one vertex it touched
#[derive(Debug, Clone, PartialEq)]
pub struct VertexUpdate<V, M> {
    pub id: VertexId,
    /// Value after the worker's local apply
    pub value: V,
    /// Messages the worker merged for this vertex
    pub merged: M,
    pub is_active: bool,
}

/// Everything a worker returns for one iteration
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport<V, M> {
    pub worker: usize,
    pub iteration: usize,
    pub updates: Vec<VertexUpdate<V, M>>,
    pub generate: BatchStats,
    pub apply: ApplyStats,
}

pub type ReportFor<P> = WorkerReport<<P as AlgorithmPolicy>::Value, <P as AlgorithmPolicy>::Message>;

/// Counters from one aggregation step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateSummary {
    /// Vertices reported by at least one worker
    pub touched: usize,
    /// Vertices reported by more than one worker
    pub contested: usize,
    /// Vertices active after aggregation
    pub active: usize,
}

struct Contribution<'r, V, M> {
    first: &'r VertexUpdate<V, M>,
    merged: Option<M>,
    is_active: bool,
}

/// Reconciles per-worker reports into the canonical vertex state
pub struct CrossWorkerAggregator<'p, P> {
    policy: &'p P,
}

impl<'p, P: AlgorithmPolicy> CrossWorkerAggregator<'p, P> {
    pub fn new(policy: &'p P) -> Self {
        Self { policy }
    }

    /// Fold `reports` into `values` and `vertices`.
    ///
    /// All reports for the iteration must be present; nothing is written
    /// until every report has been validated.
    pub fn aggregate(
        &self,
        values: &mut [P::Value],
        vertices: &mut [Vertex],
        reports: &[ReportFor<P>],
    ) -> Result<AggregateSummary, EngineError> {
        let vertex_count = values.len();
        if vertices.len() != vertex_count {
            return Err(EngineError::illegal(format!(
                "{} vertices but {vertex_count} canonical values",
                vertices.len()
            )));
        }

        let mut slots: Vec<Option<Contribution<'_, P::Value, P::Message>>> =
            (0..vertex_count).map(|_| None).collect();
        let mut summary = AggregateSummary::default();

        for report in reports {
            for update in &report.updates {
                let slot = slots.get_mut(update.id.index()).ok_or(EngineError::InvalidDestination {
                    src: update.id,
                    dst: update.id,
                    vertex_count,
                })?;
                match slot {
                    None => {
                        summary.touched += 1;
                        *slot = Some(Contribution {
                            first: update,
                            merged: None,
                            is_active: update.is_active,
                        });
                    }
                    Some(c) => {
                        if c.merged.is_none() {
                            summary.contested += 1;
                        }
                        let acc = c.merged.get_or_insert_with(|| c.first.merged.clone());
                        self.policy.merge(acc, &update.merged);
                        c.is_active |= update.is_active;
                    }
                }
            }
        }

        for ((value, vertex), slot) in values.iter_mut().zip(vertices.iter_mut()).zip(slots) {
            match slot {
                None => vertex.is_active = false,
                Some(Contribution {
                    first,
                    merged: None,
                    is_active,
                }) => {
                    value.clone_from(&first.value);
                    vertex.is_active = is_active;
                }
                Some(Contribution {
                    merged: Some(merged),
                    is_active,
                    ..
                }) => {
                    self.policy.reset_pending(value);
                    // Partials may each fall below the threshold while their sum does not
                    let material = self.policy.apply(value, &merged);
                    vertex.is_active = is_active || material;
                }
            }
            if vertex.is_active {
                summary.active += 1;
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pregel::algorithm::{Distances, Label, LabelPropagation, LabelVotes, RankPropagation, RankValue, Relaxation};

    fn report<V, M>(worker: usize, updates: Vec<VertexUpdate<V, M>>) -> WorkerReport<V, M> {
        WorkerReport {
            worker,
            iteration: 1,
            updates,
            generate: BatchStats::default(),
            apply: ApplyStats::default(),
        }
    }

    fn update<V, M>(id: u32, value: V, merged: M, is_active: bool) -> VertexUpdate<V, M> {
        VertexUpdate {
            id: VertexId(id),
            value,
            merged,
            is_active,
        }
    }

    fn vertices(n: u32) -> Vec<Vertex> {
        (0..n).map(|i| Vertex::new(i).with_active(true)).collect()
    }

    #[test]
    fn test_untouched_vertex_keeps_value_and_goes_inactive() {
        let policy = RankPropagation::new(0.85);
        let mut values = vec![RankValue { rank: 0.4, delta: 0.1 }; 2];
        let mut vs = vertices(2);

        let summary = CrossWorkerAggregator::new(&policy)
            .aggregate(&mut values, &mut vs, &[report(0, vec![]), report(1, vec![])])
            .unwrap();

        assert_eq!(summary, AggregateSummary::default());
        assert_eq!(values[0], RankValue { rank: 0.4, delta: 0.1 });
        assert!(vs.iter().all(|v| !v.is_active));
    }

    #[test]
    fn test_single_report_is_adopted_verbatim() {
        let policy = RankPropagation::new(0.85);
        let mut values = vec![RankValue { rank: 0.4, delta: 0.1 }; 2];
        let mut vs = vertices(2);

        // Deliberately inconsistent with `merged` to prove no re-apply happens
        let reported = RankValue { rank: 9.0, delta: 3.0 };
        let reports = [report(0, vec![update(1, reported, 0.5, true)])];
        let summary = CrossWorkerAggregator::new(&policy)
            .aggregate(&mut values, &mut vs, &reports)
            .unwrap();

        assert_eq!(values[1], reported);
        assert!(vs[1].is_active);
        assert!(!vs[0].is_active);
        assert_eq!(summary.touched, 1);
        assert_eq!(summary.contested, 0);
    }

    #[test]
    fn test_rank_deltas_are_summed_across_workers() {
        let policy = RankPropagation::new(0.85);
        let canonical = RankValue { rank: 1.0, delta: 0.75 };
        let mut values = vec![canonical];
        let mut vs = vertices(1);

        let reports = [
            report(0, vec![update(0, RankValue { rank: 1.25, delta: 0.25 }, 0.25, true)]),
            report(1, vec![update(0, RankValue { rank: 1.5, delta: 0.5 }, 0.5, false)]),
        ];
        let summary = CrossWorkerAggregator::new(&policy)
            .aggregate(&mut values, &mut vs, &reports)
            .unwrap();

        assert_eq!(values[0], RankValue { rank: 1.75, delta: 0.75 });
        assert!(vs[0].is_active);
        assert_eq!(summary.contested, 1);
        assert_eq!(summary.active, 1);
    }

    #[test]
    fn test_sub_threshold_partials_activate_when_summed() {
        let policy = RankPropagation::new(0.5).with_threshold(0.1);
        let mut values = vec![RankValue { rank: 1.0 / 6.0, delta: 1.0 / 6.0 }];
        let mut vs = vertices(1);

        // Each worker saw 1/12 < 0.1 and left the vertex inactive
        let partial = 1.0 / 12.0;
        let local = RankValue { rank: 1.0 / 6.0 + partial, delta: partial };
        let reports = [
            report(0, vec![update(0, local, partial, false)]),
            report(1, vec![update(0, local, partial, false)]),
        ];
        let summary = CrossWorkerAggregator::new(&policy)
            .aggregate(&mut values, &mut vs, &reports)
            .unwrap();

        assert_eq!(values[0].delta, partial + partial);
        assert!(vs[0].is_active);
        assert_eq!(summary.active, 1);
    }

    #[test]
    fn test_relaxation_takes_minimum_across_workers() {
        let policy = Relaxation::new(2);
        let mut values = vec![Distances(vec![10.0, 10.0])];
        let mut vs = vertices(1);

        let reports = [
            report(0, vec![update(0, Distances(vec![4.0, 10.0]), Distances(vec![4.0, 12.0]), true)]),
            report(1, vec![update(0, Distances(vec![7.0, 3.0]), Distances(vec![7.0, 3.0]), true)]),
            report(2, vec![update(0, Distances(vec![5.0, 10.0]), Distances(vec![5.0, f64::INFINITY]), true)]),
        ];
        CrossWorkerAggregator::new(&policy)
            .aggregate(&mut values, &mut vs, &reports)
            .unwrap();

        assert_eq!(values[0], Distances(vec![4.0, 3.0]));
    }

    #[test]
    fn test_label_votes_are_combined_before_choosing() {
        let policy = LabelPropagation::new();
        let mut values = vec![Label(0)];
        let mut vs = vertices(1);

        // Locally each worker sees a different winner; combined, label 5 wins
        let reports = [
            report(0, vec![update(0, Label(2), LabelVotes(std::collections::BTreeMap::from([(2, 2), (5, 1)])), true)]),
            report(1, vec![update(0, Label(5), LabelVotes(std::collections::BTreeMap::from([(5, 2)])), true)]),
        ];
        CrossWorkerAggregator::new(&policy)
            .aggregate(&mut values, &mut vs, &reports)
            .unwrap();

        assert_eq!(values[0], Label(5));
    }

    #[test]
    fn test_out_of_range_report_is_fatal() {
        let policy = RankPropagation::new(0.85);
        let original = RankValue { rank: 0.0, delta: 0.0 };
        let mut values = vec![original; 2];
        let mut vs = vertices(2);

        let reports = [report(0, vec![update(0, RankValue { rank: 1.0, delta: 1.0 }, 1.0, true), update(7, original, 0.0, true)])];
        let err = CrossWorkerAggregator::new(&policy)
            .aggregate(&mut values, &mut vs, &reports)
            .unwrap_err();

        assert!(matches!(err, EngineError::InvalidDestination { .. }));
        // Nothing was written
        assert_eq!(values[0], original);
    }
}
