//! Batch planning.
//!
//! Turns an acyclic [`TaskGraph`] into an [`ExecutionPlan`]: an ordered list
//! of batches where every task's dependencies sit in earlier batches and no
//! two tasks in one batch touch the same resource.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::dag::TaskGraph;
use crate::core::task::TaskId;
use crate::error::{Error, Result};
use crate::orchestration::sequencer::Sequencer;

/// Tasks that may run at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Dependency depth shared by every task in the batch.
    pub level: usize,
    pub tasks: Vec<TaskId>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// An ordered sequence of batches, owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub batches: Vec<Batch>,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total number of tasks across all batches.
    pub fn task_count(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }

    /// Number of distinct depth levels in the plan.
    pub fn level_count(&self) -> usize {
        self.batches
            .iter()
            .map(|batch| batch.level)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Check the plan against `graph`.
    ///
    /// Every task of the graph must appear exactly once, all of its
    /// dependencies must be placed in strictly earlier batches, and
    /// footprints within a batch must be pairwise disjoint.
    pub fn validate(&self, graph: &TaskGraph) -> Result<()> {
        let mut placed: HashMap<&TaskId, usize> = HashMap::new();

        for (position, batch) in self.batches.iter().enumerate() {
            let mut claimed: BTreeMap<&str, &TaskId> = BTreeMap::new();

            for id in &batch.tasks {
                let task = graph.get_task(id).ok_or_else(|| {
                    Error::Validation(format!("plan references unknown task {}", id))
                })?;

                if placed.insert(id, position).is_some() {
                    return Err(Error::Validation(format!(
                        "task {} is scheduled more than once",
                        id
                    )));
                }

                for resource in &task.resource_footprint {
                    if let Some(other) = claimed.insert(resource.as_str(), id) {
                        return Err(Error::Validation(format!(
                            "tasks {} and {} share resource '{}' in batch {}",
                            other, id, resource, position
                        )));
                    }
                }
            }
        }

        for task in graph.tasks() {
            let position = placed.get(&task.id).ok_or_else(|| {
                Error::Validation(format!("task {} is missing from the plan", task.id))
            })?;

            for dep in &task.dependencies {
                match placed.get(dep) {
                    Some(dep_position) if dep_position < position => {}
                    _ => {
                        return Err(Error::Validation(format!(
                            "task {} is scheduled before its dependency {}",
                            task.id, dep
                        )))
                    }
                }
            }
        }

        Ok(())
    }
}

/// Greedy, resource-aware batch planner.
///
/// Tasks are grouped by dependency depth. Inside a level they are scanned in
/// `(priority, input_order)` order and each scan collects every task whose
/// footprint does not intersect what the batch has already claimed; whatever
/// is left over seeds the next batch. A task that conflicts with everything
/// simply ends up alone.
///
/// This is a first-fit heuristic. It always produces a valid plan but makes
/// no claim of a minimal batch count.
pub struct BatchPlanner;

impl BatchPlanner {
    pub fn plan(graph: &TaskGraph) -> Result<ExecutionPlan> {
        let depth = Sequencer::depth_vector(graph)?;

        let mut levels: BTreeMap<usize, Vec<NodeIndex>> = BTreeMap::new();
        for index in graph.node_indices() {
            levels.entry(depth[index.index()]).or_default().push(index);
        }

        let mut batches = Vec::new();
        for (level, mut remaining) in levels {
            remaining.sort_by_key(|&index| (graph.task_at(index).priority, index.index()));

            while !remaining.is_empty() {
                let (batch, leftover) = Self::fill_batch(graph, remaining);
                debug!(level, size = batch.len(), "planned batch");
                batches.push(Batch {
                    level,
                    tasks: batch
                        .into_iter()
                        .map(|index| graph.task_at(index).id.clone())
                        .collect(),
                });
                remaining = leftover;
            }
        }

        Ok(ExecutionPlan { batches })
    }

    /// One greedy scan: split `candidates` into a conflict-free batch and
    /// the tasks that have to wait for a later one.
    fn fill_batch(
        graph: &TaskGraph,
        candidates: Vec<NodeIndex>,
    ) -> (Vec<NodeIndex>, Vec<NodeIndex>) {
        let mut claimed: BTreeSet<&str> = BTreeSet::new();
        let mut batch = Vec::new();
        let mut leftover = Vec::new();

        for index in candidates {
            let footprint = &graph.task_at(index).resource_footprint;
            if footprint.iter().any(|r| claimed.contains(r.as_str())) {
                leftover.push(index);
            } else {
                claimed.extend(footprint.iter().map(String::as_str));
                batch.push(index);
            }
        }

        (batch, leftover)
    }
}
