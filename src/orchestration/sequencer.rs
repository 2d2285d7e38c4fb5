//! Ordering diagnostics for a task graph.
//!
//! The sequencer answers two questions about an acyclic [`TaskGraph`]:
//! in which order could the tasks run one at a time, and which dependency
//! chain is the longest. Neither answer is needed for correctness of a run;
//! both are used for planning and reporting.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

use crate::core::cycle::CycleDetector;
use crate::core::dag::TaskGraph;
use crate::core::task::TaskId;
use crate::error::{Error, Result};

/// The longest dependency chain through a graph.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CriticalPath {
    /// Tasks from a zero-dependency root to a task with no dependents.
    pub tasks: Vec<TaskId>,
    /// Number of dependency edges on the path; equals the maximum depth.
    pub length: usize,
    /// Sum of `estimated_duration` along the path.
    pub estimated_duration: u64,
}

/// Stateless topological sequencing over a [`TaskGraph`].
pub struct Sequencer;

impl Sequencer {
    /// Produce a linearization in which every dependency precedes its
    /// dependents.
    ///
    /// Kahn's algorithm with a min-heap keyed on `(priority, input_order)`:
    /// whenever several tasks are free, the lowest priority value goes first
    /// and input order breaks remaining ties, so the result is deterministic.
    pub fn topological_order(graph: &TaskGraph) -> Result<Vec<TaskId>> {
        Ok(Self::topological_indices(graph)?
            .into_iter()
            .map(|index| graph.task_at(index).id.clone())
            .collect())
    }

    pub(crate) fn topological_indices(graph: &TaskGraph) -> Result<Vec<NodeIndex>> {
        let mut in_degree: Vec<usize> = graph
            .node_indices()
            .map(|index| graph.dependencies_of(index).len())
            .collect();

        let key = |index: NodeIndex| Reverse((graph.task_at(index).priority, index.index()));

        let mut free: BinaryHeap<Reverse<(i32, usize)>> = graph
            .node_indices()
            .filter(|index| in_degree[index.index()] == 0)
            .map(key)
            .collect();

        let mut order = Vec::with_capacity(graph.task_count());

        while let Some(Reverse((_, raw))) = free.pop() {
            let index = NodeIndex::new(raw);
            order.push(index);

            for dependent in graph.dependents_of(index) {
                let degree = &mut in_degree[dependent.index()];
                *degree -= 1;
                if *degree == 0 {
                    free.push(key(dependent));
                }
            }
        }

        if order.len() != graph.task_count() {
            // Only reachable for graphs that skipped the construction gate.
            let path = CycleDetector::find_cycle(graph).unwrap_or_default();
            return Err(Error::CycleDetected { path });
        }

        Ok(order)
    }

    /// Depth of every node, indexed by `NodeIndex::index()`.
    ///
    /// `depth(n) = 0` without dependencies, otherwise
    /// `1 + max(depth(d))` over its dependencies.
    pub(crate) fn depth_vector(graph: &TaskGraph) -> Result<Vec<usize>> {
        let order = Self::topological_indices(graph)?;
        let mut depth = vec![0usize; graph.task_count()];

        for index in order {
            depth[index.index()] = graph
                .dependencies_of(index)
                .into_iter()
                .map(|dep| depth[dep.index()] + 1)
                .max()
                .unwrap_or(0);
        }

        Ok(depth)
    }

    /// Depth of every task, in input order.
    pub fn depths(graph: &TaskGraph) -> Result<Vec<(TaskId, usize)>> {
        let depth = Self::depth_vector(graph)?;
        Ok(graph
            .tasks()
            .map(|task| (task.id.clone(), depth[task.input_order]))
            .collect())
    }

    /// Find the longest dependency chain.
    ///
    /// The end point is a node of maximal depth; the chain is rebuilt by
    /// walking back through a dependency one level shallower at each step.
    /// Among equally deep candidates the one carrying the larger summed
    /// `estimated_duration` wins, then the earlier input position.
    pub fn critical_path(graph: &TaskGraph) -> Result<CriticalPath> {
        if graph.is_empty() {
            return Ok(CriticalPath::default());
        }

        let order = Self::topological_indices(graph)?;
        let count = graph.task_count();
        let mut depth = vec![0usize; count];
        // Heaviest duration of any maximal-depth chain ending at each node.
        let mut weight = vec![0u64; count];

        for &index in &order {
            let deps = graph.dependencies_of(index);
            let own = graph.task_at(index).estimated_duration;

            let node_depth = deps
                .iter()
                .map(|dep| depth[dep.index()] + 1)
                .max()
                .unwrap_or(0);
            let carried = deps
                .iter()
                .filter(|dep| depth[dep.index()] + 1 == node_depth)
                .map(|dep| weight[dep.index()])
                .max()
                .unwrap_or(0);

            depth[index.index()] = node_depth;
            weight[index.index()] = carried.saturating_add(own);
        }

        let max_depth = depth.iter().copied().max().unwrap_or(0);
        let mut current = heaviest(
            graph
                .node_indices()
                .filter(|index| depth[index.index()] == max_depth),
            &weight,
        );

        let mut path = Vec::with_capacity(max_depth + 1);
        while let Some(index) = current {
            path.push(index);
            let node_depth = depth[index.index()];
            if node_depth == 0 {
                break;
            }
            current = heaviest(
                graph
                    .dependencies_of(index)
                    .into_iter()
                    .filter(|dep| depth[dep.index()] + 1 == node_depth),
                &weight,
            );
        }
        path.reverse();

        let estimated_duration = path
            .last()
            .map(|end| weight[end.index()])
            .unwrap_or(0);

        Ok(CriticalPath {
            length: path.len().saturating_sub(1),
            tasks: path
                .into_iter()
                .map(|index| graph.task_at(index).id.clone())
                .collect(),
            estimated_duration,
        })
    }
}

/// Candidate with the largest carried weight, earliest input position on ties.
fn heaviest(candidates: impl Iterator<Item = NodeIndex>, weight: &[u64]) -> Option<NodeIndex> {
    candidates.min_by_key(|index| (Reverse(weight[index.index()]), index.index()))
}
