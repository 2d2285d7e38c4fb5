//! Task graph (DAG) for dependency management.
//!
//! `TaskGraph` is an arena: tasks live in a petgraph `DiGraph` and are
//! addressed by `NodeIndex`, so traversal never chases live references.
//! Nodes are inserted in input order, which makes `NodeIndex::index()` equal
//! to the task's `input_order` and gives every algorithm a free, stable
//! tie-break.
//!
//! Edges point from a dependency to its dependent: `a -> b` means `a` must
//! succeed before `b` may start.

use crate::core::task::{Task, TaskId, TaskStatus};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, VecDeque};

/// The task dependency graph.
///
/// Graphs handed out by [`build_dag`](crate::core::build_dag) are acyclic;
/// that is established once at construction and not re-checked by the
/// accessors below. Status transitions are the only mutation after build.
#[derive(Clone)]
pub struct TaskGraph {
    /// The underlying directed graph.
    graph: DiGraph<Task, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    pub(crate) fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
        }
    }

    /// Add a task node. The builder guarantees ids are unique.
    pub(crate) fn add_task(&mut self, task: Task) -> NodeIndex {
        let id = task.id.clone();
        let index = self.graph.add_node(task);
        self.task_index.insert(id, index);
        index
    }

    /// Add a `dependency -> dependent` edge. Duplicate edges are ignored.
    pub(crate) fn add_edge(&mut self, dependency: NodeIndex, dependent: NodeIndex) {
        if self.graph.find_edge(dependency, dependent).is_none() {
            self.graph.add_edge(dependency, dependent, ());
        }
    }

    /// Get a reference to a task by its ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Get the task stored at a node index.
    ///
    /// # Panics
    /// Panics if `index` did not come from this graph.
    pub fn task_at(&self, index: NodeIndex) -> &Task {
        &self.graph[index]
    }

    pub(crate) fn task_at_mut(&mut self, index: NodeIndex) -> &mut Task {
        &mut self.graph[index]
    }

    /// Get the NodeIndex for a task by its ID.
    pub fn node_index(&self, id: &TaskId) -> Option<NodeIndex> {
        self.task_index.get(id).copied()
    }

    /// Get the number of tasks in the graph.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of dependency edges in the graph.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Node indices in input order.
    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// All tasks in input order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> + '_ {
        self.graph.node_weights()
    }

    /// Direct dependencies of a node, in input order.
    pub fn dependencies_of(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.sorted_neighbors(index, Direction::Incoming)
    }

    /// Direct dependents of a node, in input order.
    pub fn dependents_of(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.sorted_neighbors(index, Direction::Outgoing)
    }

    fn sorted_neighbors(&self, index: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        // petgraph yields neighbors newest-edge-first
        let mut neighbors: Vec<NodeIndex> =
            self.graph.neighbors_directed(index, direction).collect();
        neighbors.sort_unstable();
        neighbors.dedup();
        neighbors
    }

    /// All tasks that the given task depends on directly.
    pub fn get_dependencies(&self, id: &TaskId) -> Vec<&Task> {
        match self.node_index(id) {
            Some(index) => self
                .dependencies_of(index)
                .into_iter()
                .map(|dep| self.task_at(dep))
                .collect(),
            None => Vec::new(),
        }
    }

    /// All tasks that depend directly on the given task.
    pub fn get_dependents(&self, id: &TaskId) -> Vec<&Task> {
        match self.node_index(id) {
            Some(index) => self
                .dependents_of(index)
                .into_iter()
                .map(|dep| self.task_at(dep))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Every node reachable downstream of `index`, excluding `index` itself,
    /// in breadth-first order.
    pub fn transitive_dependents(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut seen = vec![false; self.graph.node_count()];
        let mut queue: VecDeque<NodeIndex> = self.dependents_of(index).into();
        let mut out = Vec::new();

        while let Some(next) = queue.pop_front() {
            if std::mem::replace(&mut seen[next.index()], true) {
                continue;
            }
            out.push(next);
            queue.extend(self.dependents_of(next));
        }

        out
    }

    /// True once every direct dependency of `index` has succeeded.
    pub fn dependencies_satisfied(&self, index: NodeIndex) -> bool {
        self.graph
            .neighbors_directed(index, Direction::Incoming)
            .all(|dep| self.graph[dep].status == TaskStatus::Succeeded)
    }

    /// Move every pending task whose dependencies have all succeeded to
    /// `Ready`. Returns the promoted nodes in input order.
    pub(crate) fn promote_ready(&mut self) -> Vec<NodeIndex> {
        let ready: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&index| {
                self.graph[index].status == TaskStatus::Pending
                    && self.dependencies_satisfied(index)
            })
            .collect();
        for &index in &ready {
            self.graph[index].mark_ready();
        }
        ready
    }

    /// Number of tasks that have not reached a terminal status.
    pub fn pending_count(&self) -> usize {
        self.tasks().filter(|t| !t.status.is_terminal()).count()
    }

    /// True when every task has reached a terminal status.
    pub fn all_terminal(&self) -> bool {
        self.pending_count() == 0
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
