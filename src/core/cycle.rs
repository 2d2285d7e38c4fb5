//! Cycle detection for task graphs.
//!
//! Depth-first search keeps two marker sets: `visited` (global, never
//! cleared) and `on_stack` (the current DFS path). An edge into a node that
//! is still on the stack is a back-edge, and a back-edge means a cycle.
//! Every node is tried as a root, so disconnected components are covered.

use petgraph::graph::NodeIndex;

use crate::core::dag::TaskGraph;
use crate::core::task::TaskId;

/// Stateless cycle detector over a [`TaskGraph`].
pub struct CycleDetector;

impl CycleDetector {
    /// Returns true if the graph contains at least one cycle.
    pub fn has_cycle(graph: &TaskGraph) -> bool {
        Self::find_cycle(graph).is_some()
    }

    /// Find one cycle and return it as a closed path in dependency order,
    /// e.g. `[a, b, c, a]` for `a -> b -> c -> a`.
    ///
    /// Roots are tried in input order, so the reported cycle is stable for a
    /// given input.
    pub fn find_cycle(graph: &TaskGraph) -> Option<Vec<TaskId>> {
        let mut search = Search {
            graph,
            visited: vec![false; graph.task_count()],
            on_stack: vec![false; graph.task_count()],
            path: Vec::new(),
        };

        for root in graph.node_indices() {
            if search.visited[root.index()] {
                continue;
            }
            if let Some(cycle) = search.visit(root) {
                return Some(
                    cycle
                        .into_iter()
                        .map(|index| graph.task_at(index).id.clone())
                        .collect(),
                );
            }
        }

        None
    }
}

struct Search<'a> {
    graph: &'a TaskGraph,
    visited: Vec<bool>,
    on_stack: Vec<bool>,
    path: Vec<NodeIndex>,
}

/// One suspended DFS level: a node, its dependents, and the next one to try.
struct Frame {
    node: NodeIndex,
    next: Vec<NodeIndex>,
    cursor: usize,
}

impl Search<'_> {
    fn enter(&mut self, node: NodeIndex) -> Frame {
        self.visited[node.index()] = true;
        self.on_stack[node.index()] = true;
        self.path.push(node);
        Frame {
            node,
            next: self.graph.dependents_of(node),
            cursor: 0,
        }
    }

    /// Iterative DFS from `root`; chain length is bounded by the heap, not
    /// the call stack.
    fn visit(&mut self, root: NodeIndex) -> Option<Vec<NodeIndex>> {
        let first = self.enter(root);
        let mut stack = vec![first];

        while let Some(frame) = stack.last_mut() {
            let Some(&next) = frame.next.get(frame.cursor) else {
                let node = frame.node;
                stack.pop();
                self.on_stack[node.index()] = false;
                self.path.pop();
                continue;
            };
            frame.cursor += 1;

            if self.on_stack[next.index()] {
                // Back-edge: slice the current path from `next` and close it.
                let start = self.path.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle = self.path[start..].to_vec();
                cycle.push(next);
                return Some(cycle);
            }
            if !self.visited[next.index()] {
                let child = self.enter(next);
                stack.push(child);
            }
        }

        None
    }
}
