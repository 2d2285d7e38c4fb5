//! Graph construction from flat task specifications.
//!
//! The builder turns an ordered list of [`TaskSpec`]s into a [`TaskGraph`]:
//! it parses agent types, rejects duplicate ids, and resolves each
//! dependency reference to a concrete task. A reference is matched against
//! task ids first and then against optional task names. Nothing is executed.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::core::cycle::CycleDetector;
use crate::core::dag::TaskGraph;
use crate::core::task::{AgentType, Task, TaskId, TaskSpec, TaskStatus};
use crate::error::{Error, Result};

/// Collects task specifications and builds a validated [`TaskGraph`].
#[derive(Debug, Default, Clone)]
pub struct GraphBuilder {
    specs: Vec<TaskSpec>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: impl IntoIterator<Item = TaskSpec>) -> Self {
        Self {
            specs: specs.into_iter().collect(),
        }
    }

    /// Append one specification; input order is preserved.
    pub fn add(mut self, spec: TaskSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Build the graph and gate it through the cycle detector.
    ///
    /// # Errors
    /// - [`Error::DuplicateTaskId`], [`Error::UnknownDependency`],
    ///   [`Error::AmbiguousDependency`] from reference resolution
    /// - [`Error::UnknownAgentType`] for an unparseable agent tag
    /// - [`Error::CycleDetected`] if the resolved edges form a cycle
    pub fn build(self) -> Result<TaskGraph> {
        let graph = self.build_unvalidated()?;

        if let Some(path) = CycleDetector::find_cycle(&graph) {
            warn!(
                cycle = %path.iter().map(TaskId::as_str).collect::<Vec<_>>().join(" -> "),
                "rejecting task graph with a dependency cycle"
            );
            return Err(Error::CycleDetected { path });
        }

        Ok(graph)
    }

    /// Resolve references and build the graph without checking for cycles.
    ///
    /// The result may violate the acyclicity invariant; it is meant for
    /// diagnostics with [`CycleDetector`], never for scheduling.
    pub fn build_unvalidated(self) -> Result<TaskGraph> {
        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut agent_types: Vec<AgentType> = Vec::with_capacity(self.specs.len());

        for spec in &self.specs {
            if spec.id.trim().is_empty() {
                return Err(Error::Validation("task id must not be empty".to_string()));
            }
            if !seen_ids.insert(spec.id.as_str()) {
                return Err(Error::DuplicateTaskId(TaskId::from(spec.id.as_str())));
            }
            agent_types.push(spec.agent_type.parse::<AgentType>()?);
        }

        let by_id: HashMap<&str, usize> = self
            .specs
            .iter()
            .enumerate()
            .map(|(order, spec)| (spec.id.as_str(), order))
            .collect();

        let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
        for (order, spec) in self.specs.iter().enumerate() {
            if let Some(name) = spec.name.as_deref() {
                by_name.entry(name).or_default().push(order);
            }
        }

        // Resolve every reference before touching the graph so a bad input
        // never yields a half-built structure.
        let mut resolved: Vec<Vec<usize>> = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            let mut deps: Vec<usize> = Vec::with_capacity(spec.dependencies.len());
            for reference in &spec.dependencies {
                let target = resolve_reference(spec, reference, &by_id, &by_name, &self.specs)?;
                if !deps.contains(&target) {
                    deps.push(target);
                }
            }
            resolved.push(deps);
        }

        let mut graph = TaskGraph::new();
        let mut indices = Vec::with_capacity(self.specs.len());

        for (order, (spec, agent_type)) in self.specs.iter().zip(agent_types).enumerate() {
            let dependencies = resolved[order]
                .iter()
                .map(|&dep| TaskId::from(self.specs[dep].id.as_str()))
                .collect();

            indices.push(graph.add_task(Task {
                id: TaskId::from(spec.id.as_str()),
                name: spec.name.clone(),
                agent_type,
                input: spec.input.clone(),
                dependencies,
                resource_footprint: spec.resource_footprint.iter().cloned().collect(),
                estimated_duration: spec.estimated_duration,
                priority: spec.priority,
                input_order: order,
                status: TaskStatus::Pending,
                started_at: None,
                completed_at: None,
            }));
        }

        for (order, deps) in resolved.iter().enumerate() {
            for &dep in deps {
                graph.add_edge(indices[dep], indices[order]);
            }
        }

        debug!(
            tasks = graph.task_count(),
            edges = graph.dependency_count(),
            "task graph built"
        );

        Ok(graph)
    }
}

fn resolve_reference(
    spec: &TaskSpec,
    reference: &str,
    by_id: &HashMap<&str, usize>,
    by_name: &HashMap<&str, Vec<usize>>,
    specs: &[TaskSpec],
) -> Result<usize> {
    if let Some(&order) = by_id.get(reference) {
        return Ok(order);
    }

    match by_name.get(reference).map(Vec::as_slice) {
        Some([order]) => Ok(*order),
        Some(candidates) if !candidates.is_empty() => Err(Error::AmbiguousDependency {
            task: TaskId::from(spec.id.as_str()),
            reference: reference.to_string(),
            candidates: candidates
                .iter()
                .map(|&c| TaskId::from(specs[c].id.as_str()))
                .collect(),
        }),
        _ => Err(Error::UnknownDependency {
            task: TaskId::from(spec.id.as_str()),
            dependency: reference.to_string(),
        }),
    }
}

/// Build a validated, acyclic task graph from specifications.
///
/// This is the single construction entry point used ahead of sequencing and
/// orchestration: structural problems surface here, before anything runs.
pub fn build_dag(specs: &[TaskSpec]) -> Result<TaskGraph> {
    GraphBuilder::from_specs(specs.iter().cloned()).build()
}
