//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building task specs whose input carries their id
//! - A scripted mock executor that audits resource claims while running
//! - Running a spec set through the full pipeline

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use conductor::core::{build_dag, AgentType, TaskGraph, TaskSpec};
use conductor::orchestration::{
    AgentExecutor, AgentRegistry, AgentResponse, BatchPlanner, Orchestrator, OrchestratorConfig,
    OrchestratorEvent, RunReport,
};
use conductor::{Error, Result};

/// A spec whose input is `{"id": <id>}` so the mock can identify it.
pub fn task(id: &str) -> TaskSpec {
    TaskSpec::new(id, AgentType::CodeGeneration).with_input(serde_json::json!({ "id": id }))
}

/// `count` independent tasks named `t0..tN`.
pub fn independent_tasks(count: usize) -> Vec<TaskSpec> {
    (0..count).map(|i| task(&format!("t{}", i))).collect()
}

/// a -> b, a -> c, b -> d, c -> d
pub fn diamond() -> Vec<TaskSpec> {
    vec![
        task("a"),
        task("b").depends_on("a"),
        task("c").depends_on("a"),
        task("d").depends_on("b").depends_on("c"),
    ]
}

/// Config with short timeouts suitable for tests.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        max_parallel: 8,
        task_timeout: Duration::from_secs(5),
        abort_on_failure: false,
        max_attempts: 1,
        retry_backoff: Duration::from_millis(1),
    }
}

/// What the mock does for one task.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(String),
    /// Fail the first `n` calls, then succeed.
    FailTimes(u32),
    /// Never return within any sensible timeout.
    Hang,
}

/// Scripted executor that records what ran and audits footprints.
///
/// Every call claims the task's resource footprint for its duration. A claim
/// on a resource that another in-flight task already holds is recorded as a
/// violation, which means two conflicting tasks ran concurrently.
#[derive(Default)]
pub struct MockExecutor {
    footprints: HashMap<String, BTreeSet<String>>,
    behaviors: HashMap<String, Behavior>,
    delay: Duration,
    held: Mutex<HashMap<String, String>>,
    violations: Mutex<Vec<String>>,
    started: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
    calls: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockExecutor {
    /// Mock that knows the footprint of every spec.
    pub fn for_specs(specs: &[TaskSpec]) -> Self {
        Self {
            footprints: specs
                .iter()
                .map(|s| (s.id.clone(), s.resource_footprint.iter().cloned().collect()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_behavior(mut self, id: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(id.to_string(), behavior);
        self
    }

    pub fn failing(self, id: &str) -> Self {
        self.with_behavior(id, Behavior::Fail(format!("{} failed", id)))
    }

    pub fn violations(&self) -> Vec<String> {
        self.violations.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }

    pub fn calls(&self, id: &str) -> u32 {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn was_dispatched(&self, id: &str) -> bool {
        self.calls(id) > 0
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn claim(&self, id: &str) {
        let mut held = self.held.lock().unwrap();
        for resource in self.footprints.get(id).into_iter().flatten() {
            if let Some(holder) = held.insert(resource.clone(), id.to_string()) {
                self.violations
                    .lock()
                    .unwrap()
                    .push(format!("{} and {} both hold {}", holder, id, resource));
            }
        }
    }

    fn release(&self, id: &str) {
        let mut held = self.held.lock().unwrap();
        for resource in self.footprints.get(id).into_iter().flatten() {
            if held.get(resource).map(String::as_str) == Some(id) {
                held.remove(resource);
            }
        }
    }
}

#[async_trait]
impl AgentExecutor for MockExecutor {
    async fn execute(
        &self,
        _agent_type: AgentType,
        input: &serde_json::Value,
    ) -> Result<AgentResponse> {
        let id = input["id"].as_str().unwrap_or_default().to_string();
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(id.clone()).or_default();
            *count += 1;
            *count
        };

        self.started.lock().unwrap().push(id.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.claim(&id);

        let behavior = self
            .behaviors
            .get(&id)
            .cloned()
            .unwrap_or(Behavior::Succeed);
        if matches!(behavior, Behavior::Hang) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.release(&id);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.finished.lock().unwrap().push(id.clone());

        match behavior {
            Behavior::Succeed | Behavior::Hang => {
                Ok(AgentResponse::success(serde_json::json!({ "id": id, "call": call })))
            }
            Behavior::Fail(message) => Ok(AgentResponse::failure(message)),
            Behavior::FailTimes(n) if call <= n => {
                Err(Error::Validation(format!("{} transient failure {}", id, call)))
            }
            Behavior::FailTimes(_) => {
                Ok(AgentResponse::success(serde_json::json!({ "id": id, "call": call })))
            }
        }
    }
}

/// Outcome of [`run_specs`].
pub struct Harness {
    pub report: RunReport,
    pub graph: TaskGraph,
    pub events: Vec<OrchestratorEvent>,
}

/// Build, plan, and orchestrate `specs` with `executor` handling every type.
pub async fn run_specs(
    specs: &[TaskSpec],
    executor: Arc<MockExecutor>,
    config: OrchestratorConfig,
) -> Harness {
    let mut graph = build_dag(specs).expect("specs should build");
    let plan = BatchPlanner::plan(&graph).expect("plan should build");
    plan.validate(&graph).expect("plan should be valid");

    let (tx, mut rx) = tokio::sync::mpsc::channel(1024);
    let report = Orchestrator::new(AgentRegistry::new().with_all(executor), config)
        .with_events(tx)
        .orchestrate(&mut graph, &plan)
        .await
        .expect("orchestrate should not fail");

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    Harness {
        report,
        graph,
        events,
    }
}
