//! Failure handling: blocking, timeouts, retries, aborts, fatal errors.

use std::sync::Arc;
use std::time::Duration;

use conductor::config::Config;
use conductor::core::{build_dag, AgentType, TaskSpec, TaskStatus};
use conductor::orchestration::{
    AgentRegistry, BatchPlanner, ExecutionErrorKind, Orchestrator, OrchestratorConfig,
    OrchestratorEvent,
};
use conductor::Error;
use tokio_util::sync::CancellationToken;

use crate::fixtures::{run_specs, task, test_config, Behavior, MockExecutor};

#[tokio::test]
async fn test_failed_dependency_blocks_dependent() {
    let specs = vec![task("a"), task("b").depends_on("a")];
    let executor = Arc::new(MockExecutor::for_specs(&specs).failing("a"));
    let harness = run_specs(&specs, Arc::clone(&executor), test_config()).await;

    assert!(!harness.report.success);
    assert!(!executor.was_dispatched("b"));
    assert_eq!(
        harness.report.get("b").unwrap().error_kind(),
        Some(ExecutionErrorKind::Blocked)
    );
    let b = harness.graph.get_task(&"b".into()).unwrap();
    assert!(matches!(&b.status, TaskStatus::Blocked { reason } if reason.contains("a")));
}

#[tokio::test]
async fn test_independent_branch_completes_despite_failure() {
    let specs = vec![
        task("a"),
        task("b").depends_on("a"),
        task("c"),
        task("d").depends_on("c"),
    ];
    let executor = Arc::new(MockExecutor::for_specs(&specs).failing("a"));
    let harness = run_specs(&specs, Arc::clone(&executor), test_config()).await;

    assert!(!harness.report.success);
    assert!(harness.report.get("c").unwrap().success);
    assert!(harness.report.get("d").unwrap().success);
    assert!(!executor.was_dispatched("b"));
    assert_eq!(harness.report.results.len(), 4);
}

#[tokio::test]
async fn test_failure_blocks_whole_downstream_cone() {
    // a -> b -> d, a -> c -> d, d -> e ; x is unrelated
    let specs = vec![
        task("a"),
        task("b").depends_on("a"),
        task("c").depends_on("a"),
        task("d").depends_on("b").depends_on("c"),
        task("e").depends_on("d"),
        task("x"),
    ];
    let executor = Arc::new(MockExecutor::for_specs(&specs).failing("b"));
    let harness = run_specs(&specs, Arc::clone(&executor), test_config()).await;

    let report = &harness.report;
    assert!(report.get("a").unwrap().success);
    assert!(report.get("c").unwrap().success);
    assert!(report.get("x").unwrap().success);
    assert_eq!(report.failed().len(), 1);

    let mut blocked: Vec<&str> = report.blocked().iter().map(|id| id.as_str()).collect();
    blocked.sort();
    assert_eq!(blocked, vec!["d", "e"]);
    assert!(!executor.was_dispatched("d"));
    assert!(!executor.was_dispatched("e"));
}

#[tokio::test]
async fn test_every_task_has_a_result() {
    let specs = vec![
        task("a"),
        task("b").depends_on("a"),
        task("c").depends_on("b"),
        task("d"),
    ];
    let executor = Arc::new(MockExecutor::for_specs(&specs).failing("a").failing("d"));
    let harness = run_specs(&specs, executor, test_config()).await;

    assert_eq!(harness.report.results.len(), specs.len());
    assert!(harness.graph.all_terminal());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_recorded_as_failure() {
    let specs = vec![task("slow"), task("fast"), task("next").depends_on("slow")];
    let executor = Arc::new(MockExecutor::for_specs(&specs).with_behavior("slow", Behavior::Hang));
    let config = OrchestratorConfig {
        task_timeout: Duration::from_millis(100),
        ..test_config()
    };
    let harness = run_specs(&specs, Arc::clone(&executor), config).await;

    let slow = harness.report.get("slow").unwrap();
    assert_eq!(slow.error_kind(), Some(ExecutionErrorKind::Timeout));
    assert!(harness.report.get("fast").unwrap().success);
    assert_eq!(
        harness.report.get("next").unwrap().error_kind(),
        Some(ExecutionErrorKind::Blocked)
    );
    assert!(!executor.was_dispatched("next"));
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let specs = vec![task("flaky"), task("after").depends_on("flaky")];
    let executor =
        Arc::new(MockExecutor::for_specs(&specs).with_behavior("flaky", Behavior::FailTimes(1)));
    let config = OrchestratorConfig {
        max_attempts: 2,
        ..test_config()
    };
    let harness = run_specs(&specs, Arc::clone(&executor), config).await;

    assert!(harness.report.success);
    assert_eq!(harness.report.get("flaky").unwrap().attempt, 2);
    assert_eq!(executor.calls("flaky"), 2);
    assert!(harness
        .events
        .iter()
        .any(|e| matches!(e, OrchestratorEvent::TaskRetrying { attempt: 2, .. })));
}

#[tokio::test]
async fn test_without_retries_transient_failure_sticks() {
    let specs = vec![task("flaky")];
    let executor =
        Arc::new(MockExecutor::for_specs(&specs).with_behavior("flaky", Behavior::FailTimes(1)));
    let harness = run_specs(&specs, Arc::clone(&executor), test_config()).await;

    let result = harness.report.get("flaky").unwrap();
    assert!(!result.success);
    assert_eq!(result.error_kind(), Some(ExecutionErrorKind::Agent));
    assert_eq!(executor.calls("flaky"), 1);
}

#[tokio::test]
async fn test_abort_on_failure_stops_after_current_batch() {
    let specs = vec![
        task("a"),
        task("b"),
        task("c").depends_on("b"),
        task("d").depends_on("c"),
    ];
    let executor = Arc::new(MockExecutor::for_specs(&specs).failing("a"));
    let config = OrchestratorConfig {
        abort_on_failure: true,
        ..test_config()
    };
    let harness = run_specs(&specs, Arc::clone(&executor), config).await;

    // b shared a's batch and still ran.
    assert!(harness.report.get("b").unwrap().success);
    for id in ["c", "d"] {
        assert_eq!(
            harness.report.get(id).unwrap().error_kind(),
            Some(ExecutionErrorKind::Aborted)
        );
        assert!(!executor.was_dispatched(id));
    }
}

#[tokio::test]
async fn test_caller_cancellation_between_batches() {
    let specs = vec![task("a"), task("b").depends_on("a")];
    let mut graph = build_dag(&specs).unwrap();
    let plan = BatchPlanner::plan(&graph).unwrap();
    let executor = Arc::new(MockExecutor::for_specs(&specs));
    let token = CancellationToken::new();

    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let orchestrator = Orchestrator::new(
        AgentRegistry::new().with_all(executor.clone()),
        test_config(),
    )
    .with_events(tx)
    .with_cancellation(token.clone());

    // Cancel as soon as the first task reports success.
    let watcher = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if matches!(event, OrchestratorEvent::TaskSucceeded { .. }) {
                token.cancel();
            }
        }
    });

    let report = orchestrator.orchestrate(&mut graph, &plan).await.unwrap();
    drop(orchestrator);
    watcher.await.unwrap();

    assert!(report.get("a").unwrap().success);
    // The cancel may race the batch boundary; either way nothing fails.
    let b = report.get("b").unwrap();
    assert!(b.success || b.error_kind() == Some(ExecutionErrorKind::Aborted));
    assert!(report.failed().is_empty());
}

#[tokio::test]
async fn test_cycle_rejected_before_dispatch() {
    let specs = vec![
        task("a").depends_on("c"),
        task("b").depends_on("a"),
        task("c").depends_on("b"),
    ];
    let executor = Arc::new(MockExecutor::for_specs(&specs));
    let err = conductor::run(
        &specs,
        AgentRegistry::new().with_all(executor.clone()),
        &Config::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::CycleDetected { .. }));
    assert!(err.is_structural());
    assert!(executor.started().is_empty());
}

#[tokio::test]
async fn test_unknown_dependency_rejected_before_dispatch() {
    let specs = vec![task("a"), task("b").depends_on("ghost")];
    let executor = Arc::new(MockExecutor::for_specs(&specs));
    let err = conductor::run(
        &specs,
        AgentRegistry::new().with_all(executor.clone()),
        &Config::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        Error::UnknownDependency { ref dependency, .. } if dependency == "ghost"
    ));
    assert!(executor.started().is_empty());
}

#[tokio::test]
async fn test_unknown_agent_type_is_configuration_error() {
    let mut spec = task("a");
    spec.agent_type = "astrology".to_string();
    let err = conductor::run(&[spec], AgentRegistry::new(), &Config::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownAgentType(_)));
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_unmapped_agent_type_rejected_before_dispatch() {
    let specs = vec![
        task("a"),
        TaskSpec::new("ship", AgentType::Deployment).depends_on("a"),
    ];
    let executor = Arc::new(MockExecutor::for_specs(&specs));
    let registry = AgentRegistry::new().with(AgentType::CodeGeneration, executor.clone());

    let err = conductor::run(&specs, registry, &Config::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnmappedAgentType(AgentType::Deployment)));
    assert!(executor.started().is_empty());
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let config = Config {
        max_parallel: 0,
        ..Config::default()
    };
    let err = conductor::run(&[task("a")], AgentRegistry::new(), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}
