//! Resource isolation and concurrency limits observed at run time.

use std::sync::Arc;
use std::time::Duration;

use conductor::core::build_dag;
use conductor::orchestration::{BatchPlanner, OrchestratorConfig};

use crate::fixtures::{independent_tasks, run_specs, task, test_config, MockExecutor};

#[tokio::test]
async fn test_conflicting_tasks_never_overlap() {
    // Every task touches the shared lockfile plus one private file.
    let specs: Vec<_> = (0..6)
        .map(|i| {
            task(&format!("edit{}", i))
                .touches("Cargo.lock")
                .touches(&format!("src/mod{}.rs", i))
        })
        .collect();
    let executor = Arc::new(MockExecutor::for_specs(&specs).with_delay(Duration::from_millis(10)));
    let harness = run_specs(&specs, Arc::clone(&executor), test_config()).await;

    assert!(harness.report.success);
    assert!(executor.violations().is_empty(), "{:?}", executor.violations());
    assert_eq!(executor.max_in_flight(), 1);
}

#[tokio::test]
async fn test_disjoint_footprints_share_a_batch() {
    let specs: Vec<_> = (0..4)
        .map(|i| task(&format!("w{}", i)).touches(&format!("file{}", i)))
        .collect();
    let graph = build_dag(&specs).unwrap();
    assert_eq!(BatchPlanner::plan(&graph).unwrap().batches.len(), 1);

    let executor = Arc::new(MockExecutor::for_specs(&specs).with_delay(Duration::from_millis(30)));
    let harness = run_specs(&specs, Arc::clone(&executor), test_config()).await;
    assert!(harness.report.success);
    assert!(executor.violations().is_empty());
    assert!(executor.max_in_flight() > 1);
}

#[tokio::test]
async fn test_mixed_workload_has_no_violations() {
    let specs = vec![
        task("schema").touches("db/schema.sql"),
        task("seed").touches("db/seed.sql"),
        task("migrate")
            .depends_on("schema")
            .touches("db/schema.sql")
            .touches("db/migrations"),
        task("api").depends_on("schema").touches("src/api.rs"),
        task("client").depends_on("schema").touches("src/api.rs"),
        task("docs").touches("README.md"),
        task("release")
            .depends_on("migrate")
            .depends_on("api")
            .depends_on("client")
            .touches("README.md")
            .touches("Cargo.toml"),
    ];
    let executor = Arc::new(MockExecutor::for_specs(&specs).with_delay(Duration::from_millis(5)));
    let harness = run_specs(&specs, Arc::clone(&executor), test_config()).await;

    assert!(harness.report.success);
    assert!(executor.violations().is_empty(), "{:?}", executor.violations());
}

#[tokio::test]
async fn test_max_parallel_bounds_concurrency() {
    let specs = independent_tasks(10);
    let executor = Arc::new(MockExecutor::for_specs(&specs).with_delay(Duration::from_millis(20)));
    let config = OrchestratorConfig {
        max_parallel: 3,
        ..test_config()
    };
    let harness = run_specs(&specs, Arc::clone(&executor), config).await;

    assert!(harness.report.success);
    assert!(executor.max_in_flight() <= 3);
    assert_eq!(executor.started().len(), 10);
}

#[tokio::test]
async fn test_single_worker_runs_everything_sequentially() {
    let specs = independent_tasks(4);
    let executor = Arc::new(MockExecutor::for_specs(&specs).with_delay(Duration::from_millis(5)));
    let config = OrchestratorConfig {
        max_parallel: 1,
        ..test_config()
    };
    let harness = run_specs(&specs, Arc::clone(&executor), config).await;

    assert!(harness.report.success);
    assert_eq!(executor.max_in_flight(), 1);
}

#[test]
fn test_plan_membership_is_stable_across_builds() {
    let specs = vec![
        task("a").touches("x").with_priority(2),
        task("b").touches("x").with_priority(1),
        task("c").touches("y"),
        task("d").touches("y").touches("x"),
        task("e").depends_on("a").touches("z"),
        task("f").depends_on("b").touches("z"),
    ];
    let plans: Vec<_> = (0..5)
        .map(|_| BatchPlanner::plan(&build_dag(&specs).unwrap()).unwrap())
        .collect();
    assert!(plans.windows(2).all(|w| w[0] == w[1]));
}
