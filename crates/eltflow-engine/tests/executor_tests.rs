//! Executor behavior against mock collaborators

use eltflow_core::{Config, TaskState};
use eltflow_dag::{build_pipeline, PipelineGraph, CHECK_TASK_ID, JOIN_TASK_ID, LOAD_TASK_ID};
use eltflow_engine::{Collaborators, Executor, ExecutorError, RunOptions};
use eltflow_sql::BoundQuery;
use eltflow_warehouse::{JobResult, MockObjectStore, MockWarehouse, QueryEngine, WarehouseError};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const USA_TABLE: &str = "elt-pipeline-gcp-and-airflow.transformed_dataset.usa_table";
const NIGERIA_TABLE: &str = "elt-pipeline-gcp-and-airflow.transformed_dataset.nigeria_table";
const STAGING_TABLE: &str = "elt-pipeline-gcp-and-airflow.staging_dataset.global_data";

fn config(keys: &[&str], retries: u32) -> Config {
    let mut config = Config::example();
    config.partitions.keys = keys.iter().map(|k| k.to_string()).collect();
    config.defaults.retries = retries;
    config
}

fn setup(config: &Config) -> (PipelineGraph, MockObjectStore, MockWarehouse) {
    let graph = build_pipeline(config).unwrap();
    let store = MockObjectStore::with_objects([&config.source.object_ref()]);
    let warehouse = MockWarehouse::new().with_rows_loaded(1_000);
    (graph, store, warehouse)
}

fn executor(store: &MockObjectStore, warehouse: &MockWarehouse, options: RunOptions) -> Executor {
    let warehouse = Arc::new(warehouse.clone());
    Executor::new(
        Collaborators::new(Arc::new(store.clone()), warehouse.clone(), warehouse),
        options,
    )
}

#[tokio::test(start_paused = true)]
async fn successful_run() {
    let config = config(&["Nigeria", "USA"], 1);
    let (graph, store, warehouse) = setup(&config);

    let report = executor(&store, &warehouse, RunOptions::from_config(&config))
        .run(&graph)
        .await
        .unwrap();

    assert_eq!(report.summary.total, 7);
    assert_eq!(report.summary.succeeded, 7);
    assert!(!report.has_failures());
    assert!(report.finished_at.is_some());

    let load = report.task(LOAD_TASK_ID).unwrap();
    assert_eq!(load.rows_loaded, Some(1_000));
    assert_eq!(load.attempts, 1);

    // join is always last
    assert_eq!(report.tasks.last().unwrap().task_id, JOIN_TASK_ID);
    assert_eq!(warehouse.executed().await.len(), 4);
    assert_eq!(report.task("create_view_usa").unwrap().partition.as_deref(), Some("usa"));

    let metadata = report.metadata.as_ref().unwrap();
    assert_eq!(metadata["description"], config.pipeline.description.as_str());
    assert_eq!(metadata["tags"], serde_json::json!(["bigquery", "gcs", "csv"]));
}

#[tokio::test(start_paused = true)]
async fn failed_partition_blocks_only_its_chain() {
    let config = config(&["Nigeria", "USA"], 0);
    let (graph, store, warehouse) = setup(&config);
    warehouse
        .fail_table(USA_TABLE, WarehouseError::Query("Resources exceeded".to_string()))
        .await;

    let report = executor(&store, &warehouse, RunOptions::from_config(&config))
        .run(&graph)
        .await
        .unwrap();

    assert_eq!(report.state_of("create_table_usa"), Some(TaskState::Failed));
    assert_eq!(report.state_of("create_view_usa"), Some(TaskState::UpstreamFailed));
    assert_eq!(report.state_of(JOIN_TASK_ID), Some(TaskState::UpstreamFailed));
    assert_eq!(report.state_of("create_table_nigeria"), Some(TaskState::Success));
    assert_eq!(report.state_of("create_view_nigeria"), Some(TaskState::Success));
    assert!(report.has_failures());

    let failed = report.task("create_table_usa").unwrap();
    assert!(failed.error.as_deref().unwrap().contains("Resources exceeded"));
    assert_eq!(report.task(JOIN_TASK_ID).unwrap().attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn sensor_timeout_fails_everything_downstream() {
    let config = config(&["Nigeria", "USA"], 1);
    let graph = build_pipeline(&config).unwrap();
    let store = MockObjectStore::new();
    let warehouse = MockWarehouse::new();

    let report = executor(&store, &warehouse, RunOptions::from_config(&config))
        .run(&graph)
        .await
        .unwrap();

    let check = report.task(CHECK_TASK_ID).unwrap();
    assert_eq!(check.state, TaskState::Failed);
    assert_eq!(check.attempts, 1);
    assert!(check.error.as_deref().unwrap().contains("did not appear"));

    assert_eq!(report.summary.upstream_failed, 2 * 2 + 2);
    assert!(warehouse.loads().await.is_empty());
    assert!(warehouse.executed().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_load_failure_is_retried() {
    let config = config(&["Nigeria"], 1);
    let (graph, store, warehouse) = setup(&config);
    warehouse
        .fail_table_times(STAGING_TABLE, 1, WarehouseError::Load("backend error".to_string()))
        .await;

    let report = executor(&store, &warehouse, RunOptions::from_config(&config))
        .run(&graph)
        .await
        .unwrap();

    let load = report.task(LOAD_TASK_ID).unwrap();
    assert_eq!(load.state, TaskState::Success);
    assert_eq!(load.attempts, 2);
    assert_eq!(report.state_of(JOIN_TASK_ID), Some(TaskState::Success));
}

#[tokio::test(start_paused = true)]
async fn retry_delay_frees_the_slot() {
    let config = config(&["Nigeria", "USA"], 1);
    let (graph, store, warehouse) = setup(&config);
    warehouse
        .fail_table_times(NIGERIA_TABLE, 1, WarehouseError::Query("rate limited".to_string()))
        .await;

    let options = RunOptions {
        max_active_tasks: 1,
        ..RunOptions::from_config(&config)
    };
    let report = executor(&store, &warehouse, options).run(&graph).await.unwrap();
    assert_eq!(report.task("create_table_nigeria").unwrap().attempts, 2);
    assert_eq!(report.summary.succeeded, 7);

    // the usa chain finishes while nigeria waits out its retry delay
    let targets = warehouse.executed_targets().await;
    let position = |suffix: &str| targets.iter().position(|t| t.ends_with(suffix)).unwrap();
    assert!(position("usa_view") < position("nigeria_table"), "{:?}", targets);

    // the load ran in the configured location
    assert_eq!(warehouse.loads().await[0].location, config.warehouse.location);
}

#[tokio::test(start_paused = true)]
async fn retries_are_exhausted() {
    let config = config(&["Nigeria"], 2);
    let (graph, store, warehouse) = setup(&config);
    warehouse
        .fail_table(STAGING_TABLE, WarehouseError::Load("bad csv".to_string()))
        .await;

    let report = executor(&store, &warehouse, RunOptions::from_config(&config))
        .run(&graph)
        .await
        .unwrap();

    let load = report.task(LOAD_TASK_ID).unwrap();
    assert_eq!(load.state, TaskState::Failed);
    assert_eq!(load.attempts, 3);
    assert_eq!(report.summary.upstream_failed, 3);
}

#[tokio::test(start_paused = true)]
async fn skipped_task_skips_descendants() {
    let config = config(&["Nigeria", "USA"], 0);
    let (graph, store, warehouse) = setup(&config);

    let options = RunOptions::from_config(&config).with_skip(["create_table_usa"]);
    let report = executor(&store, &warehouse, options).run(&graph).await.unwrap();

    assert_eq!(report.state_of("create_table_usa"), Some(TaskState::Skipped));
    assert_eq!(report.state_of("create_view_usa"), Some(TaskState::Skipped));
    assert_eq!(report.state_of(JOIN_TASK_ID), Some(TaskState::Skipped));
    assert_eq!(report.state_of("create_view_nigeria"), Some(TaskState::Success));
    assert_eq!(report.summary.skipped, 3);
    assert!(!report.has_failures());
}

#[tokio::test(start_paused = true)]
async fn unknown_skip_is_rejected() {
    let config = config(&["Nigeria"], 0);
    let (graph, store, warehouse) = setup(&config);

    let options = RunOptions::default().with_skip(["create_table_usa"]);
    let err = executor(&store, &warehouse, options).run(&graph).await.unwrap_err();
    assert_eq!(err, ExecutorError::UnknownTask("create_table_usa".to_string()));
}

/// Query engine that records how many statements run at once
#[derive(Default)]
struct ConcurrencyTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait::async_trait]
impl QueryEngine for ConcurrencyTracker {
    fn name(&self) -> &'static str {
        "Tracker"
    }

    async fn execute_ddl(
        &self,
        _query: &BoundQuery,
        _use_legacy_sql: bool,
        _location: &str,
    ) -> Result<JobResult, WarehouseError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(JobResult {
            job_id: None,
            rows_affected: None,
        })
    }
}

async fn peak_concurrency(max_active_tasks: usize) -> usize {
    let config = Config::example();
    let (graph, store, warehouse) = setup(&config);
    let tracker = Arc::new(ConcurrencyTracker::default());

    let options = RunOptions {
        max_active_tasks,
        ..RunOptions::default()
    };
    let executor = Executor::new(
        Collaborators::new(Arc::new(store), Arc::new(warehouse), tracker.clone()),
        options,
    );
    let report = executor.run(&graph).await.unwrap();
    assert_eq!(report.summary.succeeded, graph.node_count());

    tracker.peak.load(Ordering::SeqCst)
}

#[tokio::test(start_paused = true)]
async fn partition_chains_run_in_parallel() {
    // every partition table becomes ready when the load finishes
    assert!(peak_concurrency(16).await >= 8);
}

#[tokio::test(start_paused = true)]
async fn concurrency_is_bounded() {
    assert_eq!(peak_concurrency(2).await, 2);
    assert_eq!(peak_concurrency(1).await, 1);
}
