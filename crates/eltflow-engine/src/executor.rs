//! Local graph executor
//!
//! Runs a [`PipelineGraph`] against the collaborators. A node becomes ready
//! when every parent succeeded; ready nodes run concurrently, bounded by
//! `max_active_tasks`. A failure marks every descendant `upstream_failed`
//! while independent partition chains keep running.

use crate::error::{ExecutorError, TaskError};
use crate::runner::{run_action, Collaborators, TaskOutput};
use eltflow_core::{Config, RunReport, TaskRecord, TaskState};
use eltflow_dag::{PipelineGraph, TaskId, TaskNode};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Options for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Upper bound on concurrently running tasks
    pub max_active_tasks: usize,

    /// Tasks to mark skipped without running
    pub skip: BTreeSet<TaskId>,

    pub run_id: String,

    /// Pipeline description and tags, copied into the report metadata
    pub description: String,
    pub tags: Vec<String>,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_active_tasks: config.pipeline.max_active_tasks,
            description: config.pipeline.description.clone(),
            tags: config.pipeline.tags.clone(),
            ..Self::default()
        }
    }

    pub fn with_skip(mut self, tasks: impl IntoIterator<Item = impl Into<TaskId>>) -> Self {
        self.skip.extend(tasks.into_iter().map(Into::into));
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_active_tasks: 16,
            skip: BTreeSet::new(),
            run_id: format!("manual__{}", chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S")),
            description: String::new(),
            tags: Vec::new(),
        }
    }
}

/// Result of running one node to completion
struct Attempted {
    task_id: TaskId,
    attempts: u32,
    duration_ms: u64,
    result: Result<TaskOutput, TaskError>,
}

/// Executes pipeline graphs
pub struct Executor {
    collaborators: Collaborators,
    options: RunOptions,
}

impl Executor {
    pub fn new(collaborators: Collaborators, options: RunOptions) -> Self {
        Self {
            collaborators,
            options,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run every node of the graph and report the outcome of each
    pub async fn run(&self, graph: &PipelineGraph) -> Result<RunReport, ExecutorError> {
        let order: Vec<TaskId> = graph
            .topological_sort()
            .ok_or_else(|| ExecutorError::CyclicGraph(graph.dag_id().to_string()))?
            .into_iter()
            .cloned()
            .collect();
        if let Some(unknown) = self.options.skip.iter().find(|id| !graph.contains(id)) {
            return Err(ExecutorError::UnknownTask(unknown.clone()));
        }

        let mut report = RunReport::new(graph.dag_id(), &self.options.run_id);
        report.metadata = Some(serde_json::json!({
            "fingerprint": graph.fingerprint(),
            "adapters": self.collaborators.describe(),
            "description": self.options.description,
            "tags": self.options.tags,
        }));

        tracing::info!(
            dag_id = graph.dag_id(),
            run_id = %self.options.run_id,
            tasks = order.len(),
            max_active_tasks = self.options.max_active_tasks,
            "starting run"
        );

        let mut states: HashMap<TaskId, TaskState> =
            order.iter().map(|id| (id.clone(), TaskState::Pending)).collect();
        for id in &self.options.skip {
            states.insert(id.clone(), TaskState::Skipped);
            report.add_task(not_started(graph, id, TaskState::Skipped));
        }

        let semaphore = Arc::new(Semaphore::new(self.options.max_active_tasks.max(1)));
        let mut running: JoinSet<Attempted> = JoinSet::new();
        let mut spawned: HashMap<tokio::task::Id, TaskId> = HashMap::new();

        loop {
            self.propagate(graph, &order, &mut states, &mut report);

            for id in &order {
                if states[id] != TaskState::Pending || !parents_succeeded(graph, &states, id) {
                    continue;
                }
                let Some(node) = graph.node(id) else {
                    continue;
                };
                states.insert(id.clone(), TaskState::Running);
                let handle = running.spawn(attempt_node(
                    node.clone(),
                    self.collaborators.clone(),
                    Arc::clone(&semaphore),
                ));
                spawned.insert(handle.id(), id.clone());
            }

            let Some(joined) = running.join_next_with_id().await else {
                break;
            };

            let attempted = match joined {
                Ok((_, attempted)) => attempted,
                Err(e) => {
                    let task_id = spawned.get(&e.id()).cloned().unwrap_or_default();
                    Attempted {
                        task_id,
                        attempts: 1,
                        duration_ms: 0,
                        result: Err(TaskError::Aborted(e.to_string())),
                    }
                }
            };

            let state = self.record(graph, attempted, &mut report);
            if let Some((task_id, state)) = state {
                states.insert(task_id, state);
            }
        }

        report.finish();

        tracing::info!(
            dag_id = graph.dag_id(),
            succeeded = report.summary.succeeded,
            failed = report.summary.failed,
            upstream_failed = report.summary.upstream_failed,
            skipped = report.summary.skipped,
            "run finished"
        );

        Ok(report)
    }

    /// Mark pending nodes that can no longer run
    ///
    /// Walks in topological order so a whole chain settles in one pass.
    fn propagate(
        &self,
        graph: &PipelineGraph,
        order: &[TaskId],
        states: &mut HashMap<TaskId, TaskState>,
        report: &mut RunReport,
    ) {
        for id in order {
            if states[id] != TaskState::Pending {
                continue;
            }

            let parents: Vec<TaskState> = graph.parents(id).into_iter().map(|p| states[p]).collect();
            let next = if parents.iter().any(|s| s.is_failure()) {
                TaskState::UpstreamFailed
            } else if parents.iter().any(|s| *s == TaskState::Skipped) {
                TaskState::Skipped
            } else {
                continue;
            };

            tracing::warn!(task_id = %id, state = %next, "task will not run");
            states.insert(id.clone(), next);
            report.add_task(not_started(graph, id, next));
        }
    }

    fn record(
        &self,
        graph: &PipelineGraph,
        attempted: Attempted,
        report: &mut RunReport,
    ) -> Option<(TaskId, TaskState)> {
        let node = graph.node(&attempted.task_id)?;
        let mut record = TaskRecord {
            partition: node.partition.clone(),
            attempts: attempted.attempts,
            duration_ms: attempted.duration_ms,
            ..TaskRecord::not_started(&node.id, node.kind().as_str(), TaskState::Success)
        };

        match attempted.result {
            Ok(output) => {
                tracing::info!(task_id = %node.id, attempts = attempted.attempts, "task succeeded");
                record.rows_loaded = output.rows_loaded;
                record.job_id = output.job_id;
            }
            Err(error) => {
                tracing::error!(task_id = %node.id, attempts = attempted.attempts, error = %error, "task failed");
                record.state = TaskState::Failed;
                record.error = Some(error.to_string());
            }
        }

        let state = record.state;
        report.add_task(record);
        Some((node.id.clone(), state))
    }
}

fn parents_succeeded(graph: &PipelineGraph, states: &HashMap<TaskId, TaskState>, id: &str) -> bool {
    graph
        .parents(id)
        .into_iter()
        .all(|p| states[p] == TaskState::Success)
}

fn not_started(graph: &PipelineGraph, id: &str, state: TaskState) -> TaskRecord {
    let node = graph.node(id);
    TaskRecord {
        partition: node.and_then(|n| n.partition.clone()),
        ..TaskRecord::not_started(id, node.map_or("unknown", |n| n.kind().as_str()), state)
    }
}

/// Run a node with its retry policy
///
/// A concurrency permit is held for each attempt and released while waiting
/// out the retry delay, so a backing-off task does not block ready siblings.
async fn attempt_node(node: TaskNode, collaborators: Collaborators, semaphore: Arc<Semaphore>) -> Attempted {
    let started = Instant::now();
    let finish = |attempts: u32, result: Result<TaskOutput, TaskError>| Attempted {
        task_id: node.id.clone(),
        attempts,
        duration_ms: started.elapsed().as_millis() as u64,
        result,
    };

    let max_attempts = node.retry.max_attempts();
    let mut attempt = 0;
    loop {
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => return finish(attempt, Err(TaskError::Aborted(e.to_string()))),
        };

        attempt += 1;
        tracing::info!(task_id = %node.id, attempt, max_attempts, "running task");

        let outcome = run_action(&node.action, &collaborators).await;
        drop(permit);

        match outcome {
            Ok(output) => return finish(attempt, Ok(output)),
            Err(error) if attempt < max_attempts && error.is_retryable() => {
                tracing::warn!(
                    task_id = %node.id,
                    attempt,
                    error = %error,
                    retry_in_secs = node.retry.delay.as_secs(),
                    "task attempt failed, retrying"
                );
                tokio::time::sleep(node.retry.delay).await;
            }
            Err(error) => return finish(attempt, Err(error)),
        }
    }
}
