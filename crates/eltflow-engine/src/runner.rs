//! Running one task action against the collaborators

use crate::error::TaskError;
use eltflow_core::{ObjectRef, SensorPolicy};
use eltflow_dag::TaskAction;
use eltflow_warehouse::{BulkLoader, LoadRequest, ObjectStore, QueryEngine};
use std::sync::Arc;
use tokio::time::{sleep, Instant};

/// The external systems a run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ObjectStore>,
    pub loader: Arc<dyn BulkLoader>,
    pub engine: Arc<dyn QueryEngine>,
}

impl Collaborators {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        loader: Arc<dyn BulkLoader>,
        engine: Arc<dyn QueryEngine>,
    ) -> Self {
        Self {
            store,
            loader,
            engine,
        }
    }

    /// Adapter names, for logs and report metadata
    pub fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "object_store": self.store.name(),
            "loader": self.loader.name(),
            "query_engine": self.engine.name(),
        })
    }
}

/// What a successful attempt produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutput {
    pub rows_loaded: Option<u64>,
    pub job_id: Option<String>,
}

/// Run one attempt of an action
pub async fn run_action(action: &TaskAction, collaborators: &Collaborators) -> Result<TaskOutput, TaskError> {
    match action {
        TaskAction::WaitForObject { object, sensor } => {
            wait_for_object(collaborators.store.as_ref(), object, *sensor).await?;
            Ok(TaskOutput::default())
        }
        TaskAction::BulkLoad {
            object,
            destination,
            options,
            location,
        } => {
            let request = LoadRequest::new(
                object.clone(),
                destination.clone(),
                options.clone(),
                location.clone(),
            );
            let result = collaborators
                .loader
                .load(&request)
                .await
                .map_err(TaskError::Load)?;
            Ok(TaskOutput {
                rows_loaded: Some(result.rows_loaded),
                job_id: result.job_id,
            })
        }
        TaskAction::Query {
            query,
            location,
            use_legacy_sql,
        } => {
            let result = collaborators
                .engine
                .execute_ddl(query, *use_legacy_sql, location)
                .await
                .map_err(TaskError::QueryExecution)?;
            Ok(TaskOutput {
                rows_loaded: None,
                job_id: result.job_id,
            })
        }
        TaskAction::Join => Ok(TaskOutput::default()),
    }
}

/// Poll until the object exists or the timeout elapses
///
/// The object is checked once more at the deadline before giving up.
pub async fn wait_for_object(
    store: &dyn ObjectStore,
    object: &ObjectRef,
    policy: SensorPolicy,
) -> Result<(), TaskError> {
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut pokes = 0u32;

    loop {
        pokes += 1;
        if store.exists(object).await.map_err(TaskError::ObjectStore)? {
            tracing::info!(object = %object, pokes, "object found");
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(TaskError::UpstreamUnavailable {
                object: object.uri(),
                waited: now - started,
            });
        }

        tracing::debug!(object = %object, pokes, "object not found yet");
        sleep(policy.poke_interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eltflow_warehouse::{MockObjectStore, MockWarehouse, WarehouseError};
    use std::time::Duration;

    fn policy() -> SensorPolicy {
        SensorPolicy {
            timeout: Duration::from_secs(300),
            poke_interval: Duration::from_secs(30),
        }
    }

    fn object() -> ObjectRef {
        ObjectRef::new("medical_global_data", "global_health_data.csv")
    }

    #[tokio::test(start_paused = true)]
    async fn sensor_waits_for_object() {
        let store = MockObjectStore::new().with_object_after(&object(), 3);
        let started = Instant::now();

        wait_for_object(&store, &object(), policy()).await.unwrap();

        assert_eq!(store.exists_calls(), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn sensor_times_out() {
        let store = MockObjectStore::new();
        let err = wait_for_object(&store, &object(), policy()).await.unwrap_err();

        assert!(matches!(
            err,
            TaskError::UpstreamUnavailable { waited, .. } if waited == Duration::from_secs(300)
        ));
        // t = 0, 30, ..., 270, then a last check at 300
        assert_eq!(store.exists_calls(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn sensor_store_error_fails_immediately() {
        let store = MockObjectStore::new();
        store
            .fail_object(&object(), WarehouseError::PermissionDenied("bucket".to_string()))
            .await;

        let err = wait_for_object(&store, &object(), policy()).await.unwrap_err();
        assert!(matches!(err, TaskError::ObjectStore(WarehouseError::PermissionDenied(_))));
        assert_eq!(store.exists_calls(), 1);
    }

    #[tokio::test]
    async fn join_does_nothing() {
        let warehouse = Arc::new(MockWarehouse::new());
        let collaborators = Collaborators::new(
            Arc::new(MockObjectStore::new()),
            warehouse.clone(),
            warehouse.clone(),
        );
        let output = run_action(&TaskAction::Join, &collaborators).await.unwrap();
        assert_eq!(output, TaskOutput::default());
        assert!(warehouse.executed().await.is_empty());
        assert_eq!(collaborators.describe()["loader"], "Mock");
    }
}
