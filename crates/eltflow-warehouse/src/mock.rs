//! In-memory adapters for tests and dry runs
//!
//! Nothing here connects to a real service. Each adapter records what it was
//! asked to do and can be told to fail for particular objects or tables:
//!
//! ```rust,ignore
//! let store = MockObjectStore::new().with_object_after(&object, 3);
//! let warehouse = MockWarehouse::new().with_latency(10);
//! warehouse.fail_table("p.t.usa_table", WarehouseError::Query("boom".into())).await;
//! ```

use crate::adapter::{
    BulkLoader, JobResult, LoadRequest, LoadResult, ObjectStore, QueryEngine, WarehouseError,
};
use eltflow_core::ObjectRef;
use eltflow_sql::{BoundQuery, SqlValidator};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// An injected failure, optionally limited to the first `remaining` calls
#[derive(Debug, Clone)]
struct Failure {
    error: WarehouseError,
    remaining: Option<u32>,
}

impl Failure {
    /// Returns the error if this call should fail
    fn trigger(&mut self) -> Option<WarehouseError> {
        match &mut self.remaining {
            None => Some(self.error.clone()),
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(self.error.clone())
            }
        }
    }
}

async fn trigger(failures: &RwLock<HashMap<String, Failure>>, key: &str) -> Result<(), WarehouseError> {
    match failures.write().await.get_mut(key).and_then(Failure::trigger) {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

async fn simulate_latency(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

/// Mock object store
///
/// Objects are keyed by URI. An object can be made to appear only after a
/// number of `exists` calls, to exercise sensor polling.
#[derive(Debug, Clone, Default)]
pub struct MockObjectStore {
    /// URI -> calls left before the object is visible
    objects: Arc<RwLock<HashMap<String, u32>>>,
    errors: Arc<RwLock<HashMap<String, Failure>>>,
    calls: Arc<AtomicU64>,
    latency: Duration,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store containing the given objects
    pub fn with_objects<'a>(objects: impl IntoIterator<Item = &'a ObjectRef>) -> Self {
        let objects = objects.into_iter().map(|o| (o.uri(), 0)).collect();
        Self {
            objects: Arc::new(RwLock::new(objects)),
            ..Self::default()
        }
    }

    /// Object becomes visible on the `polls + 1`-th `exists` call
    pub fn with_object_after(self, object: &ObjectRef, polls: u32) -> Self {
        if let Ok(mut objects) = self.objects.try_write() {
            objects.insert(object.uri(), polls);
        }
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn add_object(&self, object: &ObjectRef) {
        self.objects.write().await.insert(object.uri(), 0);
    }

    /// Fail every `exists` call for this object
    pub async fn fail_object(&self, object: &ObjectRef, error: WarehouseError) {
        self.errors.write().await.insert(
            object.uri(),
            Failure {
                error,
                remaining: None,
            },
        );
    }

    /// Number of `exists` calls made so far
    pub fn exists_calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ObjectStore for MockObjectStore {
    fn name(&self) -> &'static str {
        "Mock"
    }

    async fn exists(&self, object: &ObjectRef) -> Result<bool, WarehouseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        simulate_latency(self.latency).await;

        let uri = object.uri();
        trigger(&self.errors, &uri).await?;

        let mut objects = self.objects.write().await;
        match objects.get_mut(&uri) {
            Some(0) => Ok(true),
            Some(remaining) => {
                *remaining -= 1;
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

/// A statement the mock warehouse executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStatement {
    /// Table or view the statement creates
    pub target: String,
    pub query: BoundQuery,
    pub location: String,
    pub use_legacy_sql: bool,
}

/// Mock warehouse implementing both [`BulkLoader`] and [`QueryEngine`]
///
/// Statements are parsed to find their target so failures can be injected
/// per table (`project.dataset.table`).
#[derive(Debug, Clone, Default)]
pub struct MockWarehouse {
    statements: Arc<RwLock<Vec<ExecutedStatement>>>,
    loads: Arc<RwLock<Vec<LoadRequest>>>,
    failures: Arc<RwLock<HashMap<String, Failure>>>,
    rows_loaded: u64,
    jobs: Arc<AtomicU64>,
    latency: Duration,
}

impl MockWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row count reported by every load
    pub fn with_rows_loaded(mut self, rows: u64) -> Self {
        self.rows_loaded = rows;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail every load into or statement creating `table`
    pub async fn fail_table(&self, table: impl Into<String>, error: WarehouseError) {
        self.failures.write().await.insert(
            table.into(),
            Failure {
                error,
                remaining: None,
            },
        );
    }

    /// Fail only the first `times` calls for `table`
    pub async fn fail_table_times(&self, table: impl Into<String>, times: u32, error: WarehouseError) {
        self.failures.write().await.insert(
            table.into(),
            Failure {
                error,
                remaining: Some(times),
            },
        );
    }

    /// Successfully executed statements, in execution order
    pub async fn executed(&self) -> Vec<ExecutedStatement> {
        self.statements.read().await.clone()
    }

    /// Targets of successfully executed statements
    pub async fn executed_targets(&self) -> Vec<String> {
        self.statements
            .read()
            .await
            .iter()
            .map(|s| s.target.clone())
            .collect()
    }

    /// Successful loads, in order
    pub async fn loads(&self) -> Vec<LoadRequest> {
        self.loads.read().await.clone()
    }

    fn next_job_id(&self) -> String {
        format!("mock_job_{}", self.jobs.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait::async_trait]
impl BulkLoader for MockWarehouse {
    fn name(&self) -> &'static str {
        "Mock"
    }

    async fn load(&self, request: &LoadRequest) -> Result<LoadResult, WarehouseError> {
        simulate_latency(self.latency).await;
        trigger(&self.failures, &request.destination.fqn()).await?;

        self.loads.write().await.push(request.clone());
        Ok(LoadResult {
            rows_loaded: self.rows_loaded,
            job_id: Some(self.next_job_id()),
        })
    }
}

#[async_trait::async_trait]
impl QueryEngine for MockWarehouse {
    fn name(&self) -> &'static str {
        "Mock"
    }

    async fn execute_ddl(
        &self,
        query: &BoundQuery,
        use_legacy_sql: bool,
        location: &str,
    ) -> Result<JobResult, WarehouseError> {
        simulate_latency(self.latency).await;

        query
            .verify()
            .map_err(|e| WarehouseError::Query(e.to_string()))?;
        let validated = SqlValidator::new()
            .validate(&query.sql)
            .map_err(|e| WarehouseError::Query(e.to_string()))?;
        let target = validated.target.replace('`', "");

        trigger(&self.failures, &target).await?;

        self.statements.write().await.push(ExecutedStatement {
            target,
            query: query.clone(),
            location: location.to_string(),
            use_legacy_sql,
        });

        Ok(JobResult {
            job_id: Some(self.next_job_id()),
            rows_affected: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eltflow_core::{LoadOptions, TableRef};
    use eltflow_sql::ParameterValue;

    fn object() -> ObjectRef {
        ObjectRef::new("bucket", "data.csv")
    }

    fn ddl(table: &str) -> BoundQuery {
        BoundQuery::new(format!(
            "CREATE OR REPLACE TABLE `p.t.{table}` AS SELECT * FROM `p.s.global_data` WHERE `country` = @partition_key"
        ))
        .bind("partition_key", ParameterValue::String("USA".to_string()))
        .unwrap()
    }

    #[tokio::test]
    async fn object_store_lookup() {
        let store = MockObjectStore::with_objects([&object()]);
        assert!(store.exists(&object()).await.unwrap());
        assert!(!store.exists(&ObjectRef::new("bucket", "other.csv")).await.unwrap());
        assert_eq!(store.exists_calls(), 2);
    }

    #[tokio::test]
    async fn object_appears_after_polls() {
        let store = MockObjectStore::new().with_object_after(&object(), 2);
        assert!(!store.exists(&object()).await.unwrap());
        assert!(!store.exists(&object()).await.unwrap());
        assert!(store.exists(&object()).await.unwrap());
    }

    #[tokio::test]
    async fn object_store_failure() {
        let store = MockObjectStore::with_objects([&object()]);
        store
            .fail_object(&object(), WarehouseError::Network("down".to_string()))
            .await;
        assert!(matches!(store.exists(&object()).await, Err(WarehouseError::Network(_))));
    }

    #[tokio::test]
    async fn records_statements() {
        let warehouse = MockWarehouse::new();
        let result = warehouse.execute_ddl(&ddl("usa_table"), false, "US").await.unwrap();

        assert_eq!(result.job_id.as_deref(), Some("mock_job_1"));
        let executed = warehouse.executed().await;
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].target, "p.t.usa_table");
        assert_eq!(executed[0].location, "US");
    }

    #[tokio::test]
    async fn rejects_unbound_statement() {
        let warehouse = MockWarehouse::new();
        let query = BoundQuery::new("CREATE OR REPLACE TABLE t AS SELECT * FROM s WHERE c = @partition_key");
        assert!(matches!(
            warehouse.execute_ddl(&query, false, "US").await,
            Err(WarehouseError::Query(_))
        ));
    }

    #[tokio::test]
    async fn injected_table_failure() {
        let warehouse = MockWarehouse::new();
        warehouse
            .fail_table("p.t.usa_table", WarehouseError::Query("boom".to_string()))
            .await;

        assert!(warehouse.execute_ddl(&ddl("usa_table"), false, "US").await.is_err());
        assert!(warehouse.execute_ddl(&ddl("nigeria_table"), false, "US").await.is_ok());
        assert_eq!(warehouse.executed_targets().await, vec!["p.t.nigeria_table"]);
    }

    #[tokio::test]
    async fn transient_failure_clears() {
        let warehouse = MockWarehouse::new().with_rows_loaded(42);
        let request = LoadRequest::new(
            object(),
            TableRef::new("p", "s", "global_data"),
            LoadOptions::default(),
            "US",
        );
        warehouse
            .fail_table_times("p.s.global_data", 1, WarehouseError::Load("flaky".to_string()))
            .await;

        assert!(warehouse.load(&request).await.is_err());
        let result = warehouse.load(&request).await.unwrap();
        assert_eq!(result.rows_loaded, 42);
        assert_eq!(warehouse.loads().await.len(), 1);
    }
}
