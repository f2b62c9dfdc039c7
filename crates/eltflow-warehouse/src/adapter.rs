//! Collaborator traits for the object store, bulk loader and query engine

use eltflow_core::{LoadOptions, ObjectRef, TableRef};
use eltflow_sql::BoundQuery;
use serde::{Deserialize, Serialize};

/// Errors returned by warehouse and object store adapters
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WarehouseError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Load failed: {0}")]
    Load(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// A request to load one object into a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadRequest {
    pub object: ObjectRef,
    pub destination: TableRef,
    pub options: LoadOptions,

    /// Job execution location (e.g. "US")
    pub location: String,
}

impl LoadRequest {
    pub fn new(
        object: ObjectRef,
        destination: TableRef,
        options: LoadOptions,
        location: impl Into<String>,
    ) -> Self {
        Self {
            object,
            destination,
            options,
            location: location.into(),
        }
    }
}

/// Outcome of a bulk load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResult {
    pub rows_loaded: u64,
    pub job_id: Option<String>,
}

/// Outcome of a DDL statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Option<String>,
    pub rows_affected: Option<u64>,
}

/// Checks whether objects exist in an object store
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Adapter name (e.g. "GCS", "Local")
    fn name(&self) -> &'static str;

    async fn exists(&self, object: &ObjectRef) -> Result<bool, WarehouseError>;
}

/// Loads objects from the object store into warehouse tables
#[async_trait::async_trait]
pub trait BulkLoader: Send + Sync {
    fn name(&self) -> &'static str;

    async fn load(&self, request: &LoadRequest) -> Result<LoadResult, WarehouseError>;
}

/// Executes parameter-bound DDL
#[async_trait::async_trait]
pub trait QueryEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Execute one statement, binding its parameters by name
    async fn execute_ddl(
        &self,
        query: &BoundQuery,
        use_legacy_sql: bool,
        location: &str,
    ) -> Result<JobResult, WarehouseError>;
}
