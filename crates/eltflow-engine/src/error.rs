//! Task and executor errors

use eltflow_warehouse::WarehouseError;
use std::time::Duration;

/// Why a single task attempt failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The sensor gave up waiting for the source object
    #[error("object {object} did not appear within {}s", waited.as_secs())]
    UpstreamUnavailable { object: String, waited: Duration },

    #[error("object store error: {0}")]
    ObjectStore(WarehouseError),

    #[error("load failed: {0}")]
    Load(WarehouseError),

    #[error("query failed: {0}")]
    QueryExecution(WarehouseError),

    /// The task panicked or was aborted
    #[error("task aborted: {0}")]
    Aborted(String),
}

impl TaskError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::UpstreamUnavailable { .. } | Self::Aborted(_) | Self::ObjectStore(WarehouseError::Config(_))
        )
    }
}

/// Errors that prevent a run from starting
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    #[error("graph '{0}' contains a cycle")]
    CyclicGraph(String),

    #[error("unknown task '{0}'")]
    UnknownTask(String),
}
