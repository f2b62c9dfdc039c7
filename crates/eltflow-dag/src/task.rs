//! Task nodes
//!
//! A node is a unique name, a typed action payload and a retry policy. Nodes
//! are built once and never mutated after the graph attaches edges.

use eltflow_core::{LoadOptions, ObjectRef, PartitionKey, SensorPolicy, TableRef, TaskDefaults};
use eltflow_sql::BoundQuery;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Task identifier, unique within a graph
pub type TaskId = String;

/// Id of the existence check task
pub const CHECK_TASK_ID: &str = "check_if_file_exists";

/// Id of the bulk load task
pub const LOAD_TASK_ID: &str = "load_csv_to_bigquery";

/// Id of the join task
pub const JOIN_TASK_ID: &str = "success_task";

/// Kind of work a node performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ExistenceCheck,
    BulkLoad,
    Query,
    Join,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExistenceCheck => "existence_check",
            Self::BulkLoad => "bulk_load",
            Self::Query => "query",
            Self::Join => "join",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed action payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskAction {
    /// Poll the object store until the object exists
    WaitForObject { object: ObjectRef, sensor: SensorPolicy },

    /// Load the object into a warehouse table
    BulkLoad {
        object: ObjectRef,
        destination: TableRef,
        options: LoadOptions,
        location: String,
    },

    /// Run a bound DDL statement
    Query {
        query: BoundQuery,
        location: String,
        use_legacy_sql: bool,
    },

    /// No-op completion marker
    Join,
}

impl TaskAction {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::WaitForObject { .. } => TaskKind::ExistenceCheck,
            Self::BulkLoad { .. } => TaskKind::BulkLoad,
            Self::Query { .. } => TaskKind::Query,
            Self::Join => TaskKind::Join,
        }
    }
}

/// Retry policy for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: u32,

    #[serde(with = "duration_secs")]
    pub delay: Duration,
}

impl RetryPolicy {
    pub const NONE: RetryPolicy = RetryPolicy {
        retries: 0,
        delay: Duration::ZERO,
    };

    pub fn from_defaults(defaults: &TaskDefaults) -> Self {
        Self {
            retries: defaults.retries,
            delay: defaults.retry_delay(),
        }
    }

    /// Total attempts allowed
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// A node in the pipeline graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: TaskId,
    pub action: TaskAction,
    pub retry: RetryPolicy,
    pub owner: String,

    /// Normalized partition the node belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
}

impl TaskNode {
    pub fn new(id: impl Into<TaskId>, action: TaskAction, defaults: &TaskDefaults) -> Self {
        Self {
            id: id.into(),
            action,
            retry: RetryPolicy::from_defaults(defaults),
            owner: defaults.owner.clone(),
            partition: None,
        }
    }

    /// Existence check node; the sensor owns its own timeout and never retries
    pub fn existence_check(object: ObjectRef, sensor: SensorPolicy, defaults: &TaskDefaults) -> Self {
        Self {
            retry: RetryPolicy::NONE,
            ..Self::new(CHECK_TASK_ID, TaskAction::WaitForObject { object, sensor }, defaults)
        }
    }

    pub fn bulk_load(
        object: ObjectRef,
        destination: TableRef,
        options: LoadOptions,
        location: impl Into<String>,
        defaults: &TaskDefaults,
    ) -> Self {
        Self::new(
            LOAD_TASK_ID,
            TaskAction::BulkLoad {
                object,
                destination,
                options,
                location: location.into(),
            },
            defaults,
        )
    }

    pub fn query(
        id: impl Into<TaskId>,
        query: BoundQuery,
        location: impl Into<String>,
        use_legacy_sql: bool,
        defaults: &TaskDefaults,
    ) -> Self {
        Self::new(
            id,
            TaskAction::Query {
                query,
                location: location.into(),
                use_legacy_sql,
            },
            defaults,
        )
    }

    pub fn join(defaults: &TaskDefaults) -> Self {
        Self::new(JOIN_TASK_ID, TaskAction::Join, defaults)
    }

    /// Attach the partition this node belongs to
    pub fn for_partition(mut self, key: &PartitionKey) -> Self {
        self.partition = Some(key.normalized().to_string());
        self
    }

    pub fn kind(&self) -> TaskKind {
        self.action.kind()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_never_retries() {
        let defaults = TaskDefaults::default();
        let node = TaskNode::existence_check(
            ObjectRef::new("bucket", "data.csv"),
            SensorPolicy {
                timeout: Duration::from_secs(10),
                poke_interval: Duration::from_secs(1),
            },
            &defaults,
        );

        assert_eq!(node.id, CHECK_TASK_ID);
        assert_eq!(node.kind(), TaskKind::ExistenceCheck);
        assert_eq!(node.retry, RetryPolicy::NONE);
        assert_eq!(node.retry.max_attempts(), 1);
    }

    #[test]
    fn nodes_take_defaults() {
        let defaults = TaskDefaults {
            owner: "data-eng".to_string(),
            retries: 2,
            retry_delay_secs: 5,
        };
        let node = TaskNode::join(&defaults);

        assert_eq!(node.owner, "data-eng");
        assert_eq!(node.retry.retries, 2);
        assert_eq!(node.retry.delay, Duration::from_secs(5));
        assert_eq!(node.retry.max_attempts(), 3);
        assert_eq!(node.kind().to_string(), "join");
    }

    #[test]
    fn partition_is_normalized() {
        let key = PartitionKey::new("United Kingdom").unwrap();
        let node = TaskNode::join(&TaskDefaults::default()).for_partition(&key);
        assert_eq!(node.partition.as_deref(), Some("united_kingdom"));
    }
}
