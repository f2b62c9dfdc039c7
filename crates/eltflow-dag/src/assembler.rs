//! Graph assembly
//!
//! Fan-out is a pure function of the partition keys and two node factories:
//!
//! ```text
//! check -> load -> create_table_<k> -> create_view_<k> -> join   (per key k)
//! ```
//!
//! Keys are validated before any node is constructed, and no edges are
//! added between partition chains.

use crate::graph::PipelineGraph;
use crate::task::TaskNode;
use eltflow_core::{normalize_keys, PartitionError, PartitionKey};
use eltflow_sql::TemplateError;

/// Error while assembling a graph
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblyError {
    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error("task name '{0}' is used more than once")]
    DuplicateTaskName(String),

    #[error("edge refers to unknown task '{0}'")]
    UnknownTask(String),

    #[error("factory produced task '{found}', expected '{expected}'")]
    UnexpectedTaskName { expected: String, found: String },

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// The nodes shared by every partition chain
#[derive(Debug, Clone)]
pub struct SharedNodes {
    pub check: TaskNode,
    pub load: TaskNode,
    pub join: TaskNode,
}

/// Build the pipeline graph
///
/// `make_table` and `make_view` are called once per key, in key order, and
/// must name their nodes `create_table_<key>` / `create_view_<key>`.
pub fn assemble<S, T, V>(
    dag_id: &str,
    keys: &[S],
    shared: SharedNodes,
    mut make_table: T,
    mut make_view: V,
) -> Result<PipelineGraph, AssemblyError>
where
    S: AsRef<str>,
    T: FnMut(&PartitionKey) -> Result<TaskNode, AssemblyError>,
    V: FnMut(&PartitionKey) -> Result<TaskNode, AssemblyError>,
{
    let keys = normalize_keys(keys)?;

    let SharedNodes { check, load, join } = shared;
    let check_id = check.id.clone();
    let load_id = load.id.clone();
    let join_id = join.id.clone();

    let mut graph = PipelineGraph::new(dag_id);
    graph.add_node(check)?;
    graph.add_node(load)?;
    graph.add_edge(&check_id, &load_id)?;

    let mut view_ids = Vec::with_capacity(keys.len());
    for key in &keys {
        let table = expect_name(make_table(key)?, key.table_task_id())?.for_partition(key);
        let view = expect_name(make_view(key)?, key.view_task_id())?.for_partition(key);
        let table_id = table.id.clone();
        let view_id = view.id.clone();

        graph.add_node(table)?;
        graph.add_node(view)?;
        graph.add_edge(&load_id, &table_id)?;
        graph.add_edge(&table_id, &view_id)?;
        view_ids.push(view_id);
    }

    graph.add_node(join)?;
    for view_id in &view_ids {
        graph.add_edge(view_id, &join_id)?;
    }

    tracing::debug!(
        dag_id,
        partitions = keys.len(),
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "assembled pipeline graph"
    );

    Ok(graph)
}

fn expect_name(node: TaskNode, expected: String) -> Result<TaskNode, AssemblyError> {
    if node.id != expected {
        return Err(AssemblyError::UnexpectedTaskName {
            expected,
            found: node.id,
        });
    }
    Ok(node)
}
