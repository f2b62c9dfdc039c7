//! Pipeline task graph
//!
//! This crate handles:
//! - Task nodes and their typed action payloads
//! - The dependency graph (traversal, topological order, fingerprint)
//! - Fan-out assembly from partition keys
//! - Building the pipeline from configuration
//! - Rejecting conflicting pipeline ids

pub mod assembler;
pub mod graph;
pub mod pipeline;
pub mod registry;
pub mod task;

pub use assembler::{assemble, AssemblyError, SharedNodes};
pub use graph::{Edge, PipelineGraph};
pub use pipeline::{build_from_source, build_pipeline, PipelineError};
pub use registry::{PipelineRegistry, RegistryError};
pub use task::{
    RetryPolicy, TaskAction, TaskId, TaskKind, TaskNode, CHECK_TASK_ID, JOIN_TASK_ID, LOAD_TASK_ID,
};
