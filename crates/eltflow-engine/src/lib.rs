//! eltflow engine - local pipeline execution
//!
//! This crate implements:
//! - The async executor (readiness, bounded concurrency, retries)
//! - Existence-check polling with a timeout
//! - Failure and skip propagation to descendants
//! - Run report generation

pub mod error;
pub mod executor;
pub mod runner;

pub use error::{ExecutorError, TaskError};
pub use executor::{Executor, RunOptions};
pub use runner::{run_action, wait_for_object, Collaborators, TaskOutput};
