//! Object store and warehouse adapters
//!
//! The pipeline consumes three collaborators through traits: an object store
//! (existence checks), a bulk loader and a DDL query engine.
//!
//! ## Features
//!
//! - `bigquery` - Google BigQuery and GCS support via `gcp-bigquery-client`
//!
//! ## Example
//!
//! ```rust,ignore
//! use eltflow_warehouse::{BigQueryWarehouse, QueryEngine};
//!
//! let warehouse = BigQueryWarehouse::with_adc("my-project").await?;
//! let job = warehouse.execute_ddl(&query, false, "US").await?;
//! ```

pub mod adapter;
pub mod bigquery;
pub mod gcs;
pub mod local;
pub mod mock;

pub use adapter::{
    BulkLoader, JobResult, LoadRequest, LoadResult, ObjectStore, QueryEngine, WarehouseError,
};
pub use bigquery::{describe_parameter, BigQueryWarehouse};
pub use gcs::GcsObjectStore;
pub use local::LocalObjectStore;
pub use mock::{ExecutedStatement, MockObjectStore, MockWarehouse};
