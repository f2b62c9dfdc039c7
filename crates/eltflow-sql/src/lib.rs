//! SQL rendering and checking
//!
//! This crate handles:
//! - Rendering the partition DDL from MiniJinja templates
//! - Binding values to `@name` placeholders
//! - Building the per-partition table and view statements
//! - Checking statement shape with sqlparser

pub mod builder;
pub mod query;
pub mod template;
pub mod validate;

pub use builder::{PartitionTableBuilder, PartitionViewBuilder, PARTITION_PARAM};
pub use query::{placeholders, BoundQuery, ParameterValue, QueryParameter};
pub use template::{SqlTemplates, TemplateError, TemplateName};
pub use validate::{SqlValidator, StatementKind, ValidatedStatement};
