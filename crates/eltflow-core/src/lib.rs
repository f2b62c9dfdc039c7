//! eltflow core
//!
//! Domain model shared by every eltflow crate: configuration, partition keys,
//! warehouse references and the run report. Report field names are part of
//! the public JSON format; add fields, never rename them.

pub mod config;
pub mod identifier;
pub mod partition;
pub mod reference;
pub mod report;
pub mod source;
pub mod state;

pub use config::{
    ColumnMapping, Config, ConfigError, LoadOptions, PartitionSection, PipelineSection, SchemaField,
    SchemaMode, SensorPolicy, SensorSection, SourceFormat, SourceSection, TaskDefaults,
    TemplateSection, ViewSection, WarehouseSection, WriteDisposition,
};
pub use identifier::{validate_identifier, IdentifierKind, InvalidIdentifier};
pub use partition::{normalize_keys, PartitionError, PartitionKey};
pub use reference::{ObjectRef, TableRef};
pub use report::{ReportVersion, RunReport, RunSummary, TaskRecord};
pub use source::{ConfigSource, EnvVariableStore, LiteralSource, MapVariableStore, VariableSource, VariableStore};
pub use state::TaskState;
