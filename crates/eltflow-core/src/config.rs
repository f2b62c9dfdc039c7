//! Configuration schema (eltflow.toml)

use crate::identifier::{validate_identifier, IdentifierKind, InvalidIdentifier};
use crate::partition::{normalize_keys, PartitionError, PartitionKey};
use crate::reference::{ObjectRef, TableRef};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pipeline metadata
///
/// Runs are triggered manually or by an external scheduler, so there are no
/// schedule keys; unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSection {
    /// Pipeline identifier, unique within a registry
    pub dag_id: String,

    /// Shown by `validate` and `plan`, recorded in run reports
    pub description: String,

    pub tags: Vec<String>,

    /// Upper bound on concurrently running tasks
    pub max_active_tasks: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            dag_id: "elt_pipeline".to_string(),
            description: "Load a CSV file from GCS to BigQuery and create country-specific tables"
                .to_string(),
            tags: vec!["bigquery".to_string(), "gcs".to_string(), "csv".to_string()],
            max_active_tasks: 16,
        }
    }
}

/// Settings applied to every task node at construction time
///
/// This is passed by reference to each node constructor and never mutated
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskDefaults {
    pub owner: String,

    /// Additional attempts after the first failure
    pub retries: u32,

    pub retry_delay_secs: u64,
}

impl TaskDefaults {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            owner: "eltflow".to_string(),
            retries: 1,
            retry_delay_secs: 300,
        }
    }
}

/// Warehouse project and dataset layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseSection {
    pub project_id: String,

    /// Dataset holding the raw bulk-loaded table
    pub staging_dataset_id: String,

    /// Dataset holding per-partition tables
    pub transformed_dataset_id: String,

    /// Dataset holding per-partition reporting views
    pub reporting_dataset_id: String,

    /// Name of the staging table inside the staging dataset
    pub staging_table: String,

    /// Job execution location (e.g. "US")
    pub location: String,

    pub use_legacy_sql: bool,
}

impl Default for WarehouseSection {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            staging_dataset_id: String::new(),
            transformed_dataset_id: String::new(),
            reporting_dataset_id: String::new(),
            staging_table: "global_data".to_string(),
            location: "US".to_string(),
            use_legacy_sql: false,
        }
    }
}

impl WarehouseSection {
    /// Reference to the staging table
    pub fn staging_table_ref(&self) -> TableRef {
        TableRef::new(&self.project_id, &self.staging_dataset_id, &self.staging_table)
    }
}

/// Location of the source file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    pub bucket: String,
    pub object: String,
}

impl SourceSection {
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(&self.bucket, &self.object)
    }
}

/// Existence check polling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSection {
    /// Maximum wait for the object to appear
    pub timeout_secs: u64,

    /// Interval between existence checks
    pub poke_interval_secs: u64,
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            poke_interval_secs: 30,
        }
    }
}

impl SensorSection {
    pub fn policy(&self) -> SensorPolicy {
        SensorPolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            poke_interval: Duration::from_secs(self.poke_interval_secs),
        }
    }
}

/// Resolved polling policy for an existence check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorPolicy {
    pub timeout: Duration,
    pub poke_interval: Duration,
}

/// Source file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Csv,
    NewlineDelimitedJson,
    Avro,
    Parquet,
}

impl SourceFormat {
    /// BigQuery API name
    pub fn as_bigquery(&self) -> &'static str {
        match self {
            Self::Csv => "CSV",
            Self::NewlineDelimitedJson => "NEWLINE_DELIMITED_JSON",
            Self::Avro => "AVRO",
            Self::Parquet => "PARQUET",
        }
    }
}

/// What a load does when the destination already has rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteDisposition {
    /// Replace existing rows
    Truncate,

    /// Append to existing rows
    Append,

    /// Fail unless the destination is empty
    #[serde(alias = "error")]
    Empty,
}

impl WriteDisposition {
    pub fn as_bigquery(&self) -> &'static str {
        match self {
            Self::Truncate => "WRITE_TRUNCATE",
            Self::Append => "WRITE_APPEND",
            Self::Empty => "WRITE_EMPTY",
        }
    }
}

/// How the destination schema is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    Autodetect,
    Explicit,
}

/// One field of an explicit load schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// Bulk load parsing and fault tolerance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    pub format: SourceFormat,
    pub field_delimiter: String,
    pub skip_leading_rows: u32,
    pub write_disposition: WriteDisposition,
    pub schema_mode: SchemaMode,
    pub allow_jagged_rows: bool,
    pub ignore_unknown_values: bool,
    pub max_bad_records: u32,

    /// Required when `schema_mode = "explicit"`
    pub schema: Vec<SchemaField>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            format: SourceFormat::Csv,
            field_delimiter: ",".to_string(),
            skip_leading_rows: 1,
            write_disposition: WriteDisposition::Truncate,
            schema_mode: SchemaMode::Autodetect,
            allow_jagged_rows: true,
            ignore_unknown_values: true,
            max_bad_records: 0,
            schema: Vec::new(),
        }
    }
}

/// Partitioning of the staging table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionSection {
    /// Column compared against each key
    pub column: String,

    /// Ordered key list
    pub keys: Vec<String>,
}

impl Default for PartitionSection {
    fn default() -> Self {
        Self {
            column: "country".to_string(),
            keys: Vec::new(),
        }
    }
}

/// A renamed column in a reporting view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub source: String,
    pub alias: String,
}

impl ColumnMapping {
    pub fn new(source: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            alias: alias.into(),
        }
    }
}

/// Reporting view projection and filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewSection {
    /// Boolean SQL expression; `None` selects every row
    pub filter: Option<String>,

    pub columns: Vec<ColumnMapping>,
}

impl Default for ViewSection {
    fn default() -> Self {
        Self {
            filter: Some("`Availability of Vaccines Treatment` = FALSE".to_string()),
            columns: vec![
                ColumnMapping::new("Year", "Year"),
                ColumnMapping::new("Disease Name", "disease_name"),
                ColumnMapping::new("Disease Category", "disease_category"),
                ColumnMapping::new("Prevalence Rate", "prevalence_rate"),
                ColumnMapping::new("Incidence Rate", "incidence_rate"),
            ],
        }
    }
}

/// SQL template overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSection {
    /// Directory containing `create_table.sql` and/or `create_view.sql`
    pub dir: Option<PathBuf>,

    /// Inline table template (takes precedence over `dir`)
    pub create_table: Option<String>,

    /// Inline view template (takes precedence over `dir`)
    pub create_view: Option<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineSection,

    #[serde(default)]
    pub defaults: TaskDefaults,

    #[serde(default)]
    pub warehouse: WarehouseSection,

    #[serde(default)]
    pub source: SourceSection,

    #[serde(default)]
    pub sensor: SensorSection,

    #[serde(default)]
    pub load: LoadOptions,

    #[serde(default)]
    pub partitions: PartitionSection,

    #[serde(default)]
    pub view: ViewSection,

    #[serde(default)]
    pub templates: TemplateSection,

    /// Directory of the config file (for resolving relative paths)
    #[serde(skip)]
    pub project_root: PathBuf,
}

impl Config {
    /// The reference health-data pipeline with every field populated
    pub fn example() -> Self {
        Self {
            warehouse: WarehouseSection {
                project_id: "elt-pipeline-gcp-and-airflow".to_string(),
                staging_dataset_id: "staging_dataset".to_string(),
                transformed_dataset_id: "transformed_dataset".to_string(),
                reporting_dataset_id: "reporting_dataset".to_string(),
                ..WarehouseSection::default()
            },
            source: SourceSection {
                bucket: "medical_global_data".to_string(),
                object: "global_health_data.csv".to_string(),
            },
            partitions: PartitionSection {
                column: "country".to_string(),
                keys: ["Nigeria", "USA", "Germany", "India", "Japan", "France", "Canada", "Italy"]
                    .iter()
                    .map(|k| k.to_string())
                    .collect(),
            },
            ..Self::default()
        }
    }

    /// Load config from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let mut config = Self::from_toml(&contents)?;

        // Set project root to parent of config file
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        tracing::debug!(path = %path.display(), dag_id = %config.pipeline.dag_id, "loaded config");

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Serialize to a TOML string
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml = self.to_toml()?;
        std::fs::write(path, toml).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Template directory resolved against the project root
    pub fn template_dir(&self) -> Option<PathBuf> {
        self.templates.dir.as_ref().map(|dir| {
            if dir.is_relative() {
                self.project_root.join(dir)
            } else {
                dir.clone()
            }
        })
    }

    /// Validated, normalized partition keys
    pub fn partition_keys(&self) -> Result<Vec<PartitionKey>, ConfigError> {
        Ok(normalize_keys(&self.partitions.keys)?)
    }

    /// Check every field needed to build the pipeline
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pipeline = &self.pipeline;
        if pipeline.dag_id.is_empty()
            || !pipeline
                .dag_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.dag_id",
                message: format!("'{}' is not a valid pipeline id", pipeline.dag_id),
            });
        }
        if pipeline.max_active_tasks == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.max_active_tasks",
                message: "must be at least 1".to_string(),
            });
        }

        let warehouse = &self.warehouse;
        require("warehouse.project_id", &warehouse.project_id)?;
        require("warehouse.staging_dataset_id", &warehouse.staging_dataset_id)?;
        require("warehouse.transformed_dataset_id", &warehouse.transformed_dataset_id)?;
        require("warehouse.reporting_dataset_id", &warehouse.reporting_dataset_id)?;
        require("warehouse.location", &warehouse.location)?;
        validate_identifier(IdentifierKind::Project, &warehouse.project_id)?;
        validate_identifier(IdentifierKind::Dataset, &warehouse.staging_dataset_id)?;
        validate_identifier(IdentifierKind::Dataset, &warehouse.transformed_dataset_id)?;
        validate_identifier(IdentifierKind::Dataset, &warehouse.reporting_dataset_id)?;
        validate_identifier(IdentifierKind::Table, &warehouse.staging_table)?;

        require("source.bucket", &self.source.bucket)?;
        require("source.object", &self.source.object)?;

        if self.sensor.poke_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sensor.poke_interval_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.sensor.timeout_secs < self.sensor.poke_interval_secs {
            return Err(ConfigError::InvalidValue {
                field: "sensor.timeout_secs",
                message: "must be at least the poke interval".to_string(),
            });
        }

        if self.load.field_delimiter.chars().count() != 1 {
            return Err(ConfigError::InvalidValue {
                field: "load.field_delimiter",
                message: "must be a single character".to_string(),
            });
        }
        if self.load.schema_mode == SchemaMode::Explicit && self.load.schema.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "load.schema",
                message: "explicit schema mode requires at least one field".to_string(),
            });
        }

        validate_identifier(IdentifierKind::Column, &self.partitions.column)?;
        let keys = self.partition_keys()?;
        for key in &keys {
            validate_identifier(IdentifierKind::Table, &key.table_name())?;
        }

        self.validate_view()?;

        Ok(())
    }

    fn validate_view(&self) -> Result<(), ConfigError> {
        if self.view.columns.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "view.columns",
                message: "at least one column mapping is required".to_string(),
            });
        }

        let mut aliases = HashSet::new();
        for mapping in &self.view.columns {
            validate_identifier(IdentifierKind::Column, &mapping.source)?;
            validate_identifier(IdentifierKind::Alias, &mapping.alias)?;
            if !aliases.insert(mapping.alias.to_lowercase()) {
                return Err(ConfigError::InvalidValue {
                    field: "view.columns",
                    message: format!("duplicate alias '{}'", mapping.alias),
                });
            }
        }

        if let Some(filter) = &self.view.filter {
            if filter.trim().is_empty() || filter.contains(';') {
                return Err(ConfigError::InvalidValue {
                    field: "view.filter",
                    message: "must be a single non-empty boolean expression".to_string(),
                });
            }
        }

        Ok(())
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::MissingField(field))
    } else {
        Ok(())
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("missing required setting '{0}'")]
    MissingField(&'static str),

    #[error("missing variable '{0}'")]
    MissingVariable(String),

    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: &'static str, message: String },

    #[error(transparent)]
    InvalidIdentifier(#[from] InvalidIdentifier),

    #[error(transparent)]
    Partition(#[from] PartitionError),
}
