//! Configuration sources
//!
//! The same pipeline can be configured from literals (a TOML file or an
//! in-code [`Config`]) or from an external key/value variable store. Both go
//! through [`ConfigSource`] so the graph is assembled by one code path.

use crate::config::{Config, ConfigError};
use std::collections::HashMap;
use std::path::PathBuf;

/// Something that can produce a pipeline configuration
pub trait ConfigSource {
    /// Short name for logs (e.g. "literal", "variables")
    fn name(&self) -> &'static str;

    /// Produce the configuration (not yet validated)
    fn load(&self) -> Result<Config, ConfigError>;

    /// Produce and validate the configuration
    fn load_validated(&self) -> Result<Config, ConfigError> {
        let config = self.load()?;
        config.validate()?;
        tracing::debug!(source = self.name(), dag_id = %config.pipeline.dag_id, "configuration validated");
        Ok(config)
    }
}

/// Configuration embedded as literals
#[derive(Debug, Clone)]
pub enum LiteralSource {
    /// An in-memory config
    Inline(Box<Config>),

    /// TOML text
    Toml(String),

    /// Path to a TOML file
    File(PathBuf),
}

impl LiteralSource {
    pub fn inline(config: Config) -> Self {
        Self::Inline(Box::new(config))
    }
}

impl ConfigSource for LiteralSource {
    fn name(&self) -> &'static str {
        "literal"
    }

    fn load(&self) -> Result<Config, ConfigError> {
        match self {
            Self::Inline(config) => Ok(config.as_ref().clone()),
            Self::Toml(text) => Config::from_toml(text),
            Self::File(path) => Config::from_file(path),
        }
    }
}

/// Key/value variable store
pub trait VariableStore {
    /// Look up a variable; `None` when unset
    fn get(&self, key: &str) -> Option<String>;
}

/// Variables read from the process environment as `<PREFIX><KEY>`
///
/// Keys are upper-cased, so `project_id` with the default prefix reads
/// `ELTFLOW_PROJECT_ID`.
#[derive(Debug, Clone)]
pub struct EnvVariableStore {
    prefix: String,
}

impl EnvVariableStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    fn env_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_uppercase())
    }
}

impl Default for EnvVariableStore {
    fn default() -> Self {
        Self::new("ELTFLOW_")
    }
}

impl VariableStore for EnvVariableStore {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.env_key(key)).ok().filter(|v| !v.is_empty())
    }
}

/// In-memory variable store
#[derive(Debug, Clone, Default)]
pub struct MapVariableStore {
    values: HashMap<String, String>,
}

impl MapVariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl VariableStore for MapVariableStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Configuration whose environment-specific values come from a variable store
///
/// The base config provides everything else (load options, view mapping,
/// templates). Required variables override the base unconditionally and
/// fail with [`ConfigError::MissingVariable`] when unset; optional ones
/// (`bucket`, `object`, `location`, `partition_keys`) override only when set.
pub struct VariableSource<S: VariableStore> {
    base: Config,
    store: S,
}

impl<S: VariableStore> VariableSource<S> {
    pub fn new(base: Config, store: S) -> Self {
        Self { base, store }
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.store
            .get(key)
            .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
    }
}

impl<S: VariableStore> ConfigSource for VariableSource<S> {
    fn name(&self) -> &'static str {
        "variables"
    }

    fn load(&self) -> Result<Config, ConfigError> {
        let mut config = self.base.clone();

        config.warehouse.project_id = self.required("project_id")?;
        config.warehouse.staging_dataset_id = self.required("staging_dataset_id")?;
        config.warehouse.transformed_dataset_id = self.required("transformed_dataset_id")?;
        config.warehouse.reporting_dataset_id = self.required("reporting_dataset_id")?;

        if let Some(bucket) = self.store.get("bucket") {
            config.source.bucket = bucket;
        }
        if let Some(object) = self.store.get("object") {
            config.source.object = object;
        }
        if let Some(location) = self.store.get("location") {
            config.warehouse.location = location;
        }
        if let Some(keys) = self.store.get("partition_keys") {
            // blank entries are kept so validation rejects them
            config.partitions.keys = keys.split(',').map(|k| k.trim().to_string()).collect();
        }

        Ok(config)
    }
}
