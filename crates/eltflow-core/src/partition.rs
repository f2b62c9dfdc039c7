//! Partition keys and their normalization
//!
//! A partition key is one value (e.g. a country name) used to split the
//! staging table. The raw value is what gets bound into the row filter; the
//! normalized value is what names the derived tasks, tables and views.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A validated partition key
///
/// Serialized as its raw string; deserializing runs the same validation
/// as [`PartitionKey::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartitionKey {
    /// Value as configured (trimmed), used as the bound filter value
    raw: String,

    /// Lower-case naming form
    normalized: String,
}

impl PartitionKey {
    /// Parse and normalize a single key
    ///
    /// Normalization trims the value, lower-cases it and maps spaces and
    /// hyphens to underscores. The result must start with a letter and
    /// contain only `[a-z0-9_]`, so that it is safe inside table names.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, PartitionError> {
        let trimmed = raw.as_ref().trim();

        if trimmed.is_empty() {
            return Err(PartitionError::InvalidKey {
                key: raw.as_ref().to_string(),
                reason: "key is blank".to_string(),
            });
        }

        let normalized: String = trimmed
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                other => other.to_ascii_lowercase(),
            })
            .collect();

        let mut chars = normalized.chars();
        let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_lowercase());
        if !starts_with_letter {
            return Err(PartitionError::InvalidKey {
                key: trimmed.to_string(),
                reason: "key must start with an ASCII letter".to_string(),
            });
        }

        if let Some(bad) = normalized
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_'))
        {
            return Err(PartitionError::InvalidKey {
                key: trimmed.to_string(),
                reason: format!("unsupported character '{}'", bad),
            });
        }

        Ok(Self {
            raw: trimmed.to_string(),
            normalized,
        })
    }

    /// The configured value
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The naming form
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Task id of the partition's table builder
    pub fn table_task_id(&self) -> String {
        format!("create_table_{}", self.normalized)
    }

    /// Task id of the partition's view builder
    pub fn view_task_id(&self) -> String {
        format!("create_view_{}", self.normalized)
    }

    /// Name of the materialized partition table
    pub fn table_name(&self) -> String {
        format!("{}_table", self.normalized)
    }

    /// Name of the reporting view
    pub fn view_name(&self) -> String {
        format!("{}_view", self.normalized)
    }
}

impl TryFrom<String> for PartitionKey {
    type Error = PartitionError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<PartitionKey> for String {
    fn from(key: PartitionKey) -> Self {
        key.raw
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.normalized)
    }
}

/// Errors raised while validating a partition key set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    #[error("partition key set is empty")]
    EmptyPartitionSet,

    #[error("partition keys '{first}' and '{second}' both normalize to '{normalized}'")]
    DuplicateKey {
        first: String,
        second: String,
        normalized: String,
    },

    #[error("invalid partition key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },
}

/// Validate an ordered key list, preserving order
///
/// Fails on an empty list, on any invalid key, and on two keys whose
/// normalized forms collide.
pub fn normalize_keys<S: AsRef<str>>(keys: &[S]) -> Result<Vec<PartitionKey>, PartitionError> {
    if keys.is_empty() {
        return Err(PartitionError::EmptyPartitionSet);
    }

    let mut seen: HashMap<String, String> = HashMap::new();
    let mut result = Vec::with_capacity(keys.len());

    for key in keys {
        let parsed = PartitionKey::new(key)?;

        if let Some(first) = seen.get(parsed.normalized()) {
            return Err(PartitionError::DuplicateKey {
                first: first.clone(),
                second: parsed.raw().to_string(),
                normalized: parsed.normalized().to_string(),
            });
        }

        seen.insert(parsed.normalized().to_string(), parsed.raw().to_string());
        result.push(parsed);
    }

    Ok(result)
}
