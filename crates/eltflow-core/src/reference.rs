//! References to warehouse tables and object store objects

use crate::identifier::{validate_identifier, IdentifierKind, InvalidIdentifier};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a table (or view) in the warehouse
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Project id
    pub project: String,

    /// Dataset id
    pub dataset: String,

    /// Table name
    pub table: String,
}

impl TableRef {
    /// Create a table reference without validation
    pub fn new(project: impl Into<String>, dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Create a table reference, validating each part
    pub fn checked(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Result<Self, InvalidIdentifier> {
        let table_ref = Self::new(project, dataset, table);
        table_ref.validate()?;
        Ok(table_ref)
    }

    /// Validate every part of the reference
    pub fn validate(&self) -> Result<(), InvalidIdentifier> {
        validate_identifier(IdentifierKind::Project, &self.project)?;
        validate_identifier(IdentifierKind::Dataset, &self.dataset)?;
        validate_identifier(IdentifierKind::Table, &self.table)?;
        Ok(())
    }

    /// Fully qualified name (`project.dataset.table`)
    pub fn fqn(&self) -> String {
        format!("{}.{}.{}", self.project, self.dataset, self.table)
    }

    /// Backtick-quoted form used in Standard SQL
    pub fn quoted(&self) -> String {
        format!("`{}`", self.fqn())
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fqn())
    }
}

/// Identifies an object in a bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub bucket: String,
    pub path: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
        }
    }

    /// `gs://bucket/path` URI
    pub fn uri(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.path.trim_start_matches('/'))
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_ref_forms() {
        let table = TableRef::new("p", "s", "global_data");
        assert_eq!(table.fqn(), "p.s.global_data");
        assert_eq!(table.quoted(), "`p.s.global_data`");
        assert_eq!(table.to_string(), "p.s.global_data");
    }

    #[test]
    fn checked_rejects_bad_parts() {
        assert!(TableRef::checked("p", "s", "t").is_ok());
        assert!(TableRef::checked("p", "s`; drop", "t").is_err());
    }

    #[test]
    fn object_uri() {
        let object = ObjectRef::new("medical_global_data", "global_health_data.csv");
        assert_eq!(object.uri(), "gs://medical_global_data/global_health_data.csv");
        assert_eq!(ObjectRef::new("b", "/nested/file.csv").uri(), "gs://b/nested/file.csv");
    }
}
