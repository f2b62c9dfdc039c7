//! Warehouse identifier validation
//!
//! Project, dataset and table names end up inside backtick-quoted references
//! in rendered DDL. BigQuery cannot bind identifiers as query parameters, so
//! every identifier is checked against a strict grammar before rendering.

use regex::Regex;
use std::sync::OnceLock;

/// Kind of identifier being validated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    /// GCP project id (letters, digits, hyphens)
    Project,

    /// Dataset name
    Dataset,

    /// Table or view name
    Table,

    /// Source column name; may contain spaces, rendered inside backticks
    Column,

    /// Output column alias; must be a bare identifier
    Alias,
}

impl IdentifierKind {
    /// Human readable label used in error messages
    pub fn label(&self) -> &'static str {
        match self {
            Self::Project => "project id",
            Self::Dataset => "dataset id",
            Self::Table => "table name",
            Self::Column => "column name",
            Self::Alias => "column alias",
        }
    }

    fn pattern(&self) -> &'static Regex {
        static PROJECT: OnceLock<Regex> = OnceLock::new();
        static NAME: OnceLock<Regex> = OnceLock::new();
        static COLUMN: OnceLock<Regex> = OnceLock::new();

        match self {
            Self::Project => PROJECT.get_or_init(|| {
                Regex::new(r"^[A-Za-z][A-Za-z0-9_-]{0,62}$").expect("valid project regex")
            }),
            Self::Dataset | Self::Table | Self::Alias => NAME.get_or_init(|| {
                Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,1023}$").expect("valid name regex")
            }),
            Self::Column => COLUMN.get_or_init(|| {
                Regex::new(r"^[A-Za-z_][A-Za-z0-9_ ]{0,299}$").expect("valid column regex")
            }),
        }
    }
}

/// Identifier validation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {}: '{value}'", kind.label())]
pub struct InvalidIdentifier {
    pub kind: IdentifierKind,
    pub value: String,
}

/// Validate an identifier, returning it unchanged on success
pub fn validate_identifier(kind: IdentifierKind, value: &str) -> Result<&str, InvalidIdentifier> {
    if kind.pattern().is_match(value) && !value.ends_with(' ') {
        Ok(value)
    } else {
        Err(InvalidIdentifier {
            kind,
            value: value.to_string(),
        })
    }
}
