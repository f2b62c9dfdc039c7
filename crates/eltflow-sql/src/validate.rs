//! Statement shape checks
//!
//! Every partition statement must be a single `CREATE OR REPLACE TABLE` or
//! `CREATE OR REPLACE VIEW`, so that re-running a task is idempotent. Custom
//! templates are checked here before any task is scheduled.

use crate::query::placeholder_spans;
use crate::template::TemplateError;
use sqlparser::ast::Statement;
use sqlparser::dialect::BigQueryDialect;
use sqlparser::parser::Parser;

/// Kind of object a validated statement creates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Table,
    View,
}

/// Result of a successful shape check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedStatement {
    pub kind: StatementKind,

    /// Object name as written in the statement
    pub target: String,
}

/// Parses rendered SQL with the BigQuery dialect
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlValidator;

impl SqlValidator {
    pub fn new() -> Self {
        Self
    }

    /// Check that `sql` is exactly one idempotent CREATE statement
    pub fn validate(&self, sql: &str) -> Result<ValidatedStatement, TemplateError> {
        let parseable = substitute_placeholders(sql);
        let statements = Parser::parse_sql(&BigQueryDialect {}, &parseable)
            .map_err(|e| TemplateError::InvalidStatement(e.to_string()))?;

        let statement = match statements.as_slice() {
            [single] => single,
            [] => return Err(TemplateError::InvalidStatement("empty statement".to_string())),
            many => {
                return Err(TemplateError::InvalidStatement(format!(
                    "expected one statement, found {}",
                    many.len()
                )))
            }
        };

        match statement {
            Statement::CreateTable(create) if create.or_replace => Ok(ValidatedStatement {
                kind: StatementKind::Table,
                target: create.name.to_string(),
            }),
            Statement::CreateView { or_replace: true, name, .. } => Ok(ValidatedStatement {
                kind: StatementKind::View,
                target: name.to_string(),
            }),
            Statement::CreateTable(_) | Statement::CreateView { .. } => Err(
                TemplateError::InvalidStatement("CREATE must use OR REPLACE".to_string()),
            ),
            other => Err(TemplateError::InvalidStatement(format!(
                "expected CREATE OR REPLACE TABLE or VIEW, found: {}",
                first_words(&other.to_string())
            ))),
        }
    }

    /// Check the statement and that it creates the expected kind of object
    pub fn expect(&self, sql: &str, kind: StatementKind) -> Result<ValidatedStatement, TemplateError> {
        let validated = self.validate(sql)?;
        if validated.kind != kind {
            return Err(TemplateError::InvalidStatement(format!(
                "expected a {:?} statement, found a {:?} statement",
                kind, validated.kind
            )));
        }
        Ok(validated)
    }
}

/// Replace `@name` placeholders with NULL so the parser sees plain SQL
fn substitute_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for span in placeholder_spans(sql) {
        out.push_str(&sql[last..span.start]);
        out.push_str("NULL");
        last = span.end;
    }
    out.push_str(&sql[last..]);
    out
}

fn first_words(sql: &str) -> String {
    sql.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}
