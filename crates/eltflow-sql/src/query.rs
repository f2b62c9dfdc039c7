//! Bound queries
//!
//! Rendering produces SQL text containing `@name` placeholders; binding
//! attaches typed values to those names. The two steps are separate so each
//! can be tested on its own, and so that values are never spliced into SQL.

use crate::template::TemplateError;
use serde::{Deserialize, Serialize};

/// A typed query parameter value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterValue {
    String(String),
    Int64(i64),
    Bool(bool),
}

impl ParameterValue {
    /// BigQuery parameter type name
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "STRING",
            Self::Int64(_) => "INT64",
            Self::Bool(_) => "BOOL",
        }
    }

    /// Value in the string encoding used by the BigQuery API
    pub fn to_api_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Int64(i) => i.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

/// A named parameter bound to a placeholder
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryParameter {
    pub name: String,
    pub value: ParameterValue,
}

/// SQL text together with its bound parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundQuery {
    pub sql: String,
    pub parameters: Vec<QueryParameter>,
}

impl BoundQuery {
    /// Wrap rendered SQL with no bindings yet
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameters: Vec::new(),
        }
    }

    /// Bind a value to the `@name` placeholder
    ///
    /// Fails if the SQL has no such placeholder. Binding the same name twice
    /// replaces the earlier value.
    pub fn bind(mut self, name: &str, value: ParameterValue) -> Result<Self, TemplateError> {
        if !placeholders(&self.sql).iter().any(|p| p == name) {
            return Err(TemplateError::UnknownParameter(name.to_string()));
        }

        match self.parameters.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.value = value,
            None => self.parameters.push(QueryParameter {
                name: name.to_string(),
                value,
            }),
        }

        Ok(self)
    }

    /// Ensure every placeholder in the SQL has a bound value
    pub fn verify(&self) -> Result<(), TemplateError> {
        for name in placeholders(&self.sql) {
            if !self.parameters.iter().any(|p| p.name == name) {
                return Err(TemplateError::UnboundPlaceholder(name));
            }
        }
        Ok(())
    }

    /// Look up a bound value
    pub fn parameter(&self, name: &str) -> Option<&ParameterValue> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }
}

/// Byte span of one placeholder, including the leading `@`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderSpan {
    pub start: usize,
    pub end: usize,
    pub name: String,
}

/// Find `@name` placeholders outside string literals, quoted identifiers
/// and comments. `@@system_variables` are not placeholders.
pub fn placeholder_spans(sql: &str) -> Vec<PlaceholderSpan> {
    #[derive(PartialEq)]
    enum Mode {
        Code,
        Quoted(char),
        LineComment,
        BlockComment,
    }

    let bytes = sql.as_bytes();
    let mut spans = Vec::new();
    let mut mode = Mode::Code;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        let next = bytes.get(i + 1).map(|b| *b as char);

        match mode {
            Mode::Code => match c {
                '\'' | '"' | '`' => mode = Mode::Quoted(c),
                '-' if next == Some('-') => {
                    mode = Mode::LineComment;
                    i += 1;
                }
                '#' => mode = Mode::LineComment,
                '/' if next == Some('*') => {
                    mode = Mode::BlockComment;
                    i += 1;
                }
                '@' if next == Some('@') => {
                    // skip the whole @@name
                    i += 2;
                    while i < bytes.len() && is_ident_char(bytes[i] as char) {
                        i += 1;
                    }
                    continue;
                }
                '@' if next.is_some_and(|n| n.is_ascii_alphabetic() || n == '_') => {
                    let start = i;
                    i += 1;
                    while i < bytes.len() && is_ident_char(bytes[i] as char) {
                        i += 1;
                    }
                    spans.push(PlaceholderSpan {
                        start,
                        end: i,
                        name: sql[start + 1..i].to_string(),
                    });
                    continue;
                }
                _ => {}
            },
            Mode::Quoted(quote) => {
                if c == '\\' {
                    i += 1;
                } else if c == quote {
                    mode = Mode::Code;
                }
            }
            Mode::LineComment => {
                if c == '\n' {
                    mode = Mode::Code;
                }
            }
            Mode::BlockComment => {
                if c == '*' && next == Some('/') {
                    mode = Mode::Code;
                    i += 1;
                }
            }
        }

        i += 1;
    }

    spans
}

/// Distinct placeholder names in order of first appearance
pub fn placeholders(sql: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for span in placeholder_spans(sql) {
        if !names.contains(&span.name) {
            names.push(span.name);
        }
    }
    names
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_placeholders() {
        let sql = "SELECT * FROM t WHERE a = @first AND b = @second_2 OR a = @first";
        assert_eq!(placeholders(sql), vec!["first".to_string(), "second_2".to_string()]);
    }

    #[test]
    fn ignores_quoted_and_commented_at_signs() {
        let sql = "SELECT 'x@y.com', `col@name` -- @nope\nFROM t /* @also_no */ WHERE z = @yes AND @@session.time_zone = 'UTC'";
        assert_eq!(placeholders(sql), vec!["yes".to_string()]);
    }

    #[test]
    fn spans_cover_the_placeholder() {
        let sql = "x = @key";
        let spans = placeholder_spans(sql);
        assert_eq!(spans.len(), 1);
        assert_eq!(&sql[spans[0].start..spans[0].end], "@key");
    }

    #[test]
    fn bind_and_verify() {
        let query = BoundQuery::new("SELECT * FROM t WHERE country = @partition_key");
        assert!(matches!(query.verify(), Err(TemplateError::UnboundPlaceholder(name)) if name == "partition_key"));

        let query = query
            .bind("partition_key", ParameterValue::String("USA".to_string()))
            .unwrap();
        query.verify().unwrap();
        assert_eq!(
            query.parameter("partition_key"),
            Some(&ParameterValue::String("USA".to_string()))
        );
        // the value never appears in the SQL text
        assert!(!query.sql.contains("USA"));
    }

    #[test]
    fn bind_unknown_parameter_fails() {
        let query = BoundQuery::new("SELECT 1");
        assert!(matches!(
            query.bind("missing", ParameterValue::Bool(true)),
            Err(TemplateError::UnknownParameter(_))
        ));
    }

    #[test]
    fn rebinding_replaces_value() {
        let query = BoundQuery::new("SELECT @n")
            .bind("n", ParameterValue::Int64(1))
            .unwrap()
            .bind("n", ParameterValue::Int64(2))
            .unwrap();
        assert_eq!(query.parameters.len(), 1);
        assert_eq!(query.parameter("n"), Some(&ParameterValue::Int64(2)));
        assert_eq!(ParameterValue::Int64(2).type_name(), "INT64");
        assert_eq!(ParameterValue::Int64(2).to_api_string(), "2");
    }
}
