//! SQL templates
//!
//! Renders the partition DDL statements with MiniJinja. Templates only ever
//! see validated identifiers and the normalized partition name; the raw
//! partition value reaches the warehouse as a bound `@partition_key`
//! parameter.

use eltflow_core::{InvalidIdentifier, TemplateSection};
use minijinja::{Environment, Error as JinjaError, UndefinedBehavior};
use serde::Serialize;
use std::path::{Path, PathBuf};

const CREATE_TABLE_SQL: &str = "\
CREATE OR REPLACE TABLE {{ destination }} AS
SELECT *
FROM {{ source }}
WHERE {{ partition_column }} = @{{ partition_param }}
";

const CREATE_VIEW_SQL: &str = "\
CREATE OR REPLACE VIEW {{ destination }} AS
SELECT
{%- for column in columns %}
    `{{ column.source }}` AS `{{ column.alias }}`{% if not loop.last %},{% endif %}
{%- endfor %}
FROM {{ source }}
{%- if filter %}
WHERE {{ filter }}
{%- endif %}
";

/// The statements a pipeline renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateName {
    CreateTable,
    CreateView,
}

impl TemplateName {
    /// File name looked up in a template directory
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::CreateTable => "create_table.sql",
            Self::CreateView => "create_view.sql",
        }
    }

    fn builtin(&self) -> &'static str {
        match self {
            Self::CreateTable => CREATE_TABLE_SQL,
            Self::CreateView => CREATE_VIEW_SQL,
        }
    }
}

/// Error while rendering or binding SQL
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to render {template}: {message}")]
    Render { template: String, message: String },

    #[error("failed to read template {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    #[error(transparent)]
    InvalidIdentifier(#[from] InvalidIdentifier),

    #[error("no placeholder @{0} in statement")]
    UnknownParameter(String),

    #[error("placeholder @{0} has no bound value")]
    UnboundPlaceholder(String),

    #[error("invalid statement: {0}")]
    InvalidStatement(String),
}

impl TemplateError {
    fn render(template: TemplateName, error: JinjaError) -> Self {
        Self::Render {
            template: template.file_name().to_string(),
            message: error.to_string(),
        }
    }
}

/// Template set used to render partition statements
#[derive(Debug)]
pub struct SqlTemplates {
    env: Environment<'static>,
}

impl SqlTemplates {
    /// Built-in BigQuery templates
    pub fn builtin() -> Result<Self, TemplateError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        for name in [TemplateName::CreateTable, TemplateName::CreateView] {
            env.add_template(name.file_name(), name.builtin())
                .map_err(|e| TemplateError::render(name, e))?;
        }

        Ok(Self { env })
    }

    /// Built-ins overlaid with the configured directory and inline sources
    ///
    /// Inline sources win over files; files win over built-ins.
    pub fn from_config(section: &TemplateSection, dir: Option<&Path>) -> Result<Self, TemplateError> {
        let mut templates = Self::builtin()?;

        if let Some(dir) = dir {
            templates = templates.load_dir(dir)?;
        }
        if let Some(source) = &section.create_table {
            templates = templates.with_override(TemplateName::CreateTable, source.clone())?;
        }
        if let Some(source) = &section.create_view {
            templates = templates.with_override(TemplateName::CreateView, source.clone())?;
        }

        Ok(templates)
    }

    /// Replace one template
    pub fn with_override(mut self, name: TemplateName, source: String) -> Result<Self, TemplateError> {
        self.env
            .add_template_owned(name.file_name(), source)
            .map_err(|e| TemplateError::render(name, e))?;
        tracing::debug!(template = name.file_name(), "template overridden");
        Ok(self)
    }

    /// Load any of `create_table.sql` / `create_view.sql` present in `dir`
    pub fn load_dir(mut self, dir: &Path) -> Result<Self, TemplateError> {
        for name in [TemplateName::CreateTable, TemplateName::CreateView] {
            let path = dir.join(name.file_name());
            if !path.exists() {
                continue;
            }

            let source = std::fs::read_to_string(&path).map_err(|e| TemplateError::Io {
                path: path.clone(),
                message: e.to_string(),
            })?;
            self = self.with_override(name, source)?;
        }
        Ok(self)
    }

    /// Render a template with a serializable context
    pub fn render<C: Serialize>(&self, name: TemplateName, context: &C) -> Result<String, TemplateError> {
        let template = self
            .env
            .get_template(name.file_name())
            .map_err(|e| TemplateError::render(name, e))?;

        let rendered = template
            .render(context)
            .map_err(|e| TemplateError::render(name, e))?;

        Ok(rendered.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_table_template() {
        let templates = SqlTemplates::builtin().unwrap();
        let sql = templates
            .render(
                TemplateName::CreateTable,
                &json!({
                    "destination": "`p.t.usa_table`",
                    "source": "`p.s.global_data`",
                    "partition_column": "`country`",
                    "partition_param": "partition_key",
                }),
            )
            .unwrap();

        assert_eq!(
            sql,
            "CREATE OR REPLACE TABLE `p.t.usa_table` AS\nSELECT *\nFROM `p.s.global_data`\nWHERE `country` = @partition_key"
        );
    }

    #[test]
    fn builtin_view_template_without_filter() {
        let templates = SqlTemplates::builtin().unwrap();
        let sql = templates
            .render(
                TemplateName::CreateView,
                &json!({
                    "destination": "`p.r.usa_view`",
                    "source": "`p.t.usa_table`",
                    "columns": [{"source": "Year", "alias": "year"}],
                    "filter": null,
                }),
            )
            .unwrap();

        assert!(sql.starts_with("CREATE OR REPLACE VIEW `p.r.usa_view` AS"));
        assert!(sql.contains("`Year` AS `year`"));
        assert!(!sql.contains("WHERE"));
    }

    #[test]
    fn strict_undefined_variables() {
        let templates = SqlTemplates::builtin().unwrap();
        let err = templates
            .render(TemplateName::CreateTable, &json!({ "destination": "`a.b.c`" }))
            .unwrap_err();
        assert!(matches!(err, TemplateError::Render { .. }));
    }

    #[test]
    fn inline_override_wins() {
        let section = TemplateSection {
            dir: None,
            create_table: Some("CREATE OR REPLACE TABLE {{ destination }} AS SELECT 1".to_string()),
            create_view: None,
        };
        let templates = SqlTemplates::from_config(&section, None).unwrap();
        let sql = templates
            .render(TemplateName::CreateTable, &json!({ "destination": "`a.b.c`" }))
            .unwrap();
        assert_eq!(sql, "CREATE OR REPLACE TABLE `a.b.c` AS SELECT 1");
    }

    #[test]
    fn directory_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("create_view.sql"),
            "CREATE OR REPLACE VIEW {{ destination }} AS SELECT * FROM {{ source }}\n",
        )
        .unwrap();

        let templates = SqlTemplates::from_config(&TemplateSection::default(), Some(dir.path())).unwrap();
        let sql = templates
            .render(
                TemplateName::CreateView,
                &json!({ "destination": "`a.r.v`", "source": "`a.t.t`" }),
            )
            .unwrap();
        assert_eq!(sql, "CREATE OR REPLACE VIEW `a.r.v` AS SELECT * FROM `a.t.t`");
    }

    #[test]
    fn broken_override_is_reported() {
        let result = SqlTemplates::builtin()
            .unwrap()
            .with_override(TemplateName::CreateView, "{% if %}".to_string());
        assert!(matches!(result, Err(TemplateError::Render { .. })));
    }
}
