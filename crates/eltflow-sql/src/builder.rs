//! Per-partition statement builders
//!
//! Each builder is a pure function of its configuration and a partition key:
//! identical inputs always render identical statements.

use crate::query::{BoundQuery, ParameterValue};
use crate::template::{SqlTemplates, TemplateError, TemplateName};
use eltflow_core::{
    validate_identifier, ColumnMapping, Config, IdentifierKind, PartitionKey, TableRef,
};
use serde::Serialize;
use std::sync::Arc;

/// Name of the placeholder carrying the partition value
pub const PARTITION_PARAM: &str = "partition_key";

#[derive(Serialize)]
struct TableContext<'a> {
    project_id: &'a str,
    dataset: &'a str,
    partition: &'a str,
    destination: String,
    source: String,
    partition_column: String,
    partition_param: &'static str,
}

#[derive(Serialize)]
struct ViewContext<'a> {
    project_id: &'a str,
    dataset: &'a str,
    partition: &'a str,
    destination: String,
    source: String,
    columns: &'a [ColumnMapping],
    filter: Option<&'a str>,
}

/// Materializes one partition of the staging table into its own table
#[derive(Debug, Clone)]
pub struct PartitionTableBuilder {
    templates: Arc<SqlTemplates>,
    project_id: String,
    staging_table: TableRef,
    destination_dataset_id: String,
    partition_column: String,
}

impl PartitionTableBuilder {
    pub fn new(
        templates: Arc<SqlTemplates>,
        project_id: impl Into<String>,
        staging_table: TableRef,
        destination_dataset_id: impl Into<String>,
        partition_column: impl Into<String>,
    ) -> Self {
        Self {
            templates,
            project_id: project_id.into(),
            staging_table,
            destination_dataset_id: destination_dataset_id.into(),
            partition_column: partition_column.into(),
        }
    }

    pub fn from_config(config: &Config, templates: Arc<SqlTemplates>) -> Self {
        Self::new(
            templates,
            &config.warehouse.project_id,
            config.warehouse.staging_table_ref(),
            &config.warehouse.transformed_dataset_id,
            &config.partitions.column,
        )
    }

    /// Table the statement creates
    pub fn destination(&self, key: &PartitionKey) -> TableRef {
        TableRef::new(&self.project_id, &self.destination_dataset_id, key.table_name())
    }

    /// Render the statement text (placeholders unbound)
    pub fn render(&self, key: &PartitionKey) -> Result<String, TemplateError> {
        let destination = self.destination(key);
        destination.validate()?;
        self.staging_table.validate()?;
        validate_identifier(IdentifierKind::Column, &self.partition_column)?;

        let context = TableContext {
            project_id: &self.project_id,
            dataset: &self.destination_dataset_id,
            partition: key.normalized(),
            destination: destination.quoted(),
            source: self.staging_table.quoted(),
            partition_column: format!("`{}`", self.partition_column),
            partition_param: PARTITION_PARAM,
        };

        self.templates.render(TemplateName::CreateTable, &context)
    }

    /// Render and bind the partition value
    pub fn build(&self, key: &PartitionKey) -> Result<BoundQuery, TemplateError> {
        let query = BoundQuery::new(self.render(key)?)
            .bind(PARTITION_PARAM, ParameterValue::String(key.raw().to_string()))?;
        query.verify()?;
        Ok(query)
    }
}

/// Creates the reporting view over one partition table
#[derive(Debug, Clone)]
pub struct PartitionViewBuilder {
    templates: Arc<SqlTemplates>,
    project_id: String,
    source_dataset_id: String,
    reporting_dataset_id: String,
    columns: Vec<ColumnMapping>,
    filter: Option<String>,
}

impl PartitionViewBuilder {
    pub fn new(
        templates: Arc<SqlTemplates>,
        project_id: impl Into<String>,
        source_dataset_id: impl Into<String>,
        reporting_dataset_id: impl Into<String>,
        columns: Vec<ColumnMapping>,
        filter: Option<String>,
    ) -> Self {
        Self {
            templates,
            project_id: project_id.into(),
            source_dataset_id: source_dataset_id.into(),
            reporting_dataset_id: reporting_dataset_id.into(),
            columns,
            filter,
        }
    }

    pub fn from_config(config: &Config, templates: Arc<SqlTemplates>) -> Self {
        Self::new(
            templates,
            &config.warehouse.project_id,
            &config.warehouse.transformed_dataset_id,
            &config.warehouse.reporting_dataset_id,
            config.view.columns.clone(),
            config.view.filter.clone(),
        )
    }

    /// Partition table the view reads from
    pub fn source(&self, key: &PartitionKey) -> TableRef {
        TableRef::new(&self.project_id, &self.source_dataset_id, key.table_name())
    }

    /// View the statement creates
    pub fn destination(&self, key: &PartitionKey) -> TableRef {
        TableRef::new(&self.project_id, &self.reporting_dataset_id, key.view_name())
    }

    pub fn render(&self, key: &PartitionKey) -> Result<String, TemplateError> {
        let source = self.source(key);
        let destination = self.destination(key);
        source.validate()?;
        destination.validate()?;
        for mapping in &self.columns {
            validate_identifier(IdentifierKind::Column, &mapping.source)?;
            validate_identifier(IdentifierKind::Alias, &mapping.alias)?;
        }

        let context = ViewContext {
            project_id: &self.project_id,
            dataset: &self.reporting_dataset_id,
            partition: key.normalized(),
            destination: destination.quoted(),
            source: source.quoted(),
            columns: &self.columns,
            filter: self.filter.as_deref(),
        };

        self.templates.render(TemplateName::CreateView, &context)
    }

    /// Render and verify; the view statement binds no values of its own
    pub fn build(&self, key: &PartitionKey) -> Result<BoundQuery, TemplateError> {
        let query = BoundQuery::new(self.render(key)?);
        query.verify()?;
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn templates() -> Arc<SqlTemplates> {
        Arc::new(SqlTemplates::builtin().unwrap())
    }

    fn table_builder() -> PartitionTableBuilder {
        PartitionTableBuilder::new(templates(), "p", TableRef::new("p", "s", "global_data"), "t", "country")
    }

    #[test]
    fn table_statement_is_deterministic() {
        let builder = table_builder();
        let key = PartitionKey::new("usa").unwrap();

        let first = builder.build(&key).unwrap();
        let second = builder.build(&key).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.sql,
            "CREATE OR REPLACE TABLE `p.t.usa_table` AS\nSELECT *\nFROM `p.s.global_data`\nWHERE `country` = @partition_key"
        );
        assert_eq!(
            first.parameter(PARTITION_PARAM),
            Some(&ParameterValue::String("usa".to_string()))
        );
    }

    #[test]
    fn raw_value_is_bound_not_interpolated() {
        let builder = table_builder();
        let key = PartitionKey::new("United Kingdom").unwrap();
        let query = builder.build(&key).unwrap();

        assert!(query.sql.contains("`p.t.united_kingdom_table`"));
        assert!(!query.sql.contains("United Kingdom"));
        assert_eq!(
            query.parameter(PARTITION_PARAM),
            Some(&ParameterValue::String("United Kingdom".to_string()))
        );
    }

    #[test]
    fn invalid_staging_reference_is_rejected() {
        let builder = PartitionTableBuilder::new(
            templates(),
            "p",
            TableRef::new("p", "s`; DROP", "global_data"),
            "t",
            "country",
        );
        let key = PartitionKey::new("usa").unwrap();
        assert!(matches!(builder.build(&key), Err(TemplateError::InvalidIdentifier(_))));
    }

    #[test]
    fn view_statement_projects_and_filters() {
        let builder = PartitionViewBuilder::new(
            templates(),
            "p",
            "t",
            "r",
            vec![
                ColumnMapping::new("Year", "Year"),
                ColumnMapping::new("Disease Name", "disease_name"),
            ],
            Some("`Availability of Vaccines Treatment` = FALSE".to_string()),
        );
        let key = PartitionKey::new("Nigeria").unwrap();
        let query = builder.build(&key).unwrap();

        assert_eq!(
            query.sql,
            "CREATE OR REPLACE VIEW `p.r.nigeria_view` AS\nSELECT\n    `Year` AS `Year`,\n    `Disease Name` AS `disease_name`\nFROM `p.t.nigeria_table`\nWHERE `Availability of Vaccines Treatment` = FALSE"
        );
        assert!(query.parameters.is_empty());
    }

    #[test]
    fn view_filter_with_placeholder_must_be_bound() {
        let builder = PartitionViewBuilder::new(
            templates(),
            "p",
            "t",
            "r",
            vec![ColumnMapping::new("Year", "Year")],
            Some("Year > @min_year".to_string()),
        );
        let key = PartitionKey::new("usa").unwrap();
        assert!(matches!(builder.build(&key), Err(TemplateError::UnboundPlaceholder(_))));
    }
}
