//! Pipeline construction from configuration

use crate::assembler::{assemble, AssemblyError, SharedNodes};
use crate::graph::PipelineGraph;
use crate::task::TaskNode;
use eltflow_core::{Config, ConfigError, ConfigSource};
use eltflow_sql::{
    PartitionTableBuilder, PartitionViewBuilder, SqlTemplates, SqlValidator, StatementKind,
    TemplateError,
};
use std::sync::Arc;

/// Error while building a pipeline from configuration
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("assembly error: {0}")]
    Assembly(#[from] AssemblyError),
}

/// Build the pipeline graph for a configuration
///
/// Every rendered statement is checked to be a single idempotent CREATE
/// before the graph is returned.
pub fn build_pipeline(config: &Config) -> Result<PipelineGraph, PipelineError> {
    config.validate()?;

    let template_dir = config.template_dir();
    let templates = Arc::new(SqlTemplates::from_config(
        &config.templates,
        template_dir.as_deref(),
    )?);
    let tables = PartitionTableBuilder::from_config(config, Arc::clone(&templates));
    let views = PartitionViewBuilder::from_config(config, templates);
    let validator = SqlValidator::new();

    let defaults = &config.defaults;
    let warehouse = &config.warehouse;

    let shared = SharedNodes {
        check: TaskNode::existence_check(config.source.object_ref(), config.sensor.policy(), defaults),
        load: TaskNode::bulk_load(
            config.source.object_ref(),
            warehouse.staging_table_ref(),
            config.load.clone(),
            &warehouse.location,
            defaults,
        ),
        join: TaskNode::join(defaults),
    };

    let graph = assemble(
        &config.pipeline.dag_id,
        config.partitions.keys.as_slice(),
        shared,
        |key| {
            let query = tables.build(key)?;
            validator.expect(&query.sql, StatementKind::Table)?;
            Ok(TaskNode::query(
                key.table_task_id(),
                query,
                &warehouse.location,
                warehouse.use_legacy_sql,
                defaults,
            ))
        },
        |key| {
            let query = views.build(key)?;
            validator.expect(&query.sql, StatementKind::View)?;
            Ok(TaskNode::query(
                key.view_task_id(),
                query,
                &warehouse.location,
                warehouse.use_legacy_sql,
                defaults,
            ))
        },
    )?;

    tracing::info!(
        dag_id = graph.dag_id(),
        nodes = graph.node_count(),
        fingerprint = %graph.fingerprint(),
        "pipeline built"
    );

    Ok(graph)
}

/// Load configuration from a source and build its pipeline
pub fn build_from_source(source: &dyn ConfigSource) -> Result<(Config, PipelineGraph), PipelineError> {
    let config = source.load_validated()?;
    let graph = build_pipeline(&config)?;
    Ok((config, graph))
}
