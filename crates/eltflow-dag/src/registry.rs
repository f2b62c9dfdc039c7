//! Pipeline registry
//!
//! Pipeline ids must be unique. Registering the same definition twice is a
//! no-op; registering a different definition under a taken id is an error.

use crate::graph::PipelineGraph;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("pipeline '{dag_id}' is already registered with a different definition (existing {existing}, new {incoming})")]
    Conflict {
        dag_id: String,
        existing: String,
        incoming: String,
    },
}

/// Registered pipelines by id
#[derive(Debug, Default)]
pub struct PipelineRegistry {
    pipelines: BTreeMap<String, Arc<PipelineGraph>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a graph under its dag id
    pub fn register(&mut self, graph: PipelineGraph) -> Result<Arc<PipelineGraph>, RegistryError> {
        if let Some(existing) = self.pipelines.get(graph.dag_id()) {
            let existing_fp = existing.fingerprint();
            let incoming_fp = graph.fingerprint();
            if existing_fp != incoming_fp {
                return Err(RegistryError::Conflict {
                    dag_id: graph.dag_id().to_string(),
                    existing: existing_fp,
                    incoming: incoming_fp,
                });
            }
            tracing::debug!(dag_id = graph.dag_id(), "pipeline already registered");
            return Ok(Arc::clone(existing));
        }

        let graph = Arc::new(graph);
        self.pipelines
            .insert(graph.dag_id().to_string(), Arc::clone(&graph));
        Ok(graph)
    }

    pub fn get(&self, dag_id: &str) -> Option<Arc<PipelineGraph>> {
        self.pipelines.get(dag_id).cloned()
    }

    /// Registered ids in sorted order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::build_pipeline;
    use eltflow_core::Config;

    #[test]
    fn same_definition_is_idempotent() {
        let mut registry = PipelineRegistry::new();
        let config = Config::example();

        registry.register(build_pipeline(&config).unwrap()).unwrap();
        registry.register(build_pipeline(&config).unwrap()).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["elt_pipeline"]);
    }

    #[test]
    fn conflicting_definition_is_rejected() {
        let mut registry = PipelineRegistry::new();
        let config = Config::example();
        registry.register(build_pipeline(&config).unwrap()).unwrap();

        let mut other = Config::example();
        other.partitions.keys = vec!["Nigeria".to_string()];
        let err = registry.register(build_pipeline(&other).unwrap()).unwrap_err();

        assert!(matches!(err, RegistryError::Conflict { dag_id, .. } if dag_id == "elt_pipeline"));
        assert_eq!(registry.get("elt_pipeline").unwrap().node_count(), 2 * 8 + 3);
    }

    #[test]
    fn distinct_ids_coexist() {
        let mut registry = PipelineRegistry::new();
        registry.register(build_pipeline(&Config::example()).unwrap()).unwrap();

        let mut other = Config::example();
        other.pipeline.dag_id = "elt_pipeline_eu".to_string();
        registry.register(build_pipeline(&other).unwrap()).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.get("missing").is_none());
    }
}
