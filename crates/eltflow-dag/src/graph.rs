//! Pipeline graph construction and traversal
//!
//! Holds nodes in insertion order with forward and reverse edges. The graph
//! is only mutated by the assembler; callers receive it read-only.

use crate::assembler::AssemblyError;
use crate::task::{TaskId, TaskNode};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

/// A directed "must complete before" relation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
    pub from: TaskId,
    pub to: TaskId,
}

/// Task graph with one source and one sink
#[derive(Debug, Clone, Default)]
pub struct PipelineGraph {
    dag_id: String,

    /// Nodes in insertion order
    nodes: Vec<TaskNode>,

    /// Node id -> position in `nodes`
    index: HashMap<TaskId, usize>,

    edges: Vec<Edge>,

    /// node -> nodes it depends on
    parents: HashMap<TaskId, Vec<TaskId>>,

    /// node -> nodes that depend on it
    children: HashMap<TaskId, Vec<TaskId>>,
}

#[derive(Serialize)]
struct GraphDefinition<'a> {
    dag_id: &'a str,
    nodes: &'a [TaskNode],
    edges: &'a [Edge],
}

impl PipelineGraph {
    pub(crate) fn new(dag_id: impl Into<String>) -> Self {
        Self {
            dag_id: dag_id.into(),
            ..Self::default()
        }
    }

    pub(crate) fn add_node(&mut self, node: TaskNode) -> Result<(), AssemblyError> {
        if self.index.contains_key(&node.id) {
            return Err(AssemblyError::DuplicateTaskName(node.id));
        }
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    pub(crate) fn add_edge(&mut self, from: &str, to: &str) -> Result<(), AssemblyError> {
        for id in [from, to] {
            if !self.index.contains_key(id) {
                return Err(AssemblyError::UnknownTask(id.to_string()));
            }
        }

        self.edges.push(Edge {
            from: from.to_string(),
            to: to.to_string(),
        });
        self.parents
            .entry(to.to_string())
            .or_default()
            .push(from.to_string());
        self.children
            .entry(from.to_string())
            .or_default()
            .push(to.to_string());
        Ok(())
    }

    pub fn dag_id(&self) -> &str {
        &self.dag_id
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Immediate parents (dependencies) of a node
    pub fn parents(&self, id: &str) -> Vec<&TaskId> {
        self.parents
            .get(id)
            .map(|ids| ids.iter().collect())
            .unwrap_or_default()
    }

    /// Immediate children (dependents) of a node
    pub fn children(&self, id: &str) -> Vec<&TaskId> {
        self.children
            .get(id)
            .map(|ids| ids.iter().collect())
            .unwrap_or_default()
    }

    pub fn in_degree(&self, id: &str) -> usize {
        self.parents.get(id).map_or(0, Vec::len)
    }

    pub fn out_degree(&self, id: &str) -> usize {
        self.children.get(id).map_or(0, Vec::len)
    }

    /// Nodes with no parents
    pub fn sources(&self) -> Vec<&TaskId> {
        self.nodes
            .iter()
            .filter(|n| self.in_degree(&n.id) == 0)
            .map(|n| &n.id)
            .collect()
    }

    /// Nodes with no children
    pub fn sinks(&self) -> Vec<&TaskId> {
        self.nodes
            .iter()
            .filter(|n| self.out_degree(&n.id) == 0)
            .map(|n| &n.id)
            .collect()
    }

    /// All downstream nodes (transitive closure of children)
    pub fn downstream(&self, id: &str) -> Vec<TaskId> {
        Self::walk(&self.children, id)
    }

    /// All upstream nodes (transitive closure of parents)
    pub fn upstream(&self, id: &str) -> Vec<TaskId> {
        Self::walk(&self.parents, id)
    }

    fn walk(adjacency: &HashMap<TaskId, Vec<TaskId>>, start: &str) -> Vec<TaskId> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<&TaskId> = VecDeque::new();
        let mut result = Vec::new();

        if let Some(next) = adjacency.get(start) {
            queue.extend(next);
        }

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            result.push(current.clone());

            if let Some(next) = adjacency.get(current) {
                queue.extend(next.iter().filter(|id| !visited.contains(id)));
            }
        }

        result
    }

    /// Check if there's a path from source to target
    pub fn has_path(&self, source: &str, target: &str) -> bool {
        self.downstream(source).iter().any(|id| id == target)
    }

    /// Topological order, ties broken by insertion order
    ///
    /// Returns `None` if the graph has a cycle.
    pub fn topological_sort(&self) -> Option<Vec<&TaskId>> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), self.in_degree(&n.id)))
            .collect();

        let mut queue: VecDeque<&TaskId> = self
            .nodes
            .iter()
            .filter(|n| in_degree[n.id.as_str()] == 0)
            .map(|n| &n.id)
            .collect();
        let mut result = Vec::with_capacity(self.nodes.len());

        // Kahn's algorithm
        while let Some(id) = queue.pop_front() {
            result.push(id);
            for child in self.children.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(child.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }

        (result.len() == self.nodes.len()).then_some(result)
    }

    /// Node ids grouped by partition, in partition order
    pub fn partition_chains(&self) -> Vec<(String, Vec<&TaskId>)> {
        let mut chains: Vec<(String, Vec<&TaskId>)> = Vec::new();
        for node in &self.nodes {
            let Some(partition) = &node.partition else {
                continue;
            };
            match chains.iter_mut().find(|(p, _)| p == partition) {
                Some((_, ids)) => ids.push(&node.id),
                None => chains.push((partition.clone(), vec![&node.id])),
            }
        }
        chains
    }

    /// Stable SHA-256 hash of the graph definition
    ///
    /// Two graphs with the same id, nodes (including rendered SQL and bound
    /// values) and edges hash identically.
    pub fn fingerprint(&self) -> String {
        let definition = GraphDefinition {
            dag_id: &self.dag_id,
            nodes: &self.nodes,
            edges: &self.edges,
        };
        // Serializing plain structs and vectors cannot fail
        let bytes = serde_json::to_vec(&definition).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// Graphviz DOT rendering
    pub fn to_dot(&self) -> String {
        let mut dot = String::new();
        let _ = writeln!(dot, "digraph \"{}\" {{", self.dag_id);
        let _ = writeln!(dot, "    rankdir=LR;");
        for node in &self.nodes {
            let _ = writeln!(
                dot,
                "    \"{}\" [label=\"{}\\n({})\"];",
                node.id,
                node.id,
                node.kind()
            );
        }
        for edge in &self.edges {
            let _ = writeln!(dot, "    \"{}\" -> \"{}\";", edge.from, edge.to);
        }
        dot.push_str("}\n");
        dot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eltflow_core::TaskDefaults;

    fn node(id: &str) -> TaskNode {
        let mut node = TaskNode::join(&TaskDefaults::default());
        node.id = id.to_string();
        node
    }

    fn diamond() -> PipelineGraph {
        let mut graph = PipelineGraph::new("diamond");
        for id in ["a", "b", "c", "d"] {
            graph.add_node(node(id)).unwrap();
        }
        graph.add_edge("a", "b").unwrap();
        graph.add_edge("a", "c").unwrap();
        graph.add_edge("b", "d").unwrap();
        graph.add_edge("c", "d").unwrap();
        graph
    }

    #[test]
    fn degrees_and_endpoints() {
        let graph = diamond();
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 4);
        assert_eq!(graph.in_degree("d"), 2);
        assert_eq!(graph.out_degree("a"), 2);
        assert_eq!(graph.sources(), vec!["a"]);
        assert_eq!(graph.sinks(), vec!["d"]);
    }

    #[test]
    fn traversal() {
        let graph = diamond();
        let mut down = graph.downstream("a");
        down.sort();
        assert_eq!(down, vec!["b", "c", "d"]);
        assert_eq!(graph.upstream("b"), vec!["a"]);
        assert!(graph.has_path("a", "d"));
        assert!(!graph.has_path("b", "c"));
    }

    #[test]
    fn topological_order_follows_insertion() {
        let graph = diamond();
        let order = graph.topological_sort().unwrap();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn cycle_is_detected() {
        let mut graph = diamond();
        graph.add_edge("d", "a").unwrap();
        assert!(graph.topological_sort().is_none());
    }

    #[test]
    fn duplicate_node_and_unknown_edge() {
        let mut graph = diamond();
        assert!(matches!(
            graph.add_node(node("a")),
            Err(AssemblyError::DuplicateTaskName(id)) if id == "a"
        ));
        assert!(matches!(
            graph.add_edge("a", "z"),
            Err(AssemblyError::UnknownTask(id)) if id == "z"
        ));
    }

    #[test]
    fn fingerprint_tracks_definition() {
        let first = diamond();
        let second = diamond();
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.fingerprint().len(), 64);

        let mut changed = diamond();
        changed.add_node(node("e")).unwrap();
        assert_ne!(first.fingerprint(), changed.fingerprint());
    }

    #[test]
    fn dot_output() {
        let dot = diamond().to_dot();
        assert!(dot.starts_with("digraph \"diamond\" {"));
        assert!(dot.contains("\"a\" -> \"b\";"));
    }
}
