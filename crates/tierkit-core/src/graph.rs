//! Resource dependency graph.
//!
//! Nodes keep their declaration order. Construction order comes from Kahn's
//! algorithm with a min-heap keyed on declaration index, so ready nodes are
//! always taken in the order they were declared and the same input yields the
//! same order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::resource::ResourceNode;
use crate::{Error, Result};

/// Registry of resource nodes and their dependency edges.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: Vec<ResourceNode>,
    index: HashMap<String, usize>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ResourceNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.iter()
    }

    /// Register a node. Every dependency must already be registered.
    pub fn insert(&mut self, node: ResourceNode) -> Result<&ResourceNode> {
        if self.index.contains_key(&node.name) {
            return Err(Error::configuration(
                &node.name,
                "a node with this logical name is already registered",
            ));
        }
        if let Some(unknown) = node.depends_on.iter().find(|d| !self.index.contains_key(*d)) {
            return Err(Error::configuration(
                &node.name,
                format!("depends on unknown node '{unknown}'"),
            ));
        }

        let idx = self.nodes.len();
        self.index.insert(node.name.clone(), idx);
        self.nodes.push(node);
        Ok(&self.nodes[idx])
    }

    /// Add an edge after registration: `dependent` must be constructed after `dependency`.
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) -> Result<()> {
        self.check_dependency(dependent, dependency)?;
        if let Some(&idx) = self.index.get(dependent) {
            let node = &mut self.nodes[idx];
            if !node.depends_on.iter().any(|d| d == dependency) {
                node.depends_on.push(dependency.to_string());
            }
        }
        Ok(())
    }

    /// Validate an edge without adding it.
    ///
    /// Rejects the edge if `dependency` already (transitively) depends on
    /// `dependent`, naming the edge and the cycle it would close.
    pub fn check_dependency(&self, dependent: &str, dependency: &str) -> Result<()> {
        if !self.index.contains_key(dependent) {
            return Err(Error::configuration(dependent, "unknown node"));
        }
        if !self.index.contains_key(dependency) {
            return Err(Error::configuration(
                dependent,
                format!("depends on unknown node '{dependency}'"),
            ));
        }

        if dependent == dependency {
            return Err(Error::CyclicDependency {
                edge: (dependent.to_string(), dependency.to_string()),
                cycle: vec![dependent.to_string(), dependent.to_string()],
            });
        }

        if let Some(path) = self.path(dependency, dependent) {
            let mut cycle = vec![dependent.to_string()];
            cycle.extend(path);
            return Err(Error::CyclicDependency {
                edge: (dependent.to_string(), dependency.to_string()),
                cycle,
            });
        }
        Ok(())
    }

    /// Dependency path from `from` to `to`, inclusive, if one exists.
    fn path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut trail = Vec::new();
        if self.dfs_path(from, to, &mut visited, &mut trail) {
            Some(trail)
        } else {
            None
        }
    }

    fn dfs_path<'a>(
        &'a self,
        node: &'a str,
        target: &str,
        visited: &mut HashSet<&'a str>,
        trail: &mut Vec<String>,
    ) -> bool {
        trail.push(node.to_string());
        if node == target {
            return true;
        }
        if visited.insert(node) {
            if let Some(n) = self.get(node) {
                for dep in &n.depends_on {
                    if self.dfs_path(dep, target, visited, trail) {
                        return true;
                    }
                }
            }
        }
        trail.pop();
        false
    }

    /// Logical names in construction order.
    pub fn topological_order(&self) -> Result<Vec<&str>> {
        let n = self.nodes.len();

        // dependents[i] = nodes that must wait for node i
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut in_degree: Vec<usize> = vec![0; n];
        for (idx, node) in self.nodes.iter().enumerate() {
            for dep in &node.depends_on {
                let &dep_idx = self.index.get(dep).ok_or_else(|| {
                    Error::configuration(&node.name, format!("depends on unknown node '{dep}'"))
                })?;
                dependents[dep_idx].push(idx);
                in_degree[idx] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(self.nodes[idx].name.as_str());
            for &next in &dependents[idx] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != n {
            // Edges are checked on insertion, so this only guards graphs
            // assembled by hand from pre-built nodes.
            let stuck: Vec<String> = (0..n)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.nodes[i].name.clone())
                .collect();
            let first = self.nodes[self.index[&stuck[0]]].depends_on[0].clone();
            return Err(Error::CyclicDependency {
                edge: (stuck[0].clone(), first),
                cycle: stuck,
            });
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{PropertyValue, defer};
    use crate::resource::{Properties, ResourceKind};

    fn node(name: &str, deps: &[&str]) -> ResourceNode {
        let config = Properties::new()
            .set("SourcePath", "dist")
            .set("DestinationBucketName", "bucket")
            .build();
        ResourceNode::describe(
            name,
            ResourceKind::BucketDeployment,
            config,
            deps.iter().map(|d| d.to_string()),
        )
        .unwrap()
    }

    fn graph(spec: &[(&str, &[&str])]) -> ResourceGraph {
        let mut g = ResourceGraph::new();
        for (name, deps) in spec {
            g.insert(node(name, deps)).unwrap();
        }
        g
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut g = ResourceGraph::new();
        let err = g.insert(node("a", &["missing"])).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(g.is_empty());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut g = graph(&[("a", &[])]);
        assert!(g.insert(node("a", &[])).is_err());
    }

    #[test]
    fn test_order_respects_dependencies() {
        let mut g = graph(&[("test", &[]), ("build", &["test"]), ("deploy", &["build"])]);
        g.add_dependency("test", "build").unwrap_err();
        let order = g.topological_order().unwrap();
        assert_eq!(order, vec!["test", "build", "deploy"]);
    }

    #[test]
    fn test_ties_broken_by_declaration_order() {
        let mut g = graph(&[("z", &[]), ("y", &[]), ("x", &["z"]), ("w", &[])]);
        g.add_dependency("y", "w").unwrap();
        let order = g.topological_order().unwrap();
        assert_eq!(order, vec!["z", "x", "w", "y"]);
    }

    #[test]
    fn test_order_is_deterministic() {
        let spec: &[(&str, &[&str])] = &[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &[]),
            ("d", &["c", "b"]),
            ("e", &["a"]),
        ];
        let first: Vec<String> = graph(spec)
            .topological_order()
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        for _ in 0..10 {
            let again: Vec<String> = graph(spec)
                .topological_order()
                .unwrap()
                .into_iter()
                .map(String::from)
                .collect();
            assert_eq!(first, again);
        }
        assert_eq!(first, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_cycle_names_edge_and_path() {
        let mut g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        let err = g.add_dependency("a", "c").unwrap_err();
        match err {
            Error::CyclicDependency { edge, cycle } => {
                assert_eq!(edge, ("a".to_string(), "c".to_string()));
                assert_eq!(cycle, vec!["a", "c", "b", "a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        // The rejected edge was not recorded.
        assert!(g.topological_order().is_ok());
    }

    #[test]
    fn test_two_node_cycle() {
        let mut g = graph(&[("a", &[]), ("b", &["a"])]);
        assert!(matches!(
            g.add_dependency("a", "b"),
            Err(Error::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_implicit_reference_edges() {
        let mut g = ResourceGraph::new();
        g.insert(node("bucket", &[])).unwrap();
        let config = Properties::new()
            .set("SourcePath", "dist")
            .set(
                "DestinationBucketName",
                PropertyValue::from(defer("bucket", "BucketName")),
            )
            .build();
        g.insert(
            ResourceNode::describe("upload", ResourceKind::BucketDeployment, config, vec![]).unwrap(),
        )
        .unwrap();
        assert!(matches!(
            g.add_dependency("bucket", "upload"),
            Err(Error::CyclicDependency { .. })
        ));
    }
}
