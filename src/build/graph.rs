// src/build/graph.rs

//! Build ordering over a concrete graph
//!
//! Edges point from a package to the packages it depends on. The
//! topological sort yields dependencies before dependents; among packages
//! that become ready together the name decides, so the order is stable
//! across runs.
//!
//! # Example
//!
//! ```ignore
//! use spackle::build::BuildGraph;
//!
//! let graph = BuildGraph::from_concrete(&concrete);
//! // ["zlib", "hdf5", "app"]
//! let order = graph.topological_sort()?;
//! ```

use crate::error::{Error, Result};
use crate::spec::ConcreteGraph;
use std::collections::{BTreeMap, BTreeSet};

/// Dependency structure of one install
#[derive(Debug, Default, Clone)]
pub struct BuildGraph {
    /// Key: package name, Value: packages it depends on
    edges: BTreeMap<String, BTreeSet<String>>,
    /// Key: package name, Value: packages that depend on it
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl BuildGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_concrete(graph: &ConcreteGraph) -> Self {
        let mut build = Self::new();
        for (name, node) in graph.nodes() {
            let deps: Vec<&str> = node.dependencies.keys().map(String::as_str).collect();
            build.add_package(name, &deps);
        }
        build
    }

    /// Add a package with its dependencies, merging with existing edges
    pub fn add_package(&mut self, name: &str, dependencies: &[&str]) {
        self.edges.entry(name.to_string()).or_default();
        self.reverse_edges.entry(name.to_string()).or_default();

        for dep in dependencies {
            self.edges.entry(dep.to_string()).or_default();
            self.edges
                .entry(name.to_string())
                .or_default()
                .insert(dep.to_string());
            self.reverse_edges
                .entry(dep.to_string())
                .or_default()
                .insert(name.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn dependencies(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(name)
    }

    pub fn dependents(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.reverse_edges.get(name)
    }

    /// Number of direct dependencies per package
    pub fn pending_counts(&self) -> BTreeMap<String, usize> {
        self.edges
            .iter()
            .map(|(name, deps)| (name.clone(), deps.len()))
            .collect()
    }

    /// Dependencies-first order, ties broken by name
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut pending = self.pending_counts();
        let mut ready: BTreeSet<String> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| name.clone())
            .collect();
        let mut order = Vec::with_capacity(self.edges.len());

        while let Some(name) = ready.pop_first() {
            if let Some(dependents) = self.reverse_edges.get(&name) {
                for dependent in dependents {
                    if let Some(count) = pending.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            ready.insert(dependent.clone());
                        }
                    }
                }
            }
            order.push(name);
        }

        if order.len() != self.edges.len() {
            let stuck: Vec<&str> = pending
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(name, _)| name.as_str())
                .collect();
            return Err(Error::ParseError(format!(
                "Circular dependency among: {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }

    /// Every package that depends on `name`, directly or not
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(dependents) = self.reverse_edges.get(&current) {
                for dependent in dependents {
                    if result.insert(dependent.clone()) {
                        stack.push(dependent.clone());
                    }
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> BuildGraph {
        let mut graph = BuildGraph::new();
        graph.add_package("app", &["hdf5", "zlib"]);
        graph.add_package("hdf5", &["zlib", "mpich"]);
        graph.add_package("mpich", &[]);
        graph.add_package("zlib", &[]);
        graph.add_package("tool", &[]);
        graph
    }

    #[test]
    fn test_empty_graph() {
        let graph = BuildGraph::new();
        assert!(graph.is_empty());
        assert!(graph.topological_sort().unwrap().is_empty());
    }

    #[test]
    fn test_stable_order() {
        let order = diamond().topological_sort().unwrap();
        assert_eq!(order, vec!["mpich", "tool", "zlib", "hdf5", "app"]);
    }

    #[test]
    fn test_cycle_detection() {
        let mut graph = BuildGraph::new();
        graph.add_package("a", &["b"]);
        graph.add_package("b", &["a"]);
        graph.add_package("c", &[]);
        let err = graph.topological_sort().unwrap_err();
        assert!(err.to_string().contains("a, b"));
    }

    #[test]
    fn test_transitive_dependents() {
        let graph = diamond();
        let blocked = graph.transitive_dependents("zlib");
        assert_eq!(blocked.into_iter().collect::<Vec<_>>(), vec!["app", "hdf5"]);
        assert!(graph.transitive_dependents("tool").is_empty());
        assert_eq!(graph.pending_counts()["hdf5"], 2);
    }
}
