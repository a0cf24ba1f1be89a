// src/spec/concrete.rs

//! Concrete specs: fully resolved nodes in a unified dependency graph
//!
//! A [`ConcreteGraph`] stores exactly one [`ConcreteNode`] per package name,
//! so two paths that reach the same package always reach the same node.
//! The graph is validated on construction (and on deserialization): every
//! edge target exists and there are no cycles.

use super::dag_hash::{self, DagHashes};
use super::{AbstractSpec, Arch, ArchConstraint, CompilerSpec, DepTypes, VariantValue};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::version::{Version, VersionConstraint};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::path::PathBuf;

/// An edge from a dependent to one of its dependencies
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    #[serde(rename = "type")]
    pub deptypes: DepTypes,
    /// Virtual packages this edge satisfies (`mpi` for an edge to `openmpi`)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub virtuals: BTreeSet<String>,
}

impl DependencyEdge {
    pub fn new(deptypes: DepTypes) -> Self {
        Self {
            deptypes,
            virtuals: BTreeSet::new(),
        }
    }
}

/// One fully determined package in a concrete graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcreteNode {
    pub name: String,
    pub version: Version,
    #[serde(default)]
    pub variants: BTreeMap<String, VariantValue>,
    pub compiler: CompilerSpec,
    pub arch: Arch,
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencyEdge>,
    /// Prefix of a package provided by the site instead of built
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<PathBuf>,
}

impl ConcreteNode {
    /// Check this node's own fields against a constraint, ignoring its
    /// dependency constraints
    pub fn satisfies_local(&self, spec: &AbstractSpec) -> bool {
        if spec.name.as_ref().is_some_and(|n| *n != self.name) {
            return false;
        }
        if !spec.versions.satisfies(&self.version) {
            return false;
        }
        let variants_ok = spec.variants.iter().all(|(key, wanted)| {
            self.variants
                .get(key)
                .is_some_and(|actual| wanted.satisfied_by(actual))
        });
        if !variants_ok {
            return false;
        }
        if spec
            .compiler
            .as_ref()
            .is_some_and(|c| !c.satisfied_by(&self.compiler))
        {
            return false;
        }
        spec.arch.satisfied_by(&self.arch)
    }

    /// The abstract spec that pins every local field of this node
    pub fn to_abstract(&self) -> AbstractSpec {
        AbstractSpec {
            name: Some(self.name.clone()),
            versions: VersionConstraint::exact(self.version.clone()),
            variants: self.variants.clone(),
            compiler: Some(self.compiler.to_constraint()),
            arch: ArchConstraint::from(&self.arch),
            dependencies: BTreeMap::new(),
        }
    }

    pub fn is_external(&self) -> bool {
        self.external.is_some()
    }
}

impl fmt::Display for ConcreteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_abstract())
    }
}

#[derive(Serialize, Deserialize)]
struct GraphData {
    roots: Vec<String>,
    nodes: BTreeMap<String, ConcreteNode>,
}

/// A unified, acyclic graph of concrete nodes keyed by package name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GraphData", into = "GraphData")]
pub struct ConcreteGraph {
    roots: Vec<String>,
    nodes: BTreeMap<String, ConcreteNode>,
}

impl TryFrom<GraphData> for ConcreteGraph {
    type Error = Error;

    fn try_from(data: GraphData) -> Result<Self> {
        ConcreteGraph::new(data.roots, data.nodes)
    }
}

impl From<ConcreteGraph> for GraphData {
    fn from(graph: ConcreteGraph) -> Self {
        GraphData {
            roots: graph.roots,
            nodes: graph.nodes,
        }
    }
}

impl ConcreteGraph {
    /// Build and validate a graph
    pub fn new(roots: Vec<String>, nodes: BTreeMap<String, ConcreteNode>) -> Result<Self> {
        for (key, node) in &nodes {
            if *key != node.name {
                return Err(Error::ParseError(format!(
                    "graph node '{}' is stored under '{}'",
                    node.name, key
                )));
            }
            for dep in node.dependencies.keys() {
                if !nodes.contains_key(dep) {
                    return Err(Error::NotFound(format!(
                        "dependency '{}' of '{}' is missing from the graph",
                        dep, key
                    )));
                }
            }
        }

        let mut unique_roots = Vec::new();
        for root in roots {
            if !nodes.contains_key(&root) {
                return Err(Error::NotFound(format!("root '{}' is missing from the graph", root)));
            }
            if !unique_roots.contains(&root) {
                unique_roots.push(root);
            }
        }

        let graph = Self {
            roots: unique_roots,
            nodes,
        };
        if let Some(cycle) = graph.find_cycle() {
            return Err(Error::ParseError(format!(
                "dependency cycle in graph: {}",
                cycle.join(" -> ")
            )));
        }
        Ok(graph)
    }

    /// Depth-first search for a back edge
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
        for start in self.nodes.keys() {
            if marks.contains_key(start.as_str()) {
                continue;
            }
            // Stack of (node, next dependency index)
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            marks.insert(start.as_str(), Mark::Visiting);
            while let Some((name, index)) = stack.pop() {
                let deps: Vec<&str> = self.nodes[name]
                    .dependencies
                    .keys()
                    .map(String::as_str)
                    .collect();
                if index >= deps.len() {
                    marks.insert(name, Mark::Done);
                    continue;
                }
                stack.push((name, index + 1));
                let next = deps[index];
                match marks.get(next) {
                    Some(Mark::Visiting) => {
                        let mut cycle: Vec<String> =
                            stack.iter().map(|(n, _)| n.to_string()).collect();
                        if let Some(pos) = cycle.iter().position(|n| n == next) {
                            cycle.drain(..pos);
                        }
                        cycle.push(next.to_string());
                        return Some(cycle);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(next, Mark::Visiting);
                        stack.push((next, 0));
                    }
                }
            }
        }
        None
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn nodes(&self) -> &BTreeMap<String, ConcreteNode> {
        &self.nodes
    }

    /// Take the nodes back out, e.g. to build a modified graph
    pub fn into_nodes(self) -> BTreeMap<String, ConcreteNode> {
        self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&ConcreteNode> {
        self.nodes.get(name)
    }

    pub fn spec(&self, name: &str) -> Option<ConcreteSpec<'_>> {
        self.nodes.get(name).map(|node| ConcreteSpec { graph: self, node })
    }

    /// Views of the root nodes, in request order
    pub fn root_specs(&self) -> Vec<ConcreteSpec<'_>> {
        self.roots.iter().filter_map(|r| self.spec(r)).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct dependents of a node, sorted by name
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.dependencies.contains_key(name))
            .map(|n| n.name.as_str())
            .collect()
    }

    /// Every package reachable from `name`, excluding `name` itself
    pub fn transitive_dependencies(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([name]);
        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(current) else { continue };
            for dep in node.dependencies.keys() {
                if seen.insert(dep.clone()) {
                    queue.push_back(dep);
                }
            }
        }
        seen.remove(name);
        seen
    }

    /// The subgraph rooted at one node
    pub fn subgraph(&self, name: &str) -> Option<ConcreteGraph> {
        let root = self.nodes.get(name)?;
        let mut nodes = BTreeMap::new();
        nodes.insert(name.to_string(), root.clone());
        for dep in self.transitive_dependencies(name) {
            if let Some(node) = self.nodes.get(&dep) {
                nodes.insert(dep, node.clone());
            }
        }
        Some(ConcreteGraph {
            roots: vec![name.to_string()],
            nodes,
        })
    }

    /// Content hash of every node
    pub fn dag_hashes(&self) -> DagHashes {
        dag_hash::compute(self)
    }
}

/// A view of one node inside its graph
#[derive(Debug, Clone, Copy)]
pub struct ConcreteSpec<'a> {
    graph: &'a ConcreteGraph,
    node: &'a ConcreteNode,
}

impl<'a> ConcreteSpec<'a> {
    pub fn name(&self) -> &'a str {
        &self.node.name
    }

    pub fn node(&self) -> &'a ConcreteNode {
        self.node
    }

    pub fn graph(&self) -> &'a ConcreteGraph {
        self.graph
    }

    /// Direct dependencies with their edges
    pub fn dependencies(&self) -> impl Iterator<Item = (ConcreteSpec<'a>, &'a DependencyEdge)> + 'a {
        let graph = self.graph;
        self.node
            .dependencies
            .iter()
            .filter_map(move |(name, edge)| graph.spec(name).map(|spec| (spec, edge)))
    }

    /// Content hash of this node
    pub fn dag_hash(&self) -> Hash {
        dag_hash::hash_of(self.graph, self.node)
    }

    /// Find the node a `^name` constraint refers to: a package of that name
    /// in this node's closure, or the provider on an edge that satisfies a
    /// virtual of that name
    fn find_dependency(&self, name: &str) -> Option<(ConcreteSpec<'a>, bool)> {
        let closure = self.graph.transitive_dependencies(self.name());
        if closure.contains(name) {
            return self.graph.spec(name).map(|spec| (spec, false));
        }
        std::iter::once(self.name().to_string())
            .chain(closure)
            .filter_map(|n| self.graph.node(&n))
            .flat_map(|n| n.dependencies.iter())
            .find(|(_, edge)| edge.virtuals.contains(name))
            .and_then(|(target, _)| self.graph.spec(target))
            .map(|spec| (spec, true))
    }

    /// Check every constraint of `spec` against this node and, by name, its
    /// dependencies
    pub fn satisfies(&self, spec: &AbstractSpec) -> bool {
        if !self.node.satisfies_local(spec) {
            return false;
        }

        spec.dependencies.iter().all(|(dep_name, constraint)| {
            let Some((target, via_virtual)) = self.find_dependency(dep_name) else {
                return false;
            };
            if !constraint.deptypes.is_empty() {
                let direct = self.node.dependencies.get(target.name());
                if !direct.is_some_and(|edge| edge.deptypes.contains(constraint.deptypes)) {
                    return false;
                }
            }
            if via_virtual {
                // Provided versions are a recipe property; only the provider's
                // own fields can be checked here
                let provider_view = AbstractSpec {
                    name: None,
                    versions: VersionConstraint::Any,
                    ..constraint.spec.clone()
                };
                target.satisfies(&provider_view)
            } else {
                target.satisfies(&constraint.spec)
            }
        })
    }
}
