// src/spec/dag_hash.rs

//! Content hashes for concrete specs
//!
//! Each node is serialized into a deterministic text form (name, version,
//! sorted variants, compiler, architecture, external prefix) followed by one
//! line per dependency carrying the dependency's own hash. Hashing that text
//! gives a Merkle identity: changing any field of a node changes its hash
//! and the hash of every node that depends on it, and nothing else.
//!
//! Dependencies of every type are included, so two installs that differ
//! only in a build tool get different prefixes.

use super::{ConcreteGraph, ConcreteNode, DependencyEdge};
use crate::hash::{Hash, hash_bytes};
use std::collections::BTreeMap;

/// Hash of every node in a graph, keyed by package name
pub type DagHashes = BTreeMap<String, Hash>;

/// First line of every canonical form; bump when the layout changes
const FORMAT_TAG: &str = "spackle-dag-v1";

/// Deterministic serialization of one node given its dependencies' hashes
pub fn canonical_form(node: &ConcreteNode, deps: &[(&str, &DependencyEdge, Hash)]) -> String {
    let mut data = String::new();
    data.push_str(FORMAT_TAG);
    data.push('\n');
    data.push_str(&format!("{}@{}\n", node.name, node.version));
    for (key, value) in &node.variants {
        data.push_str(&format!("variant:{}\n", value.format_with_name(key)));
    }
    data.push_str(&format!("compiler:{}\n", node.compiler));
    data.push_str(&format!("arch:{}\n", node.arch));
    if let Some(prefix) = &node.external {
        data.push_str(&format!("external:{}\n", prefix.display()));
    }

    let mut sorted: Vec<&(&str, &DependencyEdge, Hash)> = deps.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    for (name, edge, hash) in sorted {
        let virtuals: Vec<&str> = edge.virtuals.iter().map(String::as_str).collect();
        data.push_str(&format!(
            "^{} type={} virtuals={} {}\n",
            name,
            edge.deptypes,
            virtuals.join(","),
            hash
        ));
    }
    data
}

fn visit(graph: &ConcreteGraph, node: &ConcreteNode, memo: &mut DagHashes) -> Hash {
    if let Some(hash) = memo.get(&node.name) {
        return hash.clone();
    }

    // Graphs are acyclic by construction, so this recursion terminates
    let mut deps = Vec::with_capacity(node.dependencies.len());
    for (dep_name, edge) in &node.dependencies {
        if let Some(dep) = graph.node(dep_name) {
            let hash = visit(graph, dep, memo);
            deps.push((dep_name.as_str(), edge, hash));
        }
    }

    let hash = hash_bytes(canonical_form(node, &deps).as_bytes());
    memo.insert(node.name.clone(), hash.clone());
    hash
}

/// Hash every node of a graph
pub fn compute(graph: &ConcreteGraph) -> DagHashes {
    let mut memo = DagHashes::new();
    for node in graph.nodes().values() {
        visit(graph, node, &mut memo);
    }
    memo
}

/// Hash of one node; only its own subgraph is visited
pub fn hash_of(graph: &ConcreteGraph, node: &ConcreteNode) -> Hash {
    let mut memo = DagHashes::new();
    visit(graph, node, &mut memo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Arch, CompilerSpec, DepTypes, VariantValue};
    use crate::version::Version;
    use std::collections::BTreeSet;

    fn node(name: &str, version: &str, deps: &[&str]) -> ConcreteNode {
        ConcreteNode {
            name: name.to_string(),
            version: Version::parse(version).unwrap(),
            variants: BTreeMap::from([("shared".to_string(), VariantValue::Bool(true))]),
            compiler: CompilerSpec::parse("gcc@11.4.0").unwrap(),
            arch: Arch::parse("linux-ubuntu22.04-x86_64").unwrap(),
            dependencies: deps
                .iter()
                .map(|d| (d.to_string(), DependencyEdge::new(DepTypes::DEFAULT)))
                .collect(),
            external: None,
        }
    }

    /// app -> (libfoo -> zlib), (libbar)
    fn sample_nodes() -> BTreeMap<String, ConcreteNode> {
        [
            node("app", "1.0", &["libfoo", "libbar"]),
            node("libfoo", "1.0", &["zlib"]),
            node("libbar", "2.1", &[]),
            node("zlib", "1.3", &[]),
        ]
        .into_iter()
        .map(|n| (n.name.clone(), n))
        .collect()
    }

    fn build(nodes: BTreeMap<String, ConcreteNode>) -> ConcreteGraph {
        ConcreteGraph::new(vec!["app".to_string()], nodes).unwrap()
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = build(sample_nodes()).dag_hashes();
        let b = build(sample_nodes()).dag_hashes();
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
        assert_eq!(a["app"].as_str().len(), 64);
    }

    #[test]
    fn test_leaf_change_propagates_upward_only() {
        let before = build(sample_nodes()).dag_hashes();

        let mut nodes = sample_nodes();
        if let Some(zlib) = nodes.get_mut("zlib") {
            zlib.variants.insert("shared".to_string(), VariantValue::Bool(false));
        }
        let after = build(nodes).dag_hashes();

        assert_ne!(before["zlib"], after["zlib"]);
        assert_ne!(before["libfoo"], after["libfoo"]);
        assert_ne!(before["app"], after["app"]);
        assert_eq!(before["libbar"], after["libbar"]);
    }

    #[test]
    fn test_every_field_contributes() {
        let base = hash_of(&build(sample_nodes()), &sample_nodes()["libbar"]);

        let variations: Vec<Box<dyn Fn(&mut ConcreteNode)>> = vec![
            Box::new(|n| n.version = Version::parse("2.2").unwrap()),
            Box::new(|n| n.compiler = CompilerSpec::parse("gcc@12.1.0").unwrap()),
            Box::new(|n| n.arch.target = "zen2".to_string()),
            Box::new(|n| n.external = Some("/opt/libbar".into())),
            Box::new(|n| {
                n.variants
                    .insert("backends".to_string(), VariantValue::multi(["cuda"]));
            }),
        ];

        for change in variations {
            let mut nodes = sample_nodes();
            if let Some(libbar) = nodes.get_mut("libbar") {
                change(libbar);
            }
            let graph = build(nodes);
            let hash = graph.spec("libbar").unwrap().dag_hash();
            assert_ne!(hash, base);
        }
    }

    #[test]
    fn test_edge_type_and_virtuals_contribute() {
        let before = build(sample_nodes()).dag_hashes();

        let mut nodes = sample_nodes();
        if let Some(edge) = nodes.get_mut("app").and_then(|n| n.dependencies.get_mut("libbar")) {
            edge.deptypes = DepTypes::BUILD;
        }
        assert_ne!(build(nodes).dag_hashes()["app"], before["app"]);

        let mut nodes = sample_nodes();
        if let Some(edge) = nodes.get_mut("app").and_then(|n| n.dependencies.get_mut("libbar")) {
            edge.virtuals = BTreeSet::from(["blas".to_string()]);
        }
        assert_ne!(build(nodes).dag_hashes()["app"], before["app"]);
    }

    #[test]
    fn test_canonical_form_layout() {
        let nodes = sample_nodes();
        let text = canonical_form(&nodes["zlib"], &[]);
        assert_eq!(
            text,
            "spackle-dag-v1\nzlib@1.3\nvariant:+shared\ncompiler:gcc@11.4.0\narch:linux-ubuntu22.04-x86_64\n"
        );
    }

    #[test]
    fn test_subgraph_hash_matches_full_graph() {
        let graph = build(sample_nodes());
        let full = graph.dag_hashes();
        let sub = graph.subgraph("libfoo").unwrap().dag_hashes();
        assert_eq!(full["libfoo"], sub["libfoo"]);
        assert_eq!(full["zlib"], sub["zlib"]);
    }
}
