// src/commands/concretize.rs
//! Print a resolved graph without building it

use super::Session;
use anyhow::Result;
use spackle::{ConcreteGraph, ConcreteSpec, Hash};
use std::collections::BTreeSet;
use std::fmt::Write;

/// Marker for specs already in the install database
const INSTALLED: &str = "[+]";
/// Marker for specs that would have to be built
const MISSING: &str = " - ";
/// Marker for site-provided specs
const EXTERNAL: &str = "[e]";

pub fn cmd_concretize(session: &Session, specs: &[String], long: bool, fresh: bool) -> Result<()> {
    let graph = session.concretize(specs, fresh)?;
    let mut lookup_error = None;
    let tree = render_tree(&graph, long, |hash| match session.db.lookup(hash) {
        Ok(record) => record.is_some(),
        Err(e) => {
            lookup_error.get_or_insert(e);
            false
        }
    });
    if let Some(e) = lookup_error {
        return Err(e.into());
    }
    print!("{}", tree);
    Ok(())
}

/// Indented tree of a graph, each node printed once
///
/// ```text
/// [+]  4kz2bq3  zlib@1.3~debug%gcc@11.4.0 arch=linux-ubuntu22.04-x86_64
///  -   q7cm1xa  app@1.0%gcc@11.4.0 arch=linux-ubuntu22.04-x86_64
///  -   ...          ^hdf5@1.14.3+mpi%gcc@11.4.0 ...
/// ```
pub fn render_tree(graph: &ConcreteGraph, long: bool, mut installed: impl FnMut(&Hash) -> bool) -> String {
    let mut out = String::new();
    let mut seen = BTreeSet::new();
    for root in graph.root_specs() {
        render_node(&mut out, root, 0, long, &mut installed, &mut seen);
    }
    out
}

fn render_node(
    out: &mut String,
    spec: ConcreteSpec<'_>,
    depth: usize,
    long: bool,
    installed: &mut impl FnMut(&Hash) -> bool,
    seen: &mut BTreeSet<String>,
) {
    if !seen.insert(spec.name().to_string()) {
        return;
    }
    let hash = spec.dag_hash();
    let marker = if installed(&hash) {
        INSTALLED
    } else if spec.node().is_external() {
        EXTERNAL
    } else {
        MISSING
    };
    let shown = if long { hash.as_str() } else { hash.short() };
    let caret = if depth == 0 { "" } else { "^" };
    let _ = writeln!(
        out,
        "{}  {}  {}{}{}",
        marker,
        shown,
        "    ".repeat(depth),
        caret,
        spec.node()
    );
    for (dep, _) in spec.dependencies() {
        render_node(out, dep, depth + 1, long, installed, seen);
    }
}
