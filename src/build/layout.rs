// src/build/layout.rs

//! Install tree layout
//!
//! `<root>/<platform>-<os>-<target>/<compiler>-<version>/<name>-<version>-<hash>`
//!
//! Every prefix carries `.spackle/spec.json`, the concrete subgraph it was
//! built from.

use crate::error::{Error, Result};
use crate::spec::{ConcreteGraph, ConcreteSpec};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Metadata directory inside each prefix
pub const METADATA_DIR: &str = ".spackle";

/// Stored spec inside the metadata directory
pub const SPEC_FILE: &str = "spec.json";

/// Computes install prefixes under a root directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    root: PathBuf,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where a package is installed; externals keep their own prefix
    pub fn prefix_for(&self, spec: &ConcreteSpec) -> PathBuf {
        let node = spec.node();
        if let Some(external) = &node.external {
            return external.clone();
        }
        self.root
            .join(node.arch.to_string())
            .join(format!("{}-{}", node.compiler.name, node.compiler.version))
            .join(format!("{}-{}-{}", node.name, node.version, spec.dag_hash()))
    }

    pub fn spec_file(prefix: &Path) -> PathBuf {
        prefix.join(METADATA_DIR).join(SPEC_FILE)
    }

    /// Write the subgraph rooted at `spec` into its prefix
    pub fn write_metadata(prefix: &Path, spec: &ConcreteSpec) -> Result<()> {
        let subgraph = spec
            .graph()
            .subgraph(spec.name())
            .ok_or_else(|| Error::NotFound(format!("{} is not part of its graph", spec.name())))?;
        let path = Self::spec_file(prefix);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, serde_json::to_string_pretty(&subgraph)?)?;
        debug!("Wrote {}", path.display());
        Ok(())
    }

    /// Read back the stored subgraph of a prefix
    pub fn read_metadata(prefix: &Path) -> Result<ConcreteGraph> {
        let path = Self::spec_file(prefix);
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Delete a prefix created by spackle
    ///
    /// Refuses to touch anything outside the install root, which keeps
    /// external prefixes safe.
    pub fn remove_prefix(&self, prefix: &Path) -> Result<()> {
        if !prefix.starts_with(&self.root) || prefix == self.root {
            return Err(Error::IoError(format!(
                "Refusing to remove {} outside install root {}",
                prefix.display(),
                self.root.display()
            )));
        }
        if prefix.exists() {
            fs::remove_dir_all(prefix).map_err(|e| {
                Error::IoError(format!("Failed to remove {}: {}", prefix.display(), e))
            })?;
            debug!("Removed {}", prefix.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Arch, CompilerSpec, ConcreteNode};
    use crate::version::Version;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn graph(external: Option<PathBuf>) -> ConcreteGraph {
        let node = ConcreteNode {
            name: "zlib".to_string(),
            version: Version::parse("1.3").unwrap(),
            variants: BTreeMap::new(),
            compiler: CompilerSpec::parse("gcc@11.4.0").unwrap(),
            arch: Arch::new("linux", "ubuntu22.04", "x86_64"),
            dependencies: BTreeMap::new(),
            external,
        };
        ConcreteGraph::new(vec!["zlib".to_string()], BTreeMap::from([("zlib".to_string(), node)]))
            .unwrap()
    }

    #[test]
    fn test_prefix_layout() {
        let layout = InstallLayout::new("/opt/spackle");
        let graph = graph(None);
        let spec = graph.spec("zlib").unwrap();
        let prefix = layout.prefix_for(&spec);
        assert_eq!(
            prefix,
            PathBuf::from(format!(
                "/opt/spackle/linux-ubuntu22.04-x86_64/gcc-11.4.0/zlib-1.3-{}",
                spec.dag_hash()
            ))
        );

        let external = graph_with_prefix();
        let spec = external.spec("zlib").unwrap();
        assert_eq!(layout.prefix_for(&spec), PathBuf::from("/usr"));
    }

    fn graph_with_prefix() -> ConcreteGraph {
        graph(Some(PathBuf::from("/usr")))
    }

    #[test]
    fn test_metadata_roundtrip_and_removal() {
        let dir = TempDir::new().unwrap();
        let layout = InstallLayout::new(dir.path());
        let graph = graph(None);
        let spec = graph.spec("zlib").unwrap();
        let prefix = layout.prefix_for(&spec);

        InstallLayout::write_metadata(&prefix, &spec).unwrap();
        assert_eq!(InstallLayout::read_metadata(&prefix).unwrap(), graph);

        layout.remove_prefix(&prefix).unwrap();
        assert!(!prefix.exists());
        assert!(layout.remove_prefix(Path::new("/usr")).is_err());
    }
}
