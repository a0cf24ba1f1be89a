// src/build/environment.rs

//! Isolated build environments
//!
//! A node sees only its direct dependencies:
//! - build and run dependencies put `bin` on `PATH`
//! - link dependencies add library, header, pkg-config and CMake paths
//! - every direct dependency gets `<NAME>_ROOT`
//!
//! Compiler executables from the configuration are exported as `CC`,
//! `CXX`, `F77` and `FC`.

use crate::config::AvailableCompiler;
use crate::spec::{ConcreteSpec, DepTypes};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Variables that accumulate one entry per dependency
const PATH_VARS: &[&str] = &[
    "PATH",
    "LIBRARY_PATH",
    "LD_LIBRARY_PATH",
    "CPATH",
    "PKG_CONFIG_PATH",
    "CMAKE_PREFIX_PATH",
];

/// Host PATH appended after dependency tools
const HOST_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Environment variables scoped to one build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnvironment {
    vars: BTreeMap<String, String>,
}

/// `hdf5` -> `HDF5_ROOT`, `py-numpy` -> `PY_NUMPY_ROOT`
pub fn root_var(package: &str) -> String {
    let mut name: String = package
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    name.push_str("_ROOT");
    name
}

impl BuildEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble the environment for `spec`
    ///
    /// `prefixes` maps package names to install prefixes; only the direct
    /// dependencies of `spec` are read from it.
    pub fn for_node(
        spec: &ConcreteSpec,
        prefixes: &BTreeMap<String, PathBuf>,
        compiler: Option<&AvailableCompiler>,
    ) -> Self {
        let mut env = Self::new();
        let mut lists: BTreeMap<&str, Vec<String>> = BTreeMap::new();

        for (dep, edge) in spec.dependencies() {
            let Some(prefix) = prefixes.get(dep.name()) else {
                continue;
            };
            env.set(root_var(dep.name()), display(prefix));

            if edge.deptypes.contains(DepTypes::BUILD) || edge.deptypes.contains(DepTypes::RUN) {
                lists.entry("PATH").or_default().push(display(&prefix.join("bin")));
            }
            if edge.deptypes.contains(DepTypes::LINK) {
                let lib = display(&prefix.join("lib"));
                lists.entry("LIBRARY_PATH").or_default().push(lib.clone());
                lists.entry("LD_LIBRARY_PATH").or_default().push(lib);
                lists
                    .entry("CPATH")
                    .or_default()
                    .push(display(&prefix.join("include")));
                let pkgconfig = lists.entry("PKG_CONFIG_PATH").or_default();
                pkgconfig.push(display(&prefix.join("lib").join("pkgconfig")));
                pkgconfig.push(display(&prefix.join("share").join("pkgconfig")));
                lists
                    .entry("CMAKE_PREFIX_PATH")
                    .or_default()
                    .push(display(prefix));
            }
        }

        lists.entry("PATH").or_default().push(HOST_PATH.to_string());
        for var in PATH_VARS {
            if let Some(entries) = lists.get(var) {
                env.set(*var, entries.join(":"));
            }
        }

        if let Some(compiler) = compiler {
            let paths = &compiler.paths;
            for (var, path) in [
                ("CC", &paths.cc),
                ("CXX", &paths.cxx),
                ("F77", &paths.f77),
                ("FC", &paths.fc),
            ] {
                if let Some(path) = path {
                    env.set(var, display(path));
                }
            }
        }
        env
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
