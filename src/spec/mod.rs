// src/spec/mod.rs

//! Spec model: abstract package requests and concrete resolved graphs
//!
//! An [`AbstractSpec`] is a conjunction of constraints on a package: version
//! ranges, variant values, a compiler, an architecture and constraints on
//! dependencies. Unset fields are unconstrained. Two abstract specs merge
//! with [`AbstractSpec::intersect`], which either yields the combined
//! constraint or an [`Unsatisfiable`] value naming the field that clashed.
//!
//! A [`ConcreteGraph`] holds one fully determined [`ConcreteNode`] per
//! package name; [`ConcreteSpec`] is a view of one node within its graph.

mod arch;
mod compiler;
pub mod concrete;
pub mod dag_hash;
mod deptypes;
mod parser;
mod variant;

pub use arch::{Arch, ArchConstraint, ArchField, TargetConstraint};
pub use compiler::{CompilerConstraint, CompilerSpec};
pub use concrete::{ConcreteGraph, ConcreteNode, ConcreteSpec, DependencyEdge};
pub use dag_hash::DagHashes;
pub use deptypes::DepTypes;
pub use variant::VariantValue;

use crate::error::{Error, Result};
use crate::version::VersionConstraint;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A constraint on one dependency of an abstract spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyConstraint {
    pub spec: AbstractSpec,
    /// Empty when the request does not care how the dependency is used
    pub deptypes: DepTypes,
}

/// Partially constrained package request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbstractSpec {
    pub name: Option<String>,
    pub versions: VersionConstraint,
    pub variants: BTreeMap<String, VariantValue>,
    pub compiler: Option<CompilerConstraint>,
    pub arch: ArchConstraint,
    pub dependencies: BTreeMap<String, DependencyConstraint>,
}

/// Two constraints that cannot hold together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsatisfiable {
    pub package: Option<String>,
    /// `name`, `version`, `variant <name>`, `compiler` or an arch part
    pub field: String,
    pub left: String,
    pub right: String,
}

impl Unsatisfiable {
    fn new(
        package: &Option<String>,
        field: impl Into<String>,
        left: impl fmt::Display,
        right: impl fmt::Display,
    ) -> Self {
        Self {
            package: package.clone(),
            field: field.into(),
            left: left.to_string(),
            right: right.to_string(),
        }
    }
}

impl fmt::Display for Unsatisfiable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(package) = &self.package {
            write!(f, "{}: ", package)?;
        }
        write!(
            f,
            "{} constraint '{}' conflicts with '{}'",
            self.field, self.left, self.right
        )
    }
}

impl std::error::Error for Unsatisfiable {}

impl AbstractSpec {
    /// An otherwise unconstrained request for a package
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Parse a spec string such as `hdf5@1.12 +mpi %gcc@11 ^openmpi@4`
    pub fn parse(s: &str) -> Result<Self> {
        parser::parse_spec(s)
    }

    /// The package name, or an error for anonymous specs
    pub fn require_name(&self) -> Result<&str> {
        self.name
            .as_deref()
            .ok_or_else(|| Error::ParseError(format!("spec '{}' does not name a package", self)))
    }

    /// True if nothing beyond the name is constrained
    pub fn is_unconstrained(&self) -> bool {
        self.versions.is_any()
            && self.variants.is_empty()
            && self.compiler.is_none()
            && self.arch.is_unconstrained()
            && self.dependencies.is_empty()
    }

    /// The same constraints with the dependency edges dropped
    pub fn without_dependencies(&self) -> AbstractSpec {
        AbstractSpec {
            dependencies: BTreeMap::new(),
            ..self.clone()
        }
    }

    /// Merge two constraint sets field by field
    ///
    /// Version ranges intersect, variant values must agree (multi-valued
    /// variants union), compilers must share a name and a version, arch
    /// parts must match where both are set, and dependency constraints merge
    /// recursively by dependency name.
    #[must_use = "an unsatisfiable intersection must be handled"]
    pub fn intersect(&self, other: &AbstractSpec) -> std::result::Result<AbstractSpec, Unsatisfiable> {
        let name = match (&self.name, &other.name) {
            (Some(a), Some(b)) if a != b => {
                return Err(Unsatisfiable::new(&self.name, "name", a, b));
            }
            (Some(a), _) | (None, Some(a)) => Some(a.clone()),
            (None, None) => None,
        };

        let versions = self.versions.intersect(&other.versions).ok_or_else(|| {
            Unsatisfiable::new(&name, "version", &self.versions, &other.versions)
        })?;

        let mut variants = self.variants.clone();
        for (key, value) in &other.variants {
            let merged = match variants.get(key) {
                Some(existing) => existing.intersect(value).ok_or_else(|| {
                    Unsatisfiable::new(
                        &name,
                        format!("variant {}", key),
                        existing.format_with_name(key),
                        value.format_with_name(key),
                    )
                })?,
                None => value.clone(),
            };
            variants.insert(key.clone(), merged);
        }

        let compiler = match (&self.compiler, &other.compiler) {
            (Some(a), Some(b)) => Some(
                a.intersect(b)
                    .ok_or_else(|| Unsatisfiable::new(&name, "compiler", a, b))?,
            ),
            (Some(c), None) | (None, Some(c)) => Some(c.clone()),
            (None, None) => None,
        };

        let arch = self.arch.intersect(&other.arch).map_err(|field| {
            Unsatisfiable::new(&name, field.to_string(), &self.arch, &other.arch)
        })?;

        let mut dependencies = self.dependencies.clone();
        for (dep_name, constraint) in &other.dependencies {
            let merged = match dependencies.get(dep_name) {
                Some(existing) => DependencyConstraint {
                    spec: existing.spec.intersect(&constraint.spec)?,
                    deptypes: existing.deptypes.union(constraint.deptypes),
                },
                None => constraint.clone(),
            };
            dependencies.insert(dep_name.clone(), merged);
        }

        Ok(AbstractSpec {
            name,
            versions,
            variants,
            compiler,
            arch,
            dependencies,
        })
    }

    /// Render everything except dependencies
    fn fmt_node(&self) -> String {
        let mut head = String::new();
        if let Some(name) = &self.name {
            head.push_str(name);
        }
        if !self.versions.is_any() {
            head.push('@');
            head.push_str(&self.versions.to_string());
        }
        for (key, value) in &self.variants {
            if matches!(value, VariantValue::Bool(_)) {
                head.push_str(&value.format_with_name(key));
            }
        }

        let mut tokens = Vec::new();
        if !head.is_empty() {
            tokens.push(head);
        }
        for (key, value) in &self.variants {
            if !matches!(value, VariantValue::Bool(_)) {
                tokens.push(value.format_with_name(key));
            }
        }
        if let Some(compiler) = &self.compiler {
            tokens.push(format!("%{}", compiler));
        }
        if !self.arch.is_unconstrained() {
            tokens.push(self.arch.to_string());
        }
        tokens.join(" ")
    }
}

impl fmt::Display for AbstractSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fmt_node())?;
        for dep in self.dependencies.values() {
            write!(f, " ^{}", dep.spec.fmt_node())?;
        }
        Ok(())
    }
}

impl FromStr for AbstractSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
