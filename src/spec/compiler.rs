// src/spec/compiler.rs

//! Compiler constraints (`%gcc@9:`) and concrete compiler identities

use crate::error::{Error, Result};
use crate::version::{Version, VersionConstraint};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Abstract compiler requirement: a name plus a version constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConstraint {
    pub name: String,
    pub versions: VersionConstraint,
}

impl CompilerConstraint {
    pub fn new(name: impl Into<String>, versions: VersionConstraint) -> Self {
        Self {
            name: name.into(),
            versions,
        }
    }

    /// Parse `gcc`, `gcc@9` or `gcc@9.1:11`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim().trim_start_matches('%');
        let (name, versions) = match s.split_once('@') {
            Some((name, versions)) => (name.trim(), VersionConstraint::parse(versions)?),
            None => (s, VersionConstraint::Any),
        };
        if name.is_empty() {
            return Err(Error::ParseError(format!("missing compiler name in '{}'", s)));
        }
        Ok(Self::new(name, versions))
    }

    pub fn intersect(&self, other: &CompilerConstraint) -> Option<CompilerConstraint> {
        if self.name != other.name {
            return None;
        }
        let versions = self.versions.intersect(&other.versions)?;
        Some(Self::new(self.name.clone(), versions))
    }

    pub fn satisfied_by(&self, compiler: &CompilerSpec) -> bool {
        self.name == compiler.name && self.versions.satisfies(&compiler.version)
    }
}

impl fmt::Display for CompilerConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.versions.is_any() {
            write!(f, "@{}", self.versions)?;
        }
        Ok(())
    }
}

/// A fully determined compiler: name and exact version
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompilerSpec {
    pub name: String,
    pub version: Version,
}

impl CompilerSpec {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Parse `gcc@9.3.0`; a version is required
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim().trim_start_matches('%');
        match s.split_once('@') {
            Some((name, version)) if !name.trim().is_empty() => {
                Ok(Self::new(name.trim(), Version::parse(version)?))
            }
            _ => Err(Error::ParseError(format!(
                "compiler '{}' must be written as name@version",
                s
            ))),
        }
    }

    /// The constraint that pins exactly this compiler
    pub fn to_constraint(&self) -> CompilerConstraint {
        CompilerConstraint::new(
            self.name.clone(),
            VersionConstraint::exact(self.version.clone()),
        )
    }
}

impl fmt::Display for CompilerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}
