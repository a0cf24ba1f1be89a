// src/repo/format.rs

//! Recipe file format definitions
//!
//! Recipes are TOML files (`packages/<name>/package.toml`) that declare a
//! package's versions, variants, dependencies, conflicts and the virtual
//! packages it provides. Spec-valued fields (`spec`, `when`) use the same
//! spec-string syntax as the command line; a `when` condition is an
//! anonymous spec evaluated against the declaring package.
//!
//! ```toml
//! [package]
//! name = "hdf5"
//!
//! [[versions]]
//! version = "1.14.3"
//! sha256 = "09cdb287aa7a89148c1638dd20891fdbae08102cf433ef128fd345338aa237c7"
//!
//! [[variants]]
//! name = "mpi"
//! default = true
//!
//! [[depends_on]]
//! spec = "mpi@3:"
//! when = "+mpi"
//!
//! [build]
//! steps = ["./configure --prefix=%(prefix)s", "make -j%(jobs)s install"]
//! ```

use crate::spec::VariantValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A recipe file as written on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecipeFile {
    pub package: PackageSection,

    #[serde(default)]
    pub versions: Vec<VersionEntry>,

    #[serde(default)]
    pub variants: Vec<VariantEntry>,

    #[serde(default)]
    pub depends_on: Vec<DependsOnEntry>,

    #[serde(default)]
    pub conflicts: Vec<ConflictEntry>,

    #[serde(default)]
    pub provides: Vec<ProvidesEntry>,

    #[serde(default)]
    pub build: BuildSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSection {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionEntry {
    pub version: String,
    /// Source archive checksum, `sha256:<hex>` or bare hex
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Picked ahead of newer versions when nothing else decides
    #[serde(default)]
    pub preferred: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantEntry {
    pub name: String,
    /// `true`/`false` for boolean variants, a string or list otherwise
    pub default: VariantValue,
    /// Allowed values for valued variants
    #[serde(default)]
    pub values: Vec<String>,
    /// Accept several values at once
    #[serde(default)]
    pub multi: bool,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependsOnEntry {
    pub spec: String,
    /// Comma separated subset of `build`, `link`, `run`
    #[serde(default, rename = "type")]
    pub deptype: Option<String>,
    #[serde(default)]
    pub when: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConflictEntry {
    pub spec: String,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvidesEntry {
    pub spec: String,
    #[serde(default)]
    pub when: Option<String>,
}

/// Shell steps run by the script builder
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    #[serde(default)]
    pub steps: Vec<String>,
    /// Extra environment for every step
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}
