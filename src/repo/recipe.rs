// src/repo/recipe.rs

//! Validated recipe data consumed by the concretizer and the builders

use crate::hash::Hash;
use crate::spec::{AbstractSpec, DepTypes, VariantValue};
use crate::version::{Version, VersionConstraint};
use std::collections::BTreeMap;

/// A declared version with its integrity metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDecl {
    pub version: Version,
    pub sha256: Option<Hash>,
    pub url: Option<String>,
    pub preferred: bool,
}

/// A build option the recipe accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantDecl {
    pub name: String,
    pub default: VariantValue,
    /// Allowed values; empty for boolean variants
    pub values: Vec<String>,
    pub multi: bool,
    /// The variant only exists when this condition holds
    pub when: AbstractSpec,
    pub description: Option<String>,
}

impl VariantDecl {
    pub fn is_bool(&self) -> bool {
        matches!(self.default, VariantValue::Bool(_))
    }

    /// Check a concrete value against the declaration
    pub fn accepts(&self, value: &VariantValue) -> bool {
        match (value, self.multi) {
            (VariantValue::Bool(_), _) => self.is_bool(),
            (VariantValue::Single(v), false) => self.values.contains(v),
            (VariantValue::Multi(set), true) => {
                !set.is_empty() && set.iter().all(|v| self.values.contains(v))
            }
            _ => false,
        }
    }

    /// Bring an abstract constraint into the shape this declaration uses
    pub fn normalize(&self, value: VariantValue) -> VariantValue {
        if self.multi { value.into_multi() } else { value }
    }
}

/// A dependency on another package or on a virtual
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDecl {
    /// Constraint on the dependency; always named
    pub spec: AbstractSpec,
    pub deptypes: DepTypes,
    pub when: AbstractSpec,
}

impl DependencyDecl {
    pub fn target(&self) -> &str {
        self.spec.name.as_deref().unwrap_or_default()
    }
}

/// A combination the recipe declares unbuildable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDecl {
    pub spec: AbstractSpec,
    pub when: AbstractSpec,
    pub msg: Option<String>,
}

/// A virtual package this recipe can stand in for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvidesDecl {
    /// Virtual name plus the range of its interface provided
    pub spec: AbstractSpec,
    pub when: AbstractSpec,
}

impl ProvidesDecl {
    pub fn virtual_name(&self) -> &str {
        self.spec.name.as_deref().unwrap_or_default()
    }

    pub fn versions(&self) -> &VersionConstraint {
        &self.spec.versions
    }
}

/// Shell steps for the script builder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSteps {
    pub steps: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// Everything the engine knows about one package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeDefinition {
    pub name: String,
    pub description: Option<String>,
    /// Declaration order
    pub versions: Vec<VersionDecl>,
    pub variants: Vec<VariantDecl>,
    pub dependencies: Vec<DependencyDecl>,
    pub conflicts: Vec<ConflictDecl>,
    pub provides: Vec<ProvidesDecl>,
    pub build: BuildSteps,
}

impl RecipeDefinition {
    pub fn variant(&self, name: &str) -> Option<&VariantDecl> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn version_decl(&self, version: &Version) -> Option<&VersionDecl> {
        self.versions.iter().find(|v| v.version == *version)
    }

    /// Provides declarations for one virtual
    pub fn provides_for<'a>(&'a self, virtual_name: &'a str) -> impl Iterator<Item = &'a ProvidesDecl> + 'a {
        self.provides
            .iter()
            .filter(move |p| p.virtual_name() == virtual_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(default: VariantValue, values: &[&str], multi: bool) -> VariantDecl {
        VariantDecl {
            name: "v".to_string(),
            default,
            values: values.iter().map(|s| s.to_string()).collect(),
            multi,
            when: AbstractSpec::default(),
            description: None,
        }
    }

    #[test]
    fn test_variant_accepts() {
        let flag = decl(VariantValue::Bool(true), &[], false);
        assert!(flag.accepts(&VariantValue::Bool(false)));
        assert!(!flag.accepts(&VariantValue::Single("x".into())));

        let single = decl(VariantValue::Single("Release".into()), &["Debug", "Release"], false);
        assert!(single.accepts(&VariantValue::Single("Debug".into())));
        assert!(!single.accepts(&VariantValue::Single("Fast".into())));
        assert!(!single.accepts(&VariantValue::multi(["Debug"])));

        let multi = decl(VariantValue::multi(["openmp"]), &["openmp", "cuda"], true);
        assert!(multi.accepts(&VariantValue::multi(["cuda", "openmp"])));
        assert!(!multi.accepts(&VariantValue::multi(["rocm"])));
        assert!(!multi.accepts(&VariantValue::Multi(Default::default())));
    }

    #[test]
    fn test_normalize_multi() {
        let multi = decl(VariantValue::multi(["openmp"]), &["openmp", "cuda"], true);
        assert_eq!(
            multi.normalize(VariantValue::Single("cuda".into())),
            VariantValue::multi(["cuda"])
        );
        let single = decl(VariantValue::Single("a".into()), &["a", "b"], false);
        assert_eq!(
            single.normalize(VariantValue::Single("b".into())),
            VariantValue::Single("b".into())
        );
    }
}
