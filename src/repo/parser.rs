// src/repo/parser.rs

//! Recipe file parsing and validation

use super::format::RecipeFile;
use super::recipe::{
    BuildSteps, ConflictDecl, DependencyDecl, ProvidesDecl, RecipeDefinition, VariantDecl,
    VersionDecl,
};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::spec::{AbstractSpec, DepTypes, VariantValue};
use crate::version::Version;
use std::collections::BTreeSet;
use std::path::Path;

/// Parse a recipe from a TOML string
pub fn parse_recipe(content: &str) -> Result<RecipeDefinition> {
    let file: RecipeFile =
        toml::from_str(content).map_err(|e| Error::ParseError(format!("Invalid recipe: {}", e)))?;
    validate_recipe(file)
}

/// Parse a recipe from a file
pub fn parse_recipe_file(path: &Path) -> Result<RecipeDefinition> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::IoError(format!("Failed to read recipe file {}: {}", path.display(), e))
    })?;

    parse_recipe(&content)
        .map_err(|e| Error::ParseError(format!("{}: {}", path.display(), e)))
}

fn condition(name: &str, when: Option<&str>) -> Result<AbstractSpec> {
    let Some(when) = when else {
        return Ok(AbstractSpec::default());
    };
    let spec = AbstractSpec::parse(when)?;
    match &spec.name {
        Some(other) if other != name => Err(Error::ParseError(format!(
            "condition '{}' in recipe {} names another package",
            when, name
        ))),
        _ => Ok(AbstractSpec { name: None, ..spec }),
    }
}

fn named_spec(text: &str, what: &str, recipe: &str) -> Result<AbstractSpec> {
    let spec = AbstractSpec::parse(text)?;
    if spec.name.is_none() {
        return Err(Error::ParseError(format!(
            "{} '{}' in recipe {} must name a package",
            what, text, recipe
        )));
    }
    Ok(spec)
}

/// Convert a raw recipe file into validated recipe data
pub fn validate_recipe(file: RecipeFile) -> Result<RecipeDefinition> {
    let name = file.package.name.trim().to_string();
    if name.is_empty() {
        return Err(Error::ParseError("Recipe package name cannot be empty".to_string()));
    }

    let mut versions = Vec::with_capacity(file.versions.len());
    let mut seen_versions = BTreeSet::new();
    for entry in file.versions {
        let version = Version::parse(&entry.version)?;
        if !seen_versions.insert(version.clone()) {
            return Err(Error::ParseError(format!(
                "Recipe {} declares version {} twice",
                name, version
            )));
        }
        let sha256 = entry
            .sha256
            .as_deref()
            .map(Hash::parse_prefixed)
            .transpose()
            .map_err(|e| {
                Error::ParseError(format!("Invalid checksum for {}@{}: {}", name, version, e))
            })?;
        versions.push(VersionDecl {
            version,
            sha256,
            url: entry.url,
            preferred: entry.preferred,
        });
    }

    let mut variants: Vec<VariantDecl> = Vec::with_capacity(file.variants.len());
    for entry in file.variants {
        if variants.iter().any(|v| v.name == entry.name) {
            return Err(Error::ParseError(format!(
                "Recipe {} declares variant {} twice",
                name, entry.name
            )));
        }
        let default = match (&entry.default, entry.multi) {
            (VariantValue::Bool(_), _) => {
                if !entry.values.is_empty() || entry.multi {
                    return Err(Error::ParseError(format!(
                        "Boolean variant {} in recipe {} cannot list values",
                        entry.name, name
                    )));
                }
                entry.default.clone()
            }
            (value, true) => value.clone().into_multi(),
            (VariantValue::Single(_), false) => entry.default.clone(),
            (VariantValue::Multi(_), false) => {
                return Err(Error::ParseError(format!(
                    "Variant {} in recipe {} has a list default but is not multi-valued",
                    entry.name, name
                )));
            }
        };
        let decl = VariantDecl {
            name: entry.name,
            default,
            values: entry.values,
            multi: entry.multi,
            when: condition(&name, entry.when.as_deref())?,
            description: entry.description,
        };
        if !decl.accepts(&decl.default) {
            return Err(Error::ParseError(format!(
                "Default '{}' of variant {} in recipe {} is not an allowed value",
                decl.default, decl.name, name
            )));
        }
        variants.push(decl);
    }

    let mut dependencies = Vec::with_capacity(file.depends_on.len());
    for entry in file.depends_on {
        let spec = named_spec(&entry.spec, "dependency", &name)?;
        if spec.name.as_deref() == Some(name.as_str()) {
            return Err(Error::ParseError(format!("Recipe {} depends on itself", name)));
        }
        let deptypes = match entry.deptype.as_deref() {
            Some(types) => DepTypes::parse(types)?,
            None => DepTypes::DEFAULT,
        };
        if deptypes.is_empty() {
            return Err(Error::ParseError(format!(
                "Dependency {} in recipe {} has an empty type",
                entry.spec, name
            )));
        }
        dependencies.push(DependencyDecl {
            spec,
            deptypes,
            when: condition(&name, entry.when.as_deref())?,
        });
    }

    let mut conflicts = Vec::with_capacity(file.conflicts.len());
    for entry in file.conflicts {
        conflicts.push(ConflictDecl {
            spec: condition(&name, Some(&entry.spec))?,
            when: condition(&name, entry.when.as_deref())?,
            msg: entry.msg,
        });
    }

    let mut provides = Vec::with_capacity(file.provides.len());
    for entry in file.provides {
        provides.push(ProvidesDecl {
            spec: named_spec(&entry.spec, "provided virtual", &name)?,
            when: condition(&name, entry.when.as_deref())?,
        });
    }

    Ok(RecipeDefinition {
        name,
        description: file.package.description,
        versions,
        variants,
        dependencies,
        conflicts,
        provides,
        build: BuildSteps {
            steps: file.build.steps,
            env: file.build.env,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HDF5: &str = r#"
[package]
name = "hdf5"
description = "Hierarchical data format"

[[versions]]
version = "1.14.3"
sha256 = "sha256:09cdb287aa7a89148c1638dd20891fdbae08102cf433ef128fd345338aa237c7"

[[versions]]
version = "1.12.2"
preferred = true

[[variants]]
name = "mpi"
default = true

[[variants]]
name = "api"
default = "default"
values = ["default", "v18", "v110"]

[[variants]]
name = "backends"
default = "serial"
values = ["serial", "threads"]
multi = true
when = "@1.14:"

[[depends_on]]
spec = "mpi@3:"
when = "+mpi"

[[depends_on]]
spec = "cmake@3.18:"
type = "build"

[[conflicts]]
spec = "%intel"
when = "@:1.12"
msg = "intel cannot build old releases"

[build]
steps = ["make install PREFIX=%(prefix)s"]
"#;

    #[test]
    fn test_parse_recipe() {
        let recipe = parse_recipe(HDF5).unwrap();
        assert_eq!(recipe.name, "hdf5");
        assert_eq!(recipe.versions.len(), 2);
        assert!(recipe.versions[0].sha256.is_some());
        assert!(recipe.versions[1].preferred);

        assert!(recipe.variant("mpi").unwrap().is_bool());
        assert_eq!(
            recipe.variant("backends").unwrap().default,
            VariantValue::multi(["serial"])
        );
        assert!(recipe.variant("backends").unwrap().when.name.is_none());

        assert_eq!(recipe.dependencies[0].target(), "mpi");
        assert_eq!(recipe.dependencies[0].deptypes, DepTypes::DEFAULT);
        assert_eq!(recipe.dependencies[1].deptypes, DepTypes::BUILD);
        assert_eq!(recipe.conflicts[0].msg.as_deref(), Some("intel cannot build old releases"));
        assert_eq!(recipe.build.steps.len(), 1);
    }

    #[test]
    fn test_rejects_bad_default() {
        let text = r#"
[package]
name = "x"
[[variants]]
name = "mode"
default = "fast"
values = ["slow"]
"#;
        assert!(parse_recipe(text).is_err());
    }

    #[test]
    fn test_rejects_unknown_fields_and_bad_checksums() {
        let unknown = "[package]\nname = \"x\"\nsummary = \"nope\"\n";
        assert!(parse_recipe(unknown).is_err());

        let checksum = "[package]\nname = \"x\"\n[[versions]]\nversion = \"1.0\"\nsha256 = \"abc\"\n";
        assert!(parse_recipe(checksum).is_err());
    }

    #[test]
    fn test_rejects_conditions_on_other_packages() {
        let text = r#"
[package]
name = "x"
[[depends_on]]
spec = "y"
when = "z+foo"
"#;
        assert!(parse_recipe(text).is_err());
    }

    #[test]
    fn test_rejects_duplicate_versions() {
        let text = "[package]\nname = \"x\"\n[[versions]]\nversion = \"1.0\"\n[[versions]]\nversion = \"1.0\"\n";
        assert!(parse_recipe(text).is_err());
    }
}
