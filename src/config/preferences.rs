// src/config/preferences.rs

//! Typed preferences consulted by the concretizer

use super::{CompilerPaths, Config};
use crate::error::{Error, Result};
use crate::spec::{AbstractSpec, Arch, CompilerConstraint, CompilerSpec, VariantValue};
use crate::version::{Version, VersionConstraint};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Section name whose settings apply to every package
pub const ALL_PACKAGES: &str = "all";

/// A compiler builds may use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableCompiler {
    pub spec: CompilerSpec,
    pub operating_system: Option<String>,
    pub paths: CompilerPaths,
}

impl AvailableCompiler {
    pub fn new(spec: CompilerSpec) -> Self {
        Self {
            spec,
            operating_system: None,
            paths: CompilerPaths::default(),
        }
    }

    pub fn usable_on(&self, arch: &Arch) -> bool {
        self.operating_system.as_ref().is_none_or(|os| *os == arch.os)
    }
}

/// A package provided by the site at a fixed prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct External {
    /// Named spec with an exact version
    pub spec: AbstractSpec,
    pub prefix: PathBuf,
}

impl External {
    pub fn version(&self) -> Option<&Version> {
        self.spec.versions.concrete()
    }
}

/// Preferences for one package (or for `all`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackagePreferences {
    pub versions: Vec<VersionConstraint>,
    pub variants: BTreeMap<String, VariantValue>,
    pub compilers: Vec<CompilerConstraint>,
    pub providers: BTreeMap<String, Vec<String>>,
    pub buildable: Option<bool>,
    pub externals: Vec<External>,
}

/// Everything the concretizer takes from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preferences {
    compilers: Vec<AvailableCompiler>,
    default_arch: Arch,
    packages: BTreeMap<String, PackagePreferences>,
}

fn rank<T>(lists: [Option<&Vec<T>>; 2], matches: impl Fn(&T) -> bool) -> Option<usize> {
    let mut offset = 0;
    for list in lists.into_iter().flatten() {
        if let Some(pos) = list.iter().position(&matches) {
            return Some(offset + pos);
        }
        offset += list.len();
    }
    None
}

impl Preferences {
    pub fn new(compilers: Vec<AvailableCompiler>, default_arch: Arch) -> Self {
        Self {
            compilers,
            default_arch,
            packages: BTreeMap::new(),
        }
    }

    /// Set the preferences of one package, or of `all`
    pub fn with_package(mut self, name: impl Into<String>, prefs: PackagePreferences) -> Self {
        self.packages.insert(name.into(), prefs);
        self
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let mut compilers = Vec::with_capacity(config.compilers.len());
        for entry in &config.compilers {
            let spec = CompilerSpec::parse(&entry.spec)
                .map_err(|e| Error::Config(format!("compilers: {}", e)))?;
            if compilers.iter().any(|c: &AvailableCompiler| {
                c.spec == spec && c.operating_system == entry.operating_system
            }) {
                return Err(Error::Config(format!("compiler {} is listed twice", spec)));
            }
            compilers.push(AvailableCompiler {
                spec,
                operating_system: entry.operating_system.clone(),
                paths: entry.paths.clone(),
            });
        }

        let mut packages = BTreeMap::new();
        for (name, section) in &config.packages {
            let context = |e: Error| Error::Config(format!("packages.{}: {}", name, e));

            let versions = section
                .version
                .iter()
                .map(|v| VersionConstraint::parse(v))
                .collect::<Result<Vec<_>>>()
                .map_err(context)?;

            let variants = match &section.variants {
                Some(text) => {
                    let spec = AbstractSpec::parse(text).map_err(context)?;
                    if spec.name.is_some() || !spec.dependencies.is_empty() {
                        return Err(Error::Config(format!(
                            "packages.{}: variants must only list variant values",
                            name
                        )));
                    }
                    spec.variants
                }
                None => BTreeMap::new(),
            };

            let compiler_prefs = section
                .compiler
                .iter()
                .map(|c| CompilerConstraint::parse(c))
                .collect::<Result<Vec<_>>>()
                .map_err(context)?;

            let mut externals = Vec::with_capacity(section.externals.len());
            for entry in &section.externals {
                let spec = AbstractSpec::parse(&entry.spec).map_err(context)?;
                if spec.name.as_deref() != Some(name.as_str()) {
                    return Err(Error::Config(format!(
                        "packages.{}: external '{}' must name {}",
                        name, entry.spec, name
                    )));
                }
                if spec.versions.concrete().is_none() {
                    return Err(Error::Config(format!(
                        "packages.{}: external '{}' needs an exact version",
                        name, entry.spec
                    )));
                }
                externals.push(External {
                    spec,
                    prefix: entry.prefix.clone(),
                });
            }

            packages.insert(
                name.clone(),
                PackagePreferences {
                    versions,
                    variants,
                    compilers: compiler_prefs,
                    providers: section.providers.clone(),
                    buildable: section.buildable,
                    externals,
                },
            );
        }

        Ok(Self {
            compilers,
            default_arch: config.arch.resolve(),
            packages,
        })
    }

    fn package(&self, name: &str) -> Option<&PackagePreferences> {
        self.packages.get(name)
    }

    fn all(&self) -> Option<&PackagePreferences> {
        self.packages.get(ALL_PACKAGES)
    }

    pub fn compilers(&self) -> &[AvailableCompiler] {
        &self.compilers
    }

    pub fn compiler(&self, spec: &CompilerSpec) -> Option<&AvailableCompiler> {
        self.compilers.iter().find(|c| c.spec == *spec)
    }

    pub fn default_arch(&self) -> &Arch {
        &self.default_arch
    }

    /// Position of the first preferred version constraint matching `version`
    pub fn version_rank(&self, package: &str, version: &Version) -> Option<usize> {
        rank(
            [
                self.package(package).map(|p| &p.versions),
                self.all().map(|p| &p.versions),
            ],
            |c| c.satisfies(version),
        )
    }

    /// Position of the first preferred compiler constraint matching `compiler`
    pub fn compiler_rank(&self, package: &str, compiler: &CompilerSpec) -> Option<usize> {
        rank(
            [
                self.package(package).map(|p| &p.compilers),
                self.all().map(|p| &p.compilers),
            ],
            |c| c.satisfied_by(compiler),
        )
    }

    /// Position of a provider in the preferred list for a virtual
    pub fn provider_rank(&self, virtual_name: &str, provider: &str) -> Option<usize> {
        rank(
            [
                self.package(virtual_name)
                    .and_then(|p| p.providers.get(virtual_name)),
                self.all().and_then(|p| p.providers.get(virtual_name)),
            ],
            |p| p == provider,
        )
    }

    /// Preferred variant values; package settings override `all`
    pub fn variant_preferences(&self, package: &str) -> BTreeMap<String, VariantValue> {
        let mut merged = self.all().map(|p| p.variants.clone()).unwrap_or_default();
        if let Some(prefs) = self.package(package) {
            merged.extend(prefs.variants.clone());
        }
        merged
    }

    pub fn is_buildable(&self, package: &str) -> bool {
        self.package(package)
            .and_then(|p| p.buildable)
            .or_else(|| self.all().and_then(|p| p.buildable))
            .unwrap_or(true)
    }

    pub fn externals(&self, package: &str) -> &[External] {
        self.package(package)
            .map(|p| p.externals.as_slice())
            .unwrap_or_default()
    }
}
