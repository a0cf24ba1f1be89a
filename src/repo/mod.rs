// src/repo/mod.rs

//! Read-only access to package recipes
//!
//! The concretizer sees recipes only through the [`Repository`] trait:
//! versions, variants, dependency and conflict declarations, and the
//! providers of virtual packages. Recipes come from TOML files on disk
//! ([`DirectoryRepository`]), from memory ([`InMemoryRepository`], used by
//! tests and embedders), or from an ordered stack of both ([`RepoStack`]).
//!
//! A [`RepoCache`] memoizes lookups for the duration of one resolution.

mod cache;
pub mod condition;
pub mod format;
pub mod parser;
mod recipe;

pub use cache::RepoCache;
pub use condition::Truth;
pub use parser::{parse_recipe, parse_recipe_file};
pub use recipe::{
    BuildSteps, ConflictDecl, DependencyDecl, ProvidesDecl, RecipeDefinition, VariantDecl,
    VersionDecl,
};

use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A package that can stand in for a virtual
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    pub package: String,
    pub provides: ProvidesDecl,
}

/// Read-only view over recipe data
///
/// Implementations must be free of side effects so results can be cached.
pub trait Repository: Send + Sync {
    /// Recipe for a real package
    fn recipe(&self, name: &str) -> Option<Arc<RecipeDefinition>>;

    /// Every package name, sorted
    fn package_names(&self) -> Vec<String>;

    fn exists(&self, name: &str) -> bool {
        self.recipe(name).is_some()
    }

    fn require(&self, name: &str) -> Result<Arc<RecipeDefinition>> {
        self.recipe(name)
            .ok_or_else(|| Error::NotFound(format!("Unknown package: {}", name)))
    }

    /// Declared versions in declaration order
    fn versions(&self, name: &str) -> Result<Vec<VersionDecl>> {
        Ok(self.require(name)?.versions.clone())
    }

    fn variants(&self, name: &str) -> Result<Vec<VariantDecl>> {
        Ok(self.require(name)?.variants.clone())
    }

    fn dependencies(&self, name: &str) -> Result<Vec<DependencyDecl>> {
        Ok(self.require(name)?.dependencies.clone())
    }

    fn conflicts(&self, name: &str) -> Result<Vec<ConflictDecl>> {
        Ok(self.require(name)?.conflicts.clone())
    }

    /// Packages providing a virtual, sorted by package name then declaration order
    fn providers(&self, virtual_name: &str) -> Vec<Provider> {
        let mut providers = Vec::new();
        for name in self.package_names() {
            if let Some(recipe) = self.recipe(&name) {
                for decl in recipe.provides_for(virtual_name) {
                    providers.push(Provider {
                        package: name.clone(),
                        provides: decl.clone(),
                    });
                }
            }
        }
        providers
    }

    /// A name with providers and no recipe of its own
    fn is_virtual(&self, name: &str) -> bool {
        !self.exists(name) && !self.providers(name).is_empty()
    }
}

/// Recipes held in memory
#[derive(Debug, Default, Clone)]
pub struct InMemoryRepository {
    recipes: BTreeMap<String, Arc<RecipeDefinition>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a recipe
    pub fn add(&mut self, recipe: RecipeDefinition) {
        self.recipes.insert(recipe.name.clone(), Arc::new(recipe));
    }

    /// Parse and add a recipe written in the TOML recipe format
    pub fn add_toml(&mut self, content: &str) -> Result<()> {
        self.add(parse_recipe(content)?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}

impl FromIterator<RecipeDefinition> for InMemoryRepository {
    fn from_iter<I: IntoIterator<Item = RecipeDefinition>>(iter: I) -> Self {
        let mut repo = Self::new();
        for recipe in iter {
            repo.add(recipe);
        }
        repo
    }
}

impl Repository for InMemoryRepository {
    fn recipe(&self, name: &str) -> Option<Arc<RecipeDefinition>> {
        self.recipes.get(name).cloned()
    }

    fn package_names(&self) -> Vec<String> {
        self.recipes.keys().cloned().collect()
    }
}

/// Recipes loaded from `<root>/packages/<name>/package.toml`
#[derive(Debug, Clone)]
pub struct DirectoryRepository {
    root: PathBuf,
    recipes: InMemoryRepository,
}

impl DirectoryRepository {
    pub const RECIPE_FILE: &'static str = "package.toml";

    /// Load every recipe below `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let packages_dir = root.join("packages");
        if !packages_dir.is_dir() {
            return Err(Error::NotFound(format!(
                "Recipe repository {} has no packages/ directory",
                root.display()
            )));
        }

        let mut recipes = InMemoryRepository::new();
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&packages_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.join(Self::RECIPE_FILE).is_file())
            .collect();
        entries.sort();

        for dir in entries {
            let recipe = parse_recipe_file(&dir.join(Self::RECIPE_FILE))?;
            let dir_name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if recipe.name != dir_name {
                return Err(Error::ParseError(format!(
                    "Recipe in {} declares name '{}'",
                    dir.display(),
                    recipe.name
                )));
            }
            debug!("Loaded recipe {} from {}", recipe.name, dir.display());
            recipes.add(recipe);
        }

        info!("Loaded {} recipes from {}", recipes.len(), root.display());
        Ok(Self { root, recipes })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Repository for DirectoryRepository {
    fn recipe(&self, name: &str) -> Option<Arc<RecipeDefinition>> {
        self.recipes.recipe(name)
    }

    fn package_names(&self) -> Vec<String> {
        self.recipes.package_names()
    }
}

/// Several repositories searched in order; the first recipe found wins
#[derive(Default, Clone)]
pub struct RepoStack {
    repos: Vec<Arc<dyn Repository>>,
}

impl RepoStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, repo: Arc<dyn Repository>) {
        self.repos.push(repo);
    }

    /// Open every configured directory repository
    pub fn open_all(paths: &[PathBuf]) -> Result<Self> {
        let mut stack = Self::new();
        for path in paths {
            stack.push(Arc::new(DirectoryRepository::open(path)?));
        }
        Ok(stack)
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }
}

impl Repository for RepoStack {
    fn recipe(&self, name: &str) -> Option<Arc<RecipeDefinition>> {
        self.repos.iter().find_map(|repo| repo.recipe(name))
    }

    fn package_names(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .repos
            .iter()
            .flat_map(|repo| repo.package_names())
            .collect();
        names.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const OPENMPI: &str = r#"
[package]
name = "openmpi"
[[versions]]
version = "4.1.5"
[[versions]]
version = "3.1.6"
[[provides]]
spec = "mpi@:3.1"
when = "@4:"
[[provides]]
spec = "mpi@:3.0"
when = "@:3"
"#;

    const MPICH: &str = r#"
[package]
name = "mpich"
[[versions]]
version = "4.1"
[[provides]]
spec = "mpi@:4"
"#;

    fn repo() -> InMemoryRepository {
        let mut repo = InMemoryRepository::new();
        repo.add_toml(OPENMPI).unwrap();
        repo.add_toml(MPICH).unwrap();
        repo
    }

    #[test]
    fn test_contract_methods() {
        let repo = repo();
        assert_eq!(repo.versions("openmpi").unwrap().len(), 2);
        assert!(repo.variants("mpich").unwrap().is_empty());
        assert!(repo.dependencies("mpich").unwrap().is_empty());
        assert!(repo.conflicts("mpich").unwrap().is_empty());
        assert!(matches!(repo.versions("nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_providers_and_virtuals() {
        let repo = repo();
        let providers = repo.providers("mpi");
        let names: Vec<&str> = providers.iter().map(|p| p.package.as_str()).collect();
        assert_eq!(names, vec!["mpich", "openmpi", "openmpi"]);
        assert!(repo.is_virtual("mpi"));
        assert!(!repo.is_virtual("openmpi"));
        assert!(!repo.is_virtual("blas"));
    }

    #[test]
    fn test_directory_repository() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("packages").join("mpich");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("package.toml"), MPICH).unwrap();

        let repo = DirectoryRepository::open(dir.path()).unwrap();
        assert_eq!(repo.package_names(), vec!["mpich".to_string()]);
        assert!(repo.exists("mpich"));

        let wrong = dir.path().join("packages").join("openmpi");
        std::fs::create_dir_all(&wrong).unwrap();
        std::fs::write(wrong.join("package.toml"), MPICH).unwrap();
        assert!(DirectoryRepository::open(dir.path()).is_err());
    }

    #[test]
    fn test_missing_packages_dir() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            DirectoryRepository::open(dir.path()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_stack_first_wins() {
        let mut first = InMemoryRepository::new();
        first
            .add_toml("[package]\nname = \"mpich\"\n[[versions]]\nversion = \"9.9\"\n")
            .unwrap();

        let mut stack = RepoStack::new();
        stack.push(Arc::new(first));
        stack.push(Arc::new(repo()));

        assert_eq!(stack.versions("mpich").unwrap()[0].version.to_string(), "9.9");
        assert_eq!(stack.package_names(), vec!["mpich".to_string(), "openmpi".to_string()]);
        // the overriding mpich no longer provides mpi
        assert_eq!(stack.providers("mpi").len(), 2);
    }
}
