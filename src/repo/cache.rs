// src/repo/cache.rs

//! Request-scoped memoization of repository lookups
//!
//! A [`RepoCache`] is built for one resolution, handed to the concretizer
//! by reference and dropped with it. Nothing is shared between requests.

use super::{Provider, RecipeDefinition, Repository};
use crate::error::{Error, Result};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub struct RepoCache<'a> {
    repo: &'a dyn Repository,
    recipes: RefCell<HashMap<String, Option<Arc<RecipeDefinition>>>>,
    providers: RefCell<HashMap<String, Arc<Vec<Provider>>>>,
    hits: Cell<u64>,
    misses: Cell<u64>,
}

impl<'a> RepoCache<'a> {
    pub fn new(repo: &'a dyn Repository) -> Self {
        Self {
            repo,
            recipes: RefCell::new(HashMap::new()),
            providers: RefCell::new(HashMap::new()),
            hits: Cell::new(0),
            misses: Cell::new(0),
        }
    }

    fn count(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.set(counter.get() + 1);
    }

    pub fn recipe(&self, name: &str) -> Option<Arc<RecipeDefinition>> {
        if let Some(cached) = self.recipes.borrow().get(name) {
            self.count(true);
            return cached.clone();
        }
        self.count(false);
        let recipe = self.repo.recipe(name);
        self.recipes
            .borrow_mut()
            .insert(name.to_string(), recipe.clone());
        recipe
    }

    pub fn require(&self, name: &str) -> Result<Arc<RecipeDefinition>> {
        self.recipe(name)
            .ok_or_else(|| Error::NotFound(format!("Unknown package: {}", name)))
    }

    pub fn providers(&self, virtual_name: &str) -> Arc<Vec<Provider>> {
        if let Some(cached) = self.providers.borrow().get(virtual_name) {
            self.count(true);
            return Arc::clone(cached);
        }
        self.count(false);
        let providers = Arc::new(self.repo.providers(virtual_name));
        self.providers
            .borrow_mut()
            .insert(virtual_name.to_string(), Arc::clone(&providers));
        providers
    }

    pub fn is_virtual(&self, name: &str) -> bool {
        self.recipe(name).is_none() && !self.providers(name).is_empty()
    }

    /// (hits, misses) so far
    pub fn stats(&self) -> (u64, u64) {
        (self.hits.get(), self.misses.get())
    }
}

impl Drop for RepoCache<'_> {
    fn drop(&mut self) {
        let (hits, misses) = self.stats();
        debug!("Repository cache released: {} hits, {} misses", hits, misses);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::InMemoryRepository;

    #[test]
    fn test_memoizes_lookups() {
        let mut repo = InMemoryRepository::new();
        repo.add_toml("[package]\nname = \"zlib\"\n[[versions]]\nversion = \"1.3\"\n")
            .unwrap();

        let cache = RepoCache::new(&repo);
        assert!(cache.recipe("zlib").is_some());
        assert!(cache.recipe("zlib").is_some());
        assert!(cache.recipe("missing").is_none());
        assert!(cache.recipe("missing").is_none());
        assert_eq!(cache.stats(), (2, 2));

        assert!(cache.providers("mpi").is_empty());
        assert!(!cache.is_virtual("mpi"));
        assert!(cache.require("missing").is_err());
    }
}
