// src/commands/mod.rs
//! Command handlers for the spackle CLI

mod concretize;
mod find;
mod install;
mod uninstall;

pub use concretize::cmd_concretize;
pub use find::cmd_find;
pub use install::cmd_install;
pub use uninstall::cmd_uninstall;

use anyhow::{Context, Result};
use spackle::build::InstallLayout;
use spackle::concretize::{ConcretizeOptions, Concretizer};
use spackle::repo::{RepoCache, RepoStack};
use spackle::{AbstractSpec, Config, ConcreteGraph, InstallDatabase, Preferences};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// A request the user has to rephrase; exits with the usage status
#[derive(Debug, Error)]
#[error("{0}")]
pub struct UsageError(pub String);

/// Everything a command needs, built from the configuration
pub struct Session {
    pub config: Config,
    pub prefs: Preferences,
    pub repo: Arc<RepoStack>,
    pub db: InstallDatabase,
    pub layout: InstallLayout,
}

impl Session {
    pub fn open(config_path: Option<&Path>) -> Result<Self> {
        let config = Config::load(config_path)?;
        let prefs = config.preferences()?;
        let repo = RepoStack::open_all(&config.paths.repos)?;
        if repo.is_empty() {
            debug!("No recipe repositories configured");
        }
        let db = InstallDatabase::open(&config.paths.database, config.locks.clone())
            .with_context(|| {
                format!("Failed to open database {}", config.paths.database.display())
            })?;
        let layout = InstallLayout::new(&config.paths.install_root);
        Ok(Self {
            config,
            prefs,
            repo: Arc::new(repo),
            db,
            layout,
        })
    }

    /// Concretize spec strings together into one graph
    pub fn concretize(&self, specs: &[String], fresh: bool) -> Result<ConcreteGraph> {
        let roots = specs
            .iter()
            .map(|s| AbstractSpec::parse(s))
            .collect::<spackle::Result<Vec<_>>>()?;
        let cache = RepoCache::new(self.repo.as_ref());
        let options = ConcretizeOptions {
            reuse: !fresh,
            ..ConcretizeOptions::default()
        };
        let graph = Concretizer::new(&cache, &self.prefs)
            .with_installed(&self.db)
            .with_options(options)
            .concretize(&roots)?;
        Ok(graph)
    }
}

/// Ask a yes/no question on stdin; anything but `y`/`yes` is no
fn confirm(prompt: &str) -> Result<bool> {
    use std::io::Write;

    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    let answer = answer.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}
