// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use spackle::build::{BuildCallback, BuildError, BuildRequest};
use spackle::config::{AvailableCompiler, LocksSection};
use spackle::spec::{Arch, CompilerSpec};
use spackle::{
    AbstractSpec, ConcreteGraph, Concretizer, InMemoryRepository, InstallDatabase, InstallLayout,
    InstallOptions, Installer, Preferences, RepoCache,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const LIBFOO: &str = r#"
[package]
name = "libfoo"
[[versions]]
version = "1.0"
[[versions]]
version = "2.0"
[[variants]]
name = "shared"
default = true
"#;

pub const APP: &str = r#"
[package]
name = "app"
[[versions]]
version = "1.0"
[[depends_on]]
spec = "libfoo@1.0:1.5"
"#;

pub const ZLIB: &str = r#"
[package]
name = "zlib"
[[versions]]
version = "1.2.13"
[[versions]]
version = "1.3"
"#;

pub const MPICH: &str = r#"
[package]
name = "mpich"
[[versions]]
version = "4.1"
[[provides]]
spec = "mpi@3"
[[depends_on]]
spec = "zlib"
"#;

pub const HDF5: &str = r#"
[package]
name = "hdf5"
[[versions]]
version = "1.14.3"
[[variants]]
name = "mpi"
default = true
[[depends_on]]
spec = "mpi"
when = "+mpi"
[[depends_on]]
spec = "zlib@1.2:"
"#;

pub fn repo(recipes: &[&str]) -> InMemoryRepository {
    let mut repo = InMemoryRepository::new();
    for recipe in recipes {
        repo.add_toml(recipe).unwrap();
    }
    repo
}

pub fn prefs() -> Preferences {
    Preferences::new(
        vec![AvailableCompiler::new(CompilerSpec::parse("gcc@11.4.0").unwrap())],
        Arch::new("linux", "ubuntu22.04", "x86_64"),
    )
}

/// Concretize spec strings against a set of recipes
pub fn concretize(recipes: &[&str], specs: &[&str]) -> spackle::Result<ConcreteGraph> {
    let repo = repo(recipes);
    let cache = RepoCache::new(&repo);
    let prefs = prefs();
    let roots: Vec<AbstractSpec> = specs.iter().map(|s| AbstractSpec::parse(s).unwrap()).collect();
    Concretizer::new(&cache, &prefs).concretize(&roots)
}

/// Records every build request and fails the packages it was told to
pub struct RecordingBuilder {
    built: Mutex<Vec<String>>,
    fail: Vec<String>,
}

impl RecordingBuilder {
    pub fn new(fail: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            built: Mutex::new(Vec::new()),
            fail: fail.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn built(&self) -> Vec<String> {
        self.built.lock().unwrap().clone()
    }
}

impl BuildCallback for RecordingBuilder {
    fn build(&self, request: &BuildRequest<'_>) -> Result<(), BuildError> {
        let name = request.spec.name().to_string();
        self.built.lock().unwrap().push(name.clone());
        if self.fail.contains(&name) {
            return Err(BuildError::new(format!("{} does not compile", name)));
        }
        std::fs::create_dir_all(request.prefix.join("lib")).map_err(|e| BuildError::new(e.to_string()))?;
        Ok(())
    }
}

/// Sleeps through every build and counts how often it was invoked
pub struct SlowBuilder {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowBuilder {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BuildCallback for SlowBuilder {
    fn build(&self, request: &BuildRequest<'_>) -> Result<(), BuildError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        std::fs::create_dir_all(request.prefix.join("lib")).map_err(|e| BuildError::new(e.to_string()))?;
        Ok(())
    }
}

/// A database, install root and stage directory under one temp dir
pub struct Site {
    pub dir: TempDir,
    pub db: InstallDatabase,
    pub layout: InstallLayout,
}

impl Site {
    pub fn new() -> Self {
        Self::with_locks(LocksSection::default())
    }

    /// A site whose in-progress markers go stale after `secs`
    pub fn with_claim_timeout(secs: u64) -> Self {
        Self::with_locks(LocksSection {
            in_progress_timeout_secs: secs,
            ..LocksSection::default()
        })
    }

    fn with_locks(locks: LocksSection) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = InstallDatabase::open(dir.path().join("db/spackle.db"), locks).unwrap();
        let layout = InstallLayout::new(dir.path().join("opt"));
        Self { dir, db, layout }
    }

    pub fn options(&self, jobs: usize) -> InstallOptions {
        let mut options = InstallOptions::new(self.dir.path().join("stage")).with_jobs(jobs);
        options.poll_interval = Duration::from_millis(10);
        options
    }

    pub fn installer(&self, callback: Arc<dyn BuildCallback>, jobs: usize) -> Installer {
        Installer::new(self.db.clone(), self.layout.clone(), callback, self.options(jobs))
    }
}
