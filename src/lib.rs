// src/lib.rs

//! Spackle: source-based package management for HPC sites
//!
//! Turns partially specified package requests into fully determined
//! dependency graphs, then builds and installs them side by side.
//!
//! # Architecture
//!
//! - Specs: abstract requests (`hdf5@1.14 +mpi %gcc ^zlib@1.3`) and concrete
//!   graphs where every field is decided
//! - Repository: static recipe data, read-only, cached per request
//! - Concretizer: backtracking search with checkpoint/restore, ordering
//!   candidates by reuse, site preferences, then recipe defaults
//! - Hashing: a Merkle hash per concrete node keys install paths and the
//!   database; a change anywhere below a node changes its hash
//! - Installer: parallel DAG builds through an injected build callback,
//!   with per-node durable success and blocked-dependent reporting
//! - Database: SQLite under a cross-process lock, with in-progress claims
//!   so two processes never build the same hash at once

pub mod build;
pub mod concretize;
pub mod config;
pub mod db;
mod error;
pub mod hash;
pub mod progress;
pub mod repo;
pub mod spec;
pub mod version;

pub use build::{
    BuildCallback, BuildError, BuildFailureReport, InstallLayout, InstallOptions, InstallReport,
    Installer, NodeOutcome, ScriptBuilder,
};
pub use concretize::{ConcretizeOptions, Concretizer, InstalledLookup, ResolutionFailure};
pub use config::{Config, Preferences};
pub use db::{InstallDatabase, InstallRecord};
pub use error::{Error, Result};
pub use hash::Hash;
pub use progress::{
    CallbackProgress, CliProgress, LogProgress, ProgressEvent, ProgressTracker, SilentProgress,
};
pub use repo::{InMemoryRepository, RecipeDefinition, RepoCache, Repository};
pub use spec::{AbstractSpec, ConcreteGraph, ConcreteNode, ConcreteSpec};
pub use version::{Version, VersionConstraint};
