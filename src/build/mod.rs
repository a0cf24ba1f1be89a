// src/build/mod.rs

//! Building and installing concrete graphs
//!
//! - [`BuildGraph`]: dependency order and blocked-dependent tracking
//! - [`InstallLayout`]: where each hash is installed
//! - [`BuildEnvironment`]: per-node variables from direct dependencies
//! - [`BuildCallback`]: the injected capability that performs a build
//! - [`Installer`]: the parallel orchestrator
//! - [`InstallReport`] / [`BuildFailureReport`]: per-node outcomes

pub mod callback;
pub mod environment;
pub mod graph;
pub mod layout;
mod orchestrator;
pub mod report;

pub use callback::{BuildCallback, BuildError, BuildRequest, CallbackSet, ScriptBuilder};
pub use environment::BuildEnvironment;
pub use graph::BuildGraph;
pub use layout::InstallLayout;
pub use orchestrator::{InstallOptions, Installer, PlanStatus, PlannedNode};
pub use report::{BuildFailureReport, FailedNode, InstallReport, NodeOutcome, NodeReport};
