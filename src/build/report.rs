// src/build/report.rs

//! Install outcomes
//!
//! Each node of an install ends in exactly one [`NodeOutcome`]. Success is
//! durable per node: a failure elsewhere in the graph never rolls back a
//! completed install, so the report can mix installed and failed nodes.

use crate::error::{Error, Result};
use crate::hash::Hash;
use std::fmt;
use std::path::PathBuf;

/// What happened to one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Built and recorded by this run
    Installed { prefix: PathBuf },
    /// Already recorded before this run reached it
    Reused { prefix: PathBuf },
    /// Site-provided; recorded without building
    External { prefix: PathBuf },
    /// The build callback failed
    Failed { message: String },
    /// Not attempted because a dependency failed
    Blocked { by: String },
    /// Not attempted, or discarded, because the install was cancelled
    Cancelled,
}

impl NodeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            NodeOutcome::Installed { .. } | NodeOutcome::Reused { .. } | NodeOutcome::External { .. }
        )
    }

    pub fn prefix(&self) -> Option<&PathBuf> {
        match self {
            NodeOutcome::Installed { prefix }
            | NodeOutcome::Reused { prefix }
            | NodeOutcome::External { prefix } => Some(prefix),
            _ => None,
        }
    }
}

impl fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeOutcome::Installed { prefix } => write!(f, "installed {}", prefix.display()),
            NodeOutcome::Reused { prefix } => write!(f, "already installed {}", prefix.display()),
            NodeOutcome::External { prefix } => write!(f, "external {}", prefix.display()),
            NodeOutcome::Failed { message } => write!(f, "failed: {}", message),
            NodeOutcome::Blocked { by } => write!(f, "blocked by {}", by),
            NodeOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of one node, with its identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    pub name: String,
    pub hash: Hash,
    pub outcome: NodeOutcome,
}

/// Outcomes of every node, in build order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub nodes: Vec<NodeReport>,
}

impl InstallReport {
    pub fn outcome(&self, name: &str) -> Option<&NodeOutcome> {
        self.nodes.iter().find(|n| n.name == name).map(|n| &n.outcome)
    }

    pub fn is_success(&self) -> bool {
        self.nodes.iter().all(|n| n.outcome.is_success())
    }

    pub fn was_cancelled(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| matches!(n.outcome, NodeOutcome::Cancelled))
    }

    /// Names of the nodes this run built
    pub fn built(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.outcome, NodeOutcome::Installed { .. }))
            .map(|n| n.name.as_str())
            .collect()
    }

    /// `BuildFailed` if any build failed, `Cancelled` if the run was cut short
    pub fn into_result(self) -> Result<Self> {
        if let Some(failure) = self.failure_report() {
            return Err(failure.into());
        }
        if self.was_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(self)
    }

    /// Summarize the failures, if any
    pub fn failure_report(&self) -> Option<BuildFailureReport> {
        let failures: Vec<FailedNode> = self
            .nodes
            .iter()
            .filter_map(|n| match &n.outcome {
                NodeOutcome::Failed { message } => Some(FailedNode {
                    name: n.name.clone(),
                    hash: n.hash.clone(),
                    message: message.clone(),
                    blocked: self
                        .nodes
                        .iter()
                        .filter(|b| matches!(&b.outcome, NodeOutcome::Blocked { by } if *by == n.name))
                        .map(|b| b.name.clone())
                        .collect(),
                }),
                _ => None,
            })
            .collect();
        if failures.is_empty() {
            return None;
        }
        Some(BuildFailureReport {
            failures,
            succeeded: self
                .nodes
                .iter()
                .filter(|n| n.outcome.is_success())
                .map(|n| n.name.clone())
                .collect(),
            cancelled: self
                .nodes
                .iter()
                .filter(|n| matches!(n.outcome, NodeOutcome::Cancelled))
                .map(|n| n.name.clone())
                .collect(),
        })
    }
}

/// One failed build and the nodes it blocked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedNode {
    pub name: String,
    pub hash: Hash,
    pub message: String,
    /// Transitive dependents that were not attempted
    pub blocked: Vec<String>,
}

/// Aggregate report carried by `Error::BuildFailed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFailureReport {
    pub failures: Vec<FailedNode>,
    /// Nodes that are installed despite the failure
    pub succeeded: Vec<String>,
    pub cancelled: Vec<String>,
}

impl BuildFailureReport {
    /// Every node that could not proceed because of a failure
    pub fn blocked(&self) -> impl Iterator<Item = &str> {
        self.failures
            .iter()
            .flat_map(|f| f.blocked.iter().map(String::as_str))
    }
}

impl fmt::Display for BuildFailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.failures.len() == 1 { "build" } else { "builds" };
        write!(f, "{} {} failed", self.failures.len(), noun)?;
        for failure in &self.failures {
            write!(f, "\n  {}/{}: {}", failure.name, failure.hash.short(), failure.message)?;
            if !failure.blocked.is_empty() {
                write!(f, "\n    blocked: {}", failure.blocked.join(", "))?;
            }
        }
        if !self.cancelled.is_empty() {
            write!(f, "\n  cancelled: {}", self.cancelled.join(", "))?;
        }
        if !self.succeeded.is_empty() {
            write!(f, "\n  installed: {}", self.succeeded.join(", "))?;
        }
        Ok(())
    }
}
