// src/concretize/conflict.rs

//! Conflict types for concretization
//!
//! A [`Conflict`] explains why one branch of the search was abandoned. It
//! drives backtracking and is only shown to users when it belongs to the
//! deepest path explored before the search gave up, in which case it is
//! carried by a [`ResolutionFailure`].

use std::fmt;

/// Why a partial assignment could not be extended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// Requirements on one field of a package cannot all hold
    ConflictingConstraints {
        package: String,
        field: String,
        constraints: Vec<(String, String)>, // (requirer, constraint)
    },
    /// A package was already decided and does not meet a new requirement
    UnsatisfiedRequirement {
        package: String,
        chosen: String,
        required_constraint: String,
        required_by: String,
    },
    /// A recipe declares the combination unbuildable
    RecipeConflict {
        package: String,
        chosen: String,
        spec: String,
        msg: Option<String>,
    },
    /// A variant the recipe does not declare, or a value it does not allow
    InvalidVariant {
        package: String,
        variant: String,
        reason: String,
    },
    /// Circular dependency detected
    CircularDependency { cycle: Vec<String> },
    /// Package is missing from every repository and is not a virtual
    MissingPackage {
        package: String,
        required_by: Vec<String>,
    },
    /// No provider of a virtual meets its requirements
    NoProvider {
        virtual_name: String,
        constraint: String,
        required_by: Vec<String>,
    },
    /// No version, variant and compiler combination meets the constraint
    NoCandidates { package: String, constraint: String, reason: String },
    /// A `^name` requirement that nothing in the graph depends on
    UnusedRequirement { package: String, required_by: String },
    /// The search gave up after too many steps
    StepLimit { steps: usize },
}

impl Conflict {
    /// Packages named by this conflict
    pub fn packages(&self) -> Vec<&str> {
        match self {
            Conflict::ConflictingConstraints { package, .. }
            | Conflict::UnsatisfiedRequirement { package, .. }
            | Conflict::RecipeConflict { package, .. }
            | Conflict::InvalidVariant { package, .. }
            | Conflict::MissingPackage { package, .. }
            | Conflict::NoCandidates { package, .. }
            | Conflict::UnusedRequirement { package, .. } => vec![package.as_str()],
            Conflict::NoProvider { virtual_name, .. } => vec![virtual_name.as_str()],
            Conflict::CircularDependency { cycle } => cycle.iter().map(String::as_str).collect(),
            Conflict::StepLimit { .. } => Vec::new(),
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::ConflictingConstraints {
                package,
                field,
                constraints,
            } => {
                writeln!(f, "Conflicting {} requirements for package {}:", field, package)?;
                for (requirer, constraint) in constraints {
                    writeln!(f, "  - {} requires {}", requirer, constraint)?;
                }
                Ok(())
            }
            Conflict::UnsatisfiedRequirement {
                package,
                chosen,
                required_constraint,
                required_by,
            } => writeln!(
                f,
                "Package {} was concretized to {}, which does not satisfy {} required by {}",
                package, chosen, required_constraint, required_by
            ),
            Conflict::RecipeConflict {
                package,
                chosen,
                spec,
                msg,
            } => {
                write!(f, "Package {} conflicts with '{}' ({})", package, spec, chosen)?;
                match msg {
                    Some(msg) => writeln!(f, ": {}", msg),
                    None => writeln!(f),
                }
            }
            Conflict::InvalidVariant {
                package,
                variant,
                reason,
            } => writeln!(f, "Invalid variant {} for package {}: {}", variant, package, reason),
            Conflict::CircularDependency { cycle } => {
                writeln!(f, "Circular dependency: {}", cycle.join(" -> "))
            }
            Conflict::MissingPackage {
                package,
                required_by,
            } => writeln!(
                f,
                "Missing package {} required by {}",
                package,
                required_by.join(", ")
            ),
            Conflict::NoProvider {
                virtual_name,
                constraint,
                required_by,
            } => writeln!(
                f,
                "No provider of {} satisfies {} (required by {})",
                virtual_name,
                constraint,
                required_by.join(", ")
            ),
            Conflict::NoCandidates {
                package,
                constraint,
                reason,
            } => writeln!(f, "No candidate for {} satisfies {}: {}", package, constraint, reason),
            Conflict::UnusedRequirement {
                package,
                required_by,
            } => writeln!(
                f,
                "{} was required by {} but nothing in the graph depends on it",
                package, required_by
            ),
            Conflict::StepLimit { steps } => {
                writeln!(f, "Search abandoned after {} steps", steps)
            }
        }
    }
}

/// Concretization failed; carries the conflicts of the deepest path explored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionFailure {
    pub roots: Vec<String>,
    pub conflicts: Vec<Conflict>,
    /// Candidate applications attempted
    pub steps: usize,
}

impl ResolutionFailure {
    /// True if any conflict names the package
    pub fn mentions(&self, package: &str) -> bool {
        self.conflicts
            .iter()
            .any(|c| c.packages().contains(&package))
    }
}

impl fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Unable to concretize {}", self.roots.join(", "))?;
        for conflict in &self.conflicts {
            write!(f, "{}", conflict)?;
        }
        Ok(())
    }
}

impl std::error::Error for ResolutionFailure {}
