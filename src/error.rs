// src/error.rs

//! Error types shared across the spackle library

use crate::build::BuildFailureReport;
use crate::concretize::ResolutionFailure;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the spackle engine
#[derive(Error, Debug)]
pub enum Error {
    /// The concretizer exhausted every candidate
    #[error("{0}")]
    Unsatisfiable(Box<ResolutionFailure>),

    /// One or more build callbacks failed
    #[error("{0}")]
    BuildFailed(Box<BuildFailureReport>),

    /// Another process held the database lock for too long
    #[error("Timed out acquiring database lock {path} after {attempts} attempts")]
    DatabaseLockTimeout { path: PathBuf, attempts: u32 },

    /// A record for this hash already exists
    #[error("Spec {0} is already installed")]
    AlreadyInstalled(String),

    /// Removal refused while other installs still depend on the record
    #[error("Cannot remove {hash}: still required by {ref_count} installed spec(s): {}", dependents.join(", "))]
    StillReferenced {
        hash: String,
        ref_count: i64,
        dependents: Vec<String>,
    },

    /// The operation was cancelled before it completed
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e.to_string())
    }
}

impl From<ResolutionFailure> for Error {
    fn from(failure: ResolutionFailure) -> Self {
        Error::Unsatisfiable(Box::new(failure))
    }
}

impl From<BuildFailureReport> for Error {
    fn from(report: BuildFailureReport) -> Self {
        Error::BuildFailed(Box::new(report))
    }
}
