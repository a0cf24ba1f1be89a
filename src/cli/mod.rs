// src/cli/mod.rs
//! CLI definitions for spackle
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.
//!
//! - `install` - Concretize, then build and install spec(s)
//! - `concretize` - Print the resolved graph without building
//! - `uninstall` - Remove an installed spec by hash prefix or spec query
//! - `find` - List installed specs
//! - `completions` - Generate shell completion scripts

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "spackle")]
#[command(author = "Spackle Contributors")]
#[command(version)]
#[command(about = "Source-based package manager for HPC software", long_about = None)]
pub struct Cli {
    /// Configuration file (default: $SPACKLE_CONFIG, then the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Show debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only show warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build and install spec(s) and their dependencies
    Install {
        /// Spec strings, e.g. `hdf5@1.14 +mpi ^openmpi`
        #[arg(required = true)]
        specs: Vec<String>,

        /// Parallel builds (default: [build] jobs, or available cores)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Keep stage directories after successful builds
        #[arg(long)]
        keep_stage: bool,

        /// Show what would be built without building
        #[arg(long)]
        dry_run: bool,

        /// Ignore installed specs when concretizing
        #[arg(long)]
        fresh: bool,
    },

    /// Resolve spec(s) and print the concrete graph
    Concretize {
        #[arg(required = true)]
        specs: Vec<String>,

        /// Show full hashes
        #[arg(short, long)]
        long: bool,

        /// Ignore installed specs when concretizing
        #[arg(long)]
        fresh: bool,
    },

    /// Remove an installed spec
    Uninstall {
        /// `/hashprefix` or a spec query
        query: String,

        /// Also remove everything that depends on it
        #[arg(long)]
        dependents: bool,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// List installed specs
    Find {
        /// Optional spec query
        query: Option<String>,

        /// Only specs installed on request
        #[arg(short, long)]
        explicit: bool,
    },

    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_install() {
        let cli = Cli::try_parse_from(["spackle", "install", "hdf5+mpi", "-j", "8", "--dry-run"])
            .unwrap();
        match cli.command {
            Commands::Install {
                specs, jobs, dry_run, ..
            } => {
                assert_eq!(specs, vec!["hdf5+mpi"]);
                assert_eq!(jobs, Some(8));
                assert!(dry_run);
            }
            _ => panic!("expected install"),
        }
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["spackle", "-v", "-q", "find"]).is_err());
    }
}
