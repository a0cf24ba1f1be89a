// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use commands::{Session, UsageError};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const EXIT_FAILED: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_UNSATISFIABLE: u8 = 3;
const EXIT_ERROR: u8 = 4;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "spackle", &mut std::io::stdout());
        return Ok(());
    }

    let session = Session::open(cli.config.as_deref())?;
    match cli.command {
        Commands::Install {
            specs,
            jobs,
            keep_stage,
            dry_run,
            fresh,
        } => commands::cmd_install(&session, &specs, jobs, keep_stage, dry_run, fresh, cli.quiet),
        Commands::Concretize { specs, long, fresh } => {
            commands::cmd_concretize(&session, &specs, long, fresh)
        }
        Commands::Uninstall {
            query,
            dependents,
            yes,
        } => commands::cmd_uninstall(&session, &query, dependents, yes),
        Commands::Find { query, explicit } => {
            commands::cmd_find(&session, query.as_deref(), explicit)
        }
        Commands::Completions { .. } => Ok(()),
    }
}

fn exit_code(e: &anyhow::Error) -> u8 {
    if e.downcast_ref::<UsageError>().is_some() {
        return EXIT_USAGE;
    }
    match e.downcast_ref::<spackle::Error>() {
        Some(spackle::Error::BuildFailed(_) | spackle::Error::Cancelled) => EXIT_FAILED,
        Some(spackle::Error::ParseError(_)) => EXIT_USAGE,
        Some(spackle::Error::Unsatisfiable(_) | spackle::Error::NotFound(_)) => EXIT_UNSATISFIABLE,
        _ => EXIT_ERROR,
    }
}
