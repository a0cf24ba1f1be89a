// src/commands/install.rs
//! Concretize spec strings, then build whatever is missing

use super::Session;
use anyhow::{Context, Result};
use signal_hook::SigId;
use signal_hook::consts::{SIGINT, SIGTERM};
use spackle::build::{InstallOptions, Installer, NodeOutcome, PlanStatus, ScriptBuilder};
use spackle::progress::{CliProgress, LogProgress, ProgressTracker, SilentProgress};
use std::io::IsTerminal;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{debug, info};

/// Non-terminal progress logs about this many lines per install
const LOG_LINES: u64 = 10;

pub fn cmd_install(
    session: &Session,
    specs: &[String],
    jobs: Option<usize>,
    keep_stage: bool,
    dry_run: bool,
    fresh: bool,
    quiet: bool,
) -> Result<()> {
    let graph = session.concretize(specs, fresh)?;

    let options = InstallOptions::new(&session.config.paths.stage_root)
        .with_jobs(jobs.unwrap_or_else(|| session.config.build.jobs()))
        .with_keep_stage(keep_stage || session.config.build.keep_stage);
    let callback = Arc::new(ScriptBuilder::new(session.repo.clone()));
    let installer = Installer::new(session.db.clone(), session.layout.clone(), callback, options)
        .with_compilers(session.prefs.compilers().to_vec());

    if dry_run {
        for node in installer.plan(&graph)? {
            let marker = match node.status {
                PlanStatus::Installed => "[+]",
                PlanStatus::External => "[e]",
                PlanStatus::Build => " - ",
            };
            println!(
                "{}  {}  {:<24} {}",
                marker,
                node.hash.short(),
                node.name,
                node.prefix.display()
            );
        }
        return Ok(());
    }

    let progress: Arc<dyn ProgressTracker> = if quiet {
        Arc::new(SilentProgress::new())
    } else if std::io::stderr().is_terminal() {
        Arc::new(CliProgress::new("Installing", graph.len() as u64))
    } else {
        let length = graph.len() as u64;
        Arc::new(LogProgress::new("install", length).with_log_interval((length / LOG_LINES).max(1)))
    };
    let installer = installer.with_progress(progress);

    let signals = cancel_on_signals(&installer.cancel_handle())?;
    let result = installer.install(&graph);
    for id in signals {
        signal_hook::low_level::unregister(id);
    }
    let report = result?;
    let built = report.built();
    info!("Built {} package(s)", built.len());
    for node in &report.nodes {
        if let NodeOutcome::Installed { prefix } = &node.outcome {
            println!("{}  {}  {}", node.hash.short(), node.name, prefix.display());
        }
    }
    for root in graph.roots() {
        if let Some(prefix) = report.outcome(root).and_then(|o| o.prefix()) {
            println!("{} is installed at {}", root, prefix.display());
        }
    }
    Ok(())
}

/// Route SIGINT and SIGTERM to the installer's cancel flag
///
/// The install then winds down through its normal cancel path, which
/// releases in-progress markers and discards partial prefixes.
fn cancel_on_signals(cancel: &Arc<AtomicBool>) -> Result<Vec<SigId>> {
    let mut ids = Vec::new();
    for signal in [SIGINT, SIGTERM] {
        let id = signal_hook::flag::register(signal, Arc::clone(cancel))
            .with_context(|| format!("Failed to register handler for signal {}", signal))?;
        ids.push(id);
    }
    debug!("Cancelling install on SIGINT or SIGTERM");
    Ok(ids)
}
