// src/commands/uninstall.rs
//! Remove installed specs and their prefixes

use super::{confirm, Session, UsageError};
use anyhow::Result;
use spackle::{InstallDatabase, InstallRecord};
use std::collections::BTreeSet;
use tracing::{info, warn};

pub fn cmd_uninstall(session: &Session, query: &str, dependents: bool, yes: bool) -> Result<()> {
    let mut matches = session.db.query(query)?;
    let target = match matches.len() {
        0 => return Err(UsageError(format!("No installed spec matches '{}'", query)).into()),
        1 => matches.remove(0),
        _ => {
            let listing: Vec<String> = matches.iter().map(describe).collect();
            return Err(UsageError(format!(
                "'{}' matches {} installed specs, use /hash to pick one:\n  {}",
                query,
                matches.len(),
                listing.join("\n  ")
            ))
            .into());
        }
    };

    let doomed = if dependents {
        removal_order(&session.db, target)?
    } else {
        vec![target]
    };

    if !yes {
        println!("The following will be removed:");
        for record in &doomed {
            println!("  {}", describe(record));
        }
        if !confirm("Proceed?")? {
            info!("Uninstall aborted");
            return Ok(());
        }
    }

    for record in &doomed {
        session.db.remove(&record.hash)?;
        if record.external {
            continue;
        }
        if let Err(e) = session.layout.remove_prefix(&record.prefix) {
            warn!("Removed {} from the database but not from disk: {}", record.name, e);
        }
        println!("Uninstalled {}", describe(record));
    }
    Ok(())
}

fn describe(record: &InstallRecord) -> String {
    format!("{}  {}@{}  {}", record.hash.short(), record.name, record.version, record.prefix.display())
}

/// `target` and everything above it, dependents first
fn removal_order(db: &InstallDatabase, target: InstallRecord) -> Result<Vec<InstallRecord>> {
    fn visit(
        db: &InstallDatabase,
        record: InstallRecord,
        seen: &mut BTreeSet<String>,
        order: &mut Vec<InstallRecord>,
    ) -> Result<()> {
        if !seen.insert(record.hash.as_str().to_string()) {
            return Ok(());
        }
        for dependent in db.dependents(&record.hash)? {
            visit(db, dependent, seen, order)?;
        }
        order.push(record);
        Ok(())
    }

    let mut seen = BTreeSet::new();
    let mut order = Vec::new();
    visit(db, target, &mut seen, &mut order)?;
    Ok(order)
}
