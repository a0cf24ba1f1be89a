// src/commands/find.rs
//! List installed specs

use super::Session;
use anyhow::Result;

pub fn cmd_find(session: &Session, query: Option<&str>, explicit: bool) -> Result<()> {
    let records = match query {
        Some(q) => session
            .db
            .query(q)?
            .into_iter()
            .filter(|r| !explicit || r.explicit)
            .collect(),
        None => session.db.list(explicit)?,
    };

    if records.is_empty() {
        println!("No installed specs");
        return Ok(());
    }

    for record in &records {
        let node = record
            .root()
            .map(|root| root.node().to_string())
            .unwrap_or_else(|| format!("{}@{}", record.name, record.version));
        let flag = if record.external { " [external]" } else { "" };
        println!("{}  {}{}", record.hash.short(), node, flag);
        println!("         {}", record.prefix.display());
    }
    println!("{} installed spec(s)", records.len());
    Ok(())
}
