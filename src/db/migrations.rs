// src/db/migrations.rs
//! Database migration implementations
//!
//! Each function upgrades the schema by exactly one version.

use crate::error::Result;
use rusqlite::Connection;
use tracing::debug;

/// Initial schema - Version 1
///
/// - installed: one row per installed concrete spec, keyed by DAG hash,
///   carrying the stored spec (with its format tag), prefix and the number
///   of installed specs that depend on it
/// - installed_deps: direct dependency edges between installed records
/// - in_progress: short-lived markers for hashes a builder has claimed
pub fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE installed (
            hash TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            spec_format TEXT NOT NULL,
            spec_json TEXT NOT NULL,
            prefix TEXT NOT NULL,
            external INTEGER NOT NULL DEFAULT 0,
            explicit INTEGER NOT NULL DEFAULT 0,
            ref_count INTEGER NOT NULL DEFAULT 0 CHECK(ref_count >= 0),
            installed_at TEXT NOT NULL
        );

        CREATE INDEX idx_installed_name ON installed(name);
        CREATE INDEX idx_installed_explicit ON installed(explicit);

        CREATE TABLE installed_deps (
            hash TEXT NOT NULL,
            dep_hash TEXT NOT NULL,
            PRIMARY KEY (hash, dep_hash),
            FOREIGN KEY (hash) REFERENCES installed(hash) ON DELETE CASCADE,
            FOREIGN KEY (dep_hash) REFERENCES installed(hash)
        );

        CREATE INDEX idx_installed_deps_dep ON installed_deps(dep_hash);

        CREATE TABLE in_progress (
            hash TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            acquired_at TEXT NOT NULL
        );
        ",
    )?;

    Ok(())
}
