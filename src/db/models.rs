// src/db/models.rs

//! Data models for install database rows
//!
//! Each struct maps to one table and offers the same small set of
//! associated functions: `insert`, `find_*`, `delete` and `from_row`.

use crate::error::Result;
use crate::hash::Hash;
use crate::spec::{ConcreteGraph, ConcreteSpec};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::PathBuf;

/// Format tag written with every stored spec
pub const SPEC_FORMAT: &str = "spackle-spec-v1";

/// Stored spec formats this release can read
const READABLE_FORMATS: &[&str] = &[SPEC_FORMAT];

const RECORD_COLUMNS: &str = "hash, name, version, spec_format, spec_json, prefix, external, explicit, ref_count, installed_at";

fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn invalid_data(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message)
}

/// An installed concrete spec
#[derive(Debug, Clone, PartialEq)]
pub struct InstallRecord {
    pub hash: Hash,
    pub name: String,
    pub version: String,
    /// Subgraph rooted at this package, as concretized
    pub spec: ConcreteGraph,
    pub prefix: PathBuf,
    /// Provided by the site, never built or deleted by spackle
    pub external: bool,
    /// Requested by the user rather than pulled in as a dependency
    pub explicit: bool,
    /// Installed records that depend on this one
    pub ref_count: i64,
    pub installed_at: DateTime<Utc>,
}

impl InstallRecord {
    /// Create a record for a package of a concrete graph
    ///
    /// Returns `None` if the graph has no such package.
    pub fn new(graph: &ConcreteGraph, name: &str, prefix: PathBuf, explicit: bool) -> Option<Self> {
        let root = graph.spec(name)?;
        let node = root.node();
        Some(Self {
            hash: root.dag_hash(),
            name: node.name.clone(),
            version: node.version.to_string(),
            spec: graph.subgraph(name)?,
            prefix,
            external: node.is_external(),
            explicit,
            ref_count: 0,
            installed_at: Utc::now(),
        })
    }

    /// The installed package within its stored subgraph
    pub fn root(&self) -> Option<ConcreteSpec<'_>> {
        self.spec.spec(&self.name)
    }

    /// Insert this record into the database
    pub fn insert(&self, conn: &Connection) -> Result<()> {
        let spec_json = serde_json::to_string(&self.spec)?;
        conn.execute(
            "INSERT INTO installed (hash, name, version, spec_format, spec_json, prefix, external, explicit, ref_count, installed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                self.hash.as_str(),
                &self.name,
                &self.version,
                SPEC_FORMAT,
                spec_json,
                self.prefix.to_string_lossy(),
                self.external,
                self.explicit,
                self.ref_count,
                self.installed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find a record by its full hash
    pub fn find_by_hash(conn: &Connection, hash: &Hash) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM installed WHERE hash = ?1",
            RECORD_COLUMNS
        ))?;
        let record = stmt.query_row([hash.as_str()], Self::from_row).optional()?;
        Ok(record)
    }

    /// Find records whose hash starts with `prefix`
    pub fn find_by_hash_prefix(conn: &Connection, prefix: &str) -> Result<Vec<Self>> {
        let escaped = prefix.replace(['%', '_'], "");
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM installed WHERE hash LIKE ?1 ORDER BY name, version",
            RECORD_COLUMNS
        ))?;
        let records = stmt
            .query_map([format!("{}%", escaped)], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Find records by package name
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM installed WHERE name = ?1 ORDER BY installed_at, hash",
            RECORD_COLUMNS
        ))?;
        let records = stmt
            .query_map([name], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// List all records, optionally only explicit ones
    pub fn list_all(conn: &Connection, explicit_only: bool) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM installed WHERE explicit = 1 OR ?1 = 0 ORDER BY name, version, hash",
            RECORD_COLUMNS
        ))?;
        let records = stmt
            .query_map([explicit_only], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Records that directly depend on `hash`
    pub fn find_dependents(conn: &Connection, hash: &Hash) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM installed
             WHERE hash IN (SELECT hash FROM installed_deps WHERE dep_hash = ?1)
             ORDER BY name, version",
            RECORD_COLUMNS
        ))?;
        let records = stmt
            .query_map([hash.as_str()], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Hashes of the records `hash` directly depends on
    pub fn dependency_hashes(conn: &Connection, hash: &Hash) -> Result<Vec<String>> {
        let mut stmt =
            conn.prepare("SELECT dep_hash FROM installed_deps WHERE hash = ?1 ORDER BY dep_hash")?;
        let hashes = stmt
            .query_map([hash.as_str()], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(hashes)
    }

    /// Record a dependency edge between two installed records
    pub fn insert_dependency(conn: &Connection, hash: &Hash, dep_hash: &Hash) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO installed_deps (hash, dep_hash) VALUES (?1, ?2)",
            [hash.as_str(), dep_hash.as_str()],
        )?;
        Ok(())
    }

    /// Add `delta` to the reference count; returns the new count
    pub fn adjust_ref_count(conn: &Connection, hash: &str, delta: i64) -> Result<Option<i64>> {
        conn.execute(
            "UPDATE installed SET ref_count = MAX(ref_count + ?2, 0) WHERE hash = ?1",
            params![hash, delta],
        )?;
        let count = conn
            .query_row(
                "SELECT ref_count FROM installed WHERE hash = ?1",
                [hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count)
    }

    pub fn set_explicit(conn: &Connection, hash: &Hash, explicit: bool) -> Result<()> {
        conn.execute(
            "UPDATE installed SET explicit = ?2 WHERE hash = ?1",
            params![hash.as_str(), explicit],
        )?;
        Ok(())
    }

    /// Delete a record and its outgoing dependency edges
    pub fn delete(conn: &Connection, hash: &Hash) -> Result<()> {
        conn.execute("DELETE FROM installed_deps WHERE hash = ?1", [hash.as_str()])?;
        conn.execute("DELETE FROM installed WHERE hash = ?1", [hash.as_str()])?;
        Ok(())
    }

    /// Convert a database row to an InstallRecord
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let hash: String = row.get(0)?;
        let hash = Hash::new(hash).map_err(|e| conversion_error(0, e))?;

        let format: String = row.get(3)?;
        if !READABLE_FORMATS.contains(&format.as_str()) {
            return Err(conversion_error(
                3,
                invalid_data(format!("Unsupported stored spec format: {}", format)),
            ));
        }
        let spec_json: String = row.get(4)?;
        let spec: ConcreteGraph =
            serde_json::from_str(&spec_json).map_err(|e| conversion_error(4, e))?;

        let prefix: String = row.get(5)?;
        let installed_at: String = row.get(9)?;
        let installed_at = DateTime::parse_from_rfc3339(&installed_at)
            .map_err(|e| conversion_error(9, e))?
            .with_timezone(&Utc);

        Ok(Self {
            hash,
            name: row.get(1)?,
            version: row.get(2)?,
            spec,
            prefix: PathBuf::from(prefix),
            external: row.get(6)?,
            explicit: row.get(7)?,
            ref_count: row.get(8)?,
            installed_at,
        })
    }
}

/// A claim on a hash by a running builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InProgressMarker {
    pub hash: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

impl InProgressMarker {
    pub fn new(hash: &Hash, holder: &str) -> Self {
        Self {
            hash: hash.as_str().to_string(),
            holder: holder.to_string(),
            acquired_at: Utc::now(),
        }
    }

    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO in_progress (hash, holder, acquired_at) VALUES (?1, ?2, ?3)",
            params![&self.hash, &self.holder, self.acquired_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn find(conn: &Connection, hash: &Hash) -> Result<Option<Self>> {
        let marker = conn
            .query_row(
                "SELECT hash, holder, acquired_at FROM in_progress WHERE hash = ?1",
                [hash.as_str()],
                Self::from_row,
            )
            .optional()?;
        Ok(marker)
    }

    /// Remove the marker for `hash`, whoever holds it
    pub fn delete(conn: &Connection, hash: &Hash) -> Result<()> {
        conn.execute("DELETE FROM in_progress WHERE hash = ?1", [hash.as_str()])?;
        Ok(())
    }

    /// Move the marker's timestamp to now if `holder` still owns it
    pub fn touch(conn: &Connection, hash: &Hash, holder: &str) -> Result<bool> {
        let updated = conn.execute(
            "UPDATE in_progress SET acquired_at = ?3 WHERE hash = ?1 AND holder = ?2",
            params![hash.as_str(), holder, Utc::now().to_rfc3339()],
        )?;
        Ok(updated > 0)
    }

    /// Remove the marker only if `holder` owns it
    pub fn release(conn: &Connection, hash: &Hash, holder: &str) -> Result<bool> {
        let removed = conn.execute(
            "DELETE FROM in_progress WHERE hash = ?1 AND holder = ?2",
            [hash.as_str(), holder],
        )?;
        Ok(removed > 0)
    }

    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let acquired_at: String = row.get(2)?;
        let acquired_at = DateTime::parse_from_rfc3339(&acquired_at)
            .map_err(|e| conversion_error(2, e))?
            .with_timezone(&Utc);
        Ok(Self {
            hash: row.get(0)?,
            holder: row.get(1)?,
            acquired_at,
        })
    }
}
