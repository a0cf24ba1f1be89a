// src/db/mod.rs

//! Install database
//!
//! A SQLite file records every installed concrete spec by DAG hash, with
//! its stored spec, install prefix, explicit flag and reference count (the
//! number of installed specs that depend on it). Records are append-only
//! per hash: installing the same hash twice is an error, and a record can
//! only be removed once nothing depends on it.
//!
//! Every write runs inside a transaction while holding the cross-process
//! [`DbLock`]. Builds never hold the lock; instead a builder claims a hash
//! with an in-progress marker, which other builders respect until it is
//! released or grows older than the configured timeout.

mod lock;
mod migrations;
pub mod models;
pub mod paths;
pub mod schema;

pub use lock::DbLock;
pub use models::{InProgressMarker, InstallRecord, SPEC_FORMAT};

use crate::concretize::InstalledLookup;
use crate::config::LocksSection;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::spec::{AbstractSpec, ConcreteGraph};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long SQLite waits on its own file lock before failing a read
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of trying to claim a hash for building
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The caller now holds the marker and should build
    Acquired,
    /// Someone already installed it
    Installed(Box<InstallRecord>),
    /// Another builder holds a live marker
    Busy {
        holder: String,
        since: DateTime<Utc>,
    },
}

/// Handle on the install database file
#[derive(Debug, Clone)]
pub struct InstallDatabase {
    path: PathBuf,
    locks: LocksSection,
}

impl InstallDatabase {
    /// Open (creating if needed) and migrate the database at `path`
    pub fn open(path: impl Into<PathBuf>, locks: LocksSection) -> Result<Self> {
        let path = path.into();
        let dir = paths::db_dir(&path);
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::IoError(format!("Failed to create database directory {}: {}", dir.display(), e))
        })?;

        let db = Self { path, locks };
        db.write(|tx| schema::migrate(tx))?;
        debug!("Opened install database {}", db.path.display());
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.connect()?;
        f(&conn)
    }

    /// Run `f` in a transaction while holding the exclusive lock
    fn write<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let _lock = DbLock::acquire(&paths::lock_path(&self.path), &self.locks)?;
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Look up a record by full hash
    pub fn lookup(&self, hash: &Hash) -> Result<Option<InstallRecord>> {
        self.read(|conn| InstallRecord::find_by_hash(conn, hash))
    }

    /// Record a successful install of one package of a concrete graph
    ///
    /// Every direct dependency must already be recorded; each of them gains
    /// a reference. Fails with `AlreadyInstalled` if the hash exists.
    pub fn record(
        &self,
        graph: &ConcreteGraph,
        name: &str,
        prefix: &Path,
        explicit: bool,
    ) -> Result<InstallRecord> {
        let root = graph
            .spec(name)
            .ok_or_else(|| Error::NotFound(format!("{} is not part of the graph", name)))?;
        let record = InstallRecord::new(graph, name, prefix.to_path_buf(), explicit)
            .ok_or_else(|| Error::NotFound(format!("{} is not part of the graph", name)))?;
        let dependencies: Vec<(String, Hash)> = root
            .dependencies()
            .map(|(dep, _)| (dep.name().to_string(), dep.dag_hash()))
            .collect();

        self.write(|tx| {
            if InstallRecord::find_by_hash(tx, &record.hash)?.is_some() {
                return Err(Error::AlreadyInstalled(format!(
                    "{}/{}",
                    record.name,
                    record.hash.short()
                )));
            }
            for (dep_name, dep_hash) in &dependencies {
                if InstallRecord::find_by_hash(tx, dep_hash)?.is_none() {
                    return Err(Error::NotFound(format!(
                        "Dependency {}/{} of {} is not installed",
                        dep_name,
                        dep_hash.short(),
                        record.name
                    )));
                }
            }

            record.insert(tx)?;
            for (_, dep_hash) in &dependencies {
                InstallRecord::insert_dependency(tx, &record.hash, dep_hash)?;
                InstallRecord::adjust_ref_count(tx, dep_hash.as_str(), 1)?;
            }
            InProgressMarker::delete(tx, &record.hash)?;
            Ok(())
        })?;

        info!(
            "Recorded {}@{}/{} at {}",
            record.name,
            record.version,
            record.hash.short(),
            record.prefix.display()
        );
        Ok(record)
    }

    /// Add a reference to a record; returns the new count
    pub fn increment_ref(&self, hash: &Hash) -> Result<i64> {
        self.write(|tx| {
            InstallRecord::adjust_ref_count(tx, hash.as_str(), 1)?
                .ok_or_else(|| Error::NotFound(format!("No installed spec with hash {}", hash)))
        })
    }

    /// Drop a reference from a record; returns the new count
    pub fn decrement_ref(&self, hash: &Hash) -> Result<i64> {
        self.write(|tx| {
            let current = InstallRecord::find_by_hash(tx, hash)?
                .ok_or_else(|| Error::NotFound(format!("No installed spec with hash {}", hash)))?;
            if current.ref_count == 0 {
                warn!("Reference count of {} is already zero", hash.short());
                return Ok(0);
            }
            Ok(InstallRecord::adjust_ref_count(tx, hash.as_str(), -1)?.unwrap_or(0))
        })
    }

    /// Mark a record as explicitly requested
    pub fn mark_explicit(&self, hash: &Hash) -> Result<()> {
        self.write(|tx| InstallRecord::set_explicit(tx, hash, true))
    }

    /// Remove a record nothing depends on
    ///
    /// Releases the references it held on its dependencies. The prefix on
    /// disk is left for the caller.
    pub fn remove(&self, hash: &Hash) -> Result<InstallRecord> {
        let record = self.write(|tx| {
            let record = InstallRecord::find_by_hash(tx, hash)?
                .ok_or_else(|| Error::NotFound(format!("No installed spec with hash {}", hash)))?;
            if record.ref_count > 0 {
                let dependents = InstallRecord::find_dependents(tx, hash)?
                    .iter()
                    .map(|r| format!("{}@{}/{}", r.name, r.version, r.hash.short()))
                    .collect();
                return Err(Error::StillReferenced {
                    hash: format!("{}/{}", record.name, hash.short()),
                    ref_count: record.ref_count,
                    dependents,
                });
            }

            for dep_hash in InstallRecord::dependency_hashes(tx, hash)? {
                InstallRecord::adjust_ref_count(tx, &dep_hash, -1)?;
            }
            InstallRecord::delete(tx, hash)?;
            Ok(record)
        })?;

        info!("Removed {}@{}/{}", record.name, record.version, hash.short());
        Ok(record)
    }

    /// Installed records that directly depend on `hash`
    pub fn dependents(&self, hash: &Hash) -> Result<Vec<InstallRecord>> {
        self.read(|conn| InstallRecord::find_dependents(conn, hash))
    }

    /// Claim `hash` for building
    ///
    /// A marker older than the configured timeout belongs to a builder that
    /// died; it is cleared and the claim succeeds.
    pub fn claim(&self, hash: &Hash, holder: &str) -> Result<Claim> {
        let timeout = self.locks.in_progress_timeout();
        self.write(|tx| {
            if let Some(record) = InstallRecord::find_by_hash(tx, hash)? {
                return Ok(Claim::Installed(Box::new(record)));
            }
            if let Some(marker) = InProgressMarker::find(tx, hash)? {
                if marker.holder != holder {
                    let age = Utc::now()
                        .signed_duration_since(marker.acquired_at)
                        .to_std()
                        .unwrap_or_default();
                    if age < timeout {
                        return Ok(Claim::Busy {
                            holder: marker.holder,
                            since: marker.acquired_at,
                        });
                    }
                    warn!(
                        "Clearing stale in-progress marker for {} held by {} since {}",
                        hash.short(),
                        marker.holder,
                        marker.acquired_at.to_rfc3339()
                    );
                }
            }
            InProgressMarker::new(hash, holder).insert(tx)?;
            Ok(Claim::Acquired)
        })
    }

    /// Renew a claim so it is not mistaken for a dead builder's
    ///
    /// Returns `false` when `holder` no longer owns the marker.
    pub fn refresh_claim(&self, hash: &Hash, holder: &str) -> Result<bool> {
        self.write(|tx| InProgressMarker::touch(tx, hash, holder))
    }

    /// Age after which another builder may take over a claim
    pub fn claim_timeout(&self) -> Duration {
        self.locks.in_progress_timeout()
    }

    /// Drop a claim taken with [`claim`](Self::claim)
    pub fn release(&self, hash: &Hash, holder: &str) -> Result<()> {
        let released = self.write(|tx| InProgressMarker::release(tx, hash, holder))?;
        if !released {
            debug!("No in-progress marker for {} held by {}", hash.short(), holder);
        }
        Ok(())
    }

    /// Find installs matching a query
    ///
    /// `/<prefix>` matches by hash prefix; anything else is parsed as a spec
    /// and matched against each install's stored spec.
    pub fn query(&self, query: &str) -> Result<Vec<InstallRecord>> {
        let query = query.trim();
        if let Some(prefix) = query.strip_prefix('/') {
            if prefix.is_empty() {
                return Err(Error::ParseError("Empty hash prefix".to_string()));
            }
            return self.read(|conn| InstallRecord::find_by_hash_prefix(conn, prefix));
        }

        let spec = AbstractSpec::parse(query)?;
        let candidates = match spec.name.as_deref() {
            Some(name) => self.read(|conn| InstallRecord::find_by_name(conn, name))?,
            None => self.list(false)?,
        };
        Ok(candidates
            .into_iter()
            .filter(|record| record.root().is_some_and(|root| root.satisfies(&spec)))
            .collect())
    }

    /// All records, or only explicit ones
    pub fn list(&self, explicit_only: bool) -> Result<Vec<InstallRecord>> {
        self.read(|conn| InstallRecord::list_all(conn, explicit_only))
    }
}

impl InstalledLookup for InstallDatabase {
    fn installed(&self, name: &str) -> Result<Vec<ConcreteGraph>> {
        let records = self.read(|conn| InstallRecord::find_by_name(conn, name))?;
        Ok(records.into_iter().map(|record| record.spec).collect())
    }
}
