// src/db/paths.rs
//! Centralized path derivation for files next to the install database

use std::path::{Path, PathBuf};

/// Get the directory containing the database
pub fn db_dir(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf()
}

/// Get the cross-process lock file guarding database writes
pub fn lock_path(db_path: &Path) -> PathBuf {
    let mut name = db_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "spackle.db".into());
    name.push(".lock");
    db_dir(db_path).join(name)
}
