// src/config/mod.rs
//! Site and user configuration
//!
//! Supports TOML configuration files with the following sections:
//! - [paths] - Install root, database file, stage directory, recipe repositories
//! - [build] - Parallel jobs, stage retention
//! - [locks] - Database lock retries and in-progress marker timeout
//! - [arch] - Default platform, operating system and target
//! - [[compilers]] - Compilers available to builds
//! - [packages.*] - Per-package preferences, externals and buildability
//!
//! The raw file is turned into [`Preferences`] before concretization;
//! preferences only reorder candidates and never relax a constraint.

mod preferences;

pub use preferences::{AvailableCompiler, External, PackagePreferences, Preferences};

use crate::error::{Error, Result};
use crate::spec::Arch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "SPACKLE_CONFIG";

/// Top-level configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsSection,
    pub build: BuildSection,
    pub locks: LocksSection,
    pub arch: ArchSection,
    pub compilers: Vec<CompilerEntry>,
    pub packages: BTreeMap<String, PackageSection>,
}

/// Filesystem locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    /// Root of the install tree
    pub install_root: PathBuf,
    /// SQLite install database file
    pub database: PathBuf,
    /// Where build stages are created
    pub stage_root: PathBuf,
    /// Recipe repositories, searched in order
    pub repos: Vec<PathBuf>,
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("spackle")
}

impl Default for PathsSection {
    fn default() -> Self {
        let data = data_dir();
        Self {
            install_root: data.join("opt"),
            database: data.join("db").join("spackle.db"),
            stage_root: data.join("stage"),
            repos: Vec::new(),
        }
    }
}

/// Build settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    /// Parallel builds (default: available parallelism)
    pub jobs: Option<usize>,
    /// Keep stage directories after successful builds
    pub keep_stage: bool,
}

impl BuildSection {
    pub fn jobs(&self) -> usize {
        self.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        })
    }
}

/// Database lock settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocksSection {
    /// Attempts before giving up on the database lock
    pub retries: u32,
    /// First backoff delay; doubles on every retry
    pub initial_backoff_ms: u64,
    /// Age after which an in-progress marker is considered stale
    pub in_progress_timeout_secs: u64,
}

impl Default for LocksSection {
    fn default() -> Self {
        Self {
            retries: 10,
            initial_backoff_ms: 50,
            in_progress_timeout_secs: 3600,
        }
    }
}

impl LocksSection {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn in_progress_timeout(&self) -> Duration {
        Duration::from_secs(self.in_progress_timeout_secs)
    }
}

/// Default architecture; unset parts are detected from the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchSection {
    pub platform: Option<String>,
    pub os: Option<String>,
    pub target: Option<String>,
}

impl ArchSection {
    pub fn resolve(&self) -> Arch {
        Arch::new(
            self.platform
                .clone()
                .unwrap_or_else(|| std::env::consts::OS.to_string()),
            self.os.clone().unwrap_or_else(host_os),
            self.target
                .clone()
                .unwrap_or_else(|| std::env::consts::ARCH.to_string()),
        )
    }
}

/// Operating system name and version from /etc/os-release, e.g. `ubuntu22.04`
fn host_os() -> String {
    std::fs::read_to_string("/etc/os-release")
        .ok()
        .and_then(|content| parse_os_release(&content))
        .unwrap_or_else(|| "unknown".to_string())
}

fn parse_os_release(content: &str) -> Option<String> {
    let field = |key: &str| {
        content.lines().find_map(|line| {
            line.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
                .map(|v| v.trim().trim_matches('"').to_string())
        })
    };
    let id = field("ID")?;
    let version = field("VERSION_ID").unwrap_or_default();
    Some(format!("{}{}", id, version))
}

/// A compiler available to builds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompilerEntry {
    /// `name@version`
    pub spec: String,
    /// Only usable for this operating system, if set
    #[serde(default)]
    pub operating_system: Option<String>,
    #[serde(default)]
    pub paths: CompilerPaths,
}

/// Compiler executables exported to build environments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompilerPaths {
    pub cc: Option<PathBuf>,
    pub cxx: Option<PathBuf>,
    pub f77: Option<PathBuf>,
    pub fc: Option<PathBuf>,
}

/// `[packages.<name>]` or `[packages.all]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackageSection {
    /// Preferred version constraints, most preferred first
    pub version: Vec<String>,
    /// Preferred variant values as a spec fragment (`+shared ~debug`)
    pub variants: Option<String>,
    /// Preferred compiler constraints, most preferred first
    pub compiler: Vec<String>,
    /// Virtual name to preferred provider names
    pub providers: BTreeMap<String, Vec<String>>,
    /// Whether the package may be built from source
    pub buildable: Option<bool>,
    pub externals: Vec<ExternalEntry>,
}

/// A package installed outside spackle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalEntry {
    /// Spec the external satisfies, e.g. `openmpi@4.1.2 %gcc@11.4.0`
    pub spec: String,
    pub prefix: PathBuf,
}

impl Config {
    /// Default location of the user configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("spackle").join("config.toml"))
    }

    /// Load configuration
    ///
    /// An explicit path (argument or `SPACKLE_CONFIG`) must exist. The
    /// default location is optional: a missing file yields defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::load_file(&path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::load_file(&path),
                _ => {
                    debug!("No configuration file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    /// Load and validate a configuration file
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.build.jobs == Some(0) {
            return Err(Error::Config("build.jobs must be at least 1".to_string()));
        }
        if self.locks.retries == 0 {
            return Err(Error::Config("locks.retries must be at least 1".to_string()));
        }
        self.preferences().map(|_| ())
    }

    /// Parse preferences, compilers and externals into typed form
    pub fn preferences(&self) -> Result<Preferences> {
        Preferences::from_config(self)
    }
}
