//! Configuration loading and root folder resolution
//!
//! The root folder holds everything a deployment owns: the SQLite database,
//! the per-report ingestion configs, and the upload spool.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Resolve the Tally root folder, in priority order:
/// 1. Command-line argument (highest priority)
/// 2. `TALLY_ROOT` environment variable
/// 3. `root_folder` key in the platform config file
/// 4. OS-dependent data directory (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var("TALLY_ROOT") {
        return PathBuf::from(path);
    }

    // Priority 3: TOML config file (~/.config/tally/config.toml or /etc/tally/config.toml)
    if let Some(config_path) = find_config_file() {
        if let Ok(content) = std::fs::read_to_string(&config_path) {
            if let Ok(value) = toml::from_str::<toml::Value>(&content) {
                if let Some(root) = value.get("root_folder").and_then(|v| v.as_str()) {
                    return PathBuf::from(root);
                }
            }
        }
    }

    // Priority 4: OS-dependent default
    default_root_folder()
}

fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("tally").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/tally/config.toml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tally"))
        .unwrap_or_else(|| PathBuf::from("./tally_data"))
}

/// Ensure the root folder and its working subdirectories exist
pub fn ensure_root_folder(root: &Path) -> Result<()> {
    std::fs::create_dir_all(root)?;
    Ok(())
}

/// Database file path under the root folder
pub fn database_path(root: &Path) -> PathBuf {
    root.join("tally.db")
}

/// Service settings loaded from `<root>/tally.toml`
///
/// Every field has a default; a missing file yields a fully-defaulted
/// config so a fresh deployment starts with zero setup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Bind address for the ingest service
    pub ingest_bind: String,
    /// Bind address for the triage service
    pub triage_bind: String,
    /// Directory of per-report ingestion configs (relative to root if not absolute)
    pub report_config_dir: String,
    /// Directory where uploaded files are spooled (relative to root if not absolute)
    pub spool_dir: String,
    /// Hard deadline for a single processing job, in minutes
    pub job_deadline_minutes: u64,
    /// Optional embedding endpoint; absent disables embedding generation
    pub embedding: Option<EmbeddingConfig>,
}

/// Embedding endpoint settings
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// URL of the embedding HTTP endpoint
    pub url: String,
    /// Per-call timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_seconds: u64,
}

fn default_embedding_timeout() -> u64 {
    30
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            ingest_bind: "127.0.0.1:5731".to_string(),
            triage_bind: "127.0.0.1:5732".to_string(),
            report_config_dir: "report-configs".to_string(),
            spool_dir: "spool".to_string(),
            job_deadline_minutes: 15,
            embedding: None,
        }
    }
}

impl TomlConfig {
    /// Load settings from `<root>/tally.toml`; a missing file yields defaults
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("tally.toml");
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Resolved report-config directory
    pub fn report_config_dir(&self, root: &Path) -> PathBuf {
        resolve_dir(root, &self.report_config_dir)
    }

    /// Resolved spool directory
    pub fn spool_dir(&self, root: &Path) -> PathBuf {
        resolve_dir(root, &self.spool_dir)
    }
}

fn resolve_dir(root: &Path, dir: &str) -> PathBuf {
    let path = PathBuf::from(dir);
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}
