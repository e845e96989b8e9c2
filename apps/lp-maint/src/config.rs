use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "lockpost";
pub const APP_NAME: &str = "maint";

pub fn data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow!("cannot determine config directory"))?;
    Ok(dirs.config_dir().join("config.json"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintConfig {
    /// Message database; defaults to `<data dir>/messages.db`.
    pub database_path: Option<PathBuf>,
    /// Key directory used by `keygen`; defaults to `<data dir>/keys`.
    pub key_dir: Option<PathBuf>,
    pub batch_size: usize,
    /// `tracing` filter directive, overridden by `RUST_LOG`.
    pub log_filter: String,
}

impl Default for MaintConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            key_dir: None,
            batch_size: lp_store::repair::DEFAULT_BATCH_SIZE,
            log_filter: "info".into(),
        }
    }
}

impl MaintConfig {
    /// Read `path`, or the default location when `None`. A missing default
    /// file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (config_path()?, false),
        };
        if !explicit && !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(p) => Ok(p.clone()),
            None => Ok(data_dir()?.join("messages.db")),
        }
    }

    pub fn key_dir(&self) -> Result<PathBuf> {
        match &self.key_dir {
            Some(p) => Ok(p.clone()),
            None => Ok(data_dir()?.join("keys")),
        }
    }
}
