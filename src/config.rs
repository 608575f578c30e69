// src/config.rs

//! Configuration for tool locations and default directories
//!
//! Loaded from an optional TOML file; every field has a default so an empty
//! file (or no file) is valid.
//!
//! ```toml
//! store = "/var/lib/treeforge/sources"
//! cache_dir = "/var/cache/treeforge"
//!
//! [tools]
//! ostree = "/usr/bin/ostree"
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Executable names (or paths) of the external tools
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    pub rpm: String,
    pub rpmkeys: String,
    pub ostree: String,
    pub tar: String,
    pub cp: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            rpm: "rpm".to_string(),
            rpmkeys: "rpmkeys".to_string(),
            ostree: "ostree".to_string(),
            tar: "tar".to_string(),
            cp: "cp".to_string(),
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root of the checksum store
    pub store: Option<PathBuf>,
    /// Persistent cache directory
    pub cache_dir: Option<PathBuf>,
    pub tools: ToolConfig,
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::InvalidOptions(format!("config: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?;
        Self::from_toml(&content)
    }
}
