//! Configuration file handling.
//!
//! An optional `config.json` supplies defaults for the allocator connection
//! and run options. Command-line flags and environment variables win over
//! anything set here.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Configuration file name.
const CONFIG_FILE: &str = "config.json";

/// Get the default config file path.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("io", "clusternet", "clusternet")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

/// Settings read from `config.json`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Allocator API base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_password: Option<String>,

    /// Root of the descriptor tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sites_dir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vrf: Option<String>,

    /// MCEs whose clusters are never touched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_mces: Vec<String>,

    /// Per-request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Load config from an explicit path, or from the platform config dir.
    ///
    /// A missing file at the default location yields the default config; a
    /// missing explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Load config from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", path))
    }
}
