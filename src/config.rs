//! Configuration system.
//!
//! Supports layered configuration from multiple sources (highest priority
//! first):
//! 1. Repo local: `.hx/config.toml` (per-repo)
//! 2. User global: `~/.config/hx/config.toml` (personal defaults)
//!
//! Configuration uses TOML format for readability.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Paths configuration (push/pull destinations)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Default destination consulted by --outgoing. A filesystem path to a
    /// peer repository.
    #[serde(default)]
    pub default_push: Option<String>,
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Committer identity, e.g. "Jane Doe <jane@example.com>".
    #[serde(default)]
    pub username: Option<String>,

    /// External editor command. Falls back to $HX_EDITOR, $VISUAL, $EDITOR,
    /// then "vi".
    #[serde(default)]
    pub editor: Option<String>,

    /// Record obsolescence markers instead of stripping rewritten commits.
    #[serde(default)]
    pub obsolescence: bool,

    #[serde(default)]
    pub paths: PathsConfig,
}

impl Config {
    /// Load configuration for a repository, merging user-level defaults
    /// under repo-local values.
    pub fn load(meta_dir: &Path) -> Result<Self> {
        let mut config = match user_config_path() {
            Some(path) => Self::read_file(&path)?.unwrap_or_default(),
            None => Self::default(),
        };

        if let Some(local) = Self::read_file(&meta_dir.join("config.toml"))? {
            config.merge(local);
        }

        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config at {:?}", path))?;
        let config: Config =
            toml::from_str(&contents).with_context(|| format!("Invalid config file {:?}", path))?;
        Ok(Some(config))
    }

    /// Overlay `other` (higher priority) on self.
    fn merge(&mut self, other: Config) {
        if other.username.is_some() {
            self.username = other.username;
        }
        if other.editor.is_some() {
            self.editor = other.editor;
        }
        if other.obsolescence {
            self.obsolescence = true;
        }
        if other.paths.default_push.is_some() {
            self.paths.default_push = other.paths.default_push;
        }
    }

    /// Committer identity: configured value, then the usual environment
    /// fallbacks.
    pub fn username(&self) -> String {
        if let Some(user) = &self.username {
            return user.clone();
        }
        for var in ["HX_USER", "EMAIL", "USER", "USERNAME"] {
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() {
                    return value;
                }
            }
        }
        "unknown".to_string()
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("hx").join("config.toml"))
}
