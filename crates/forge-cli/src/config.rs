use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// `forge.toml` at a repository's root — author identity, retry and
/// timeout bounds, and the user-tools directory — read with `toml`/
/// `serde`, the same way `dk-cli::config::Config` reads its client-side
/// `config.toml`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub author: AuthorConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorConfig {
    pub name: String,
    pub email: String,
}

impl Default for AuthorConfig {
    fn default() -> Self {
        Self { name: "forge agent".into(), email: "agent@forge.dev".into() }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub timeout_secs: u64,
    pub retry_bound: u32,
    pub tools_dir: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { timeout_secs: 120, retry_bound: 3, tools_dir: None }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self { author: AuthorConfig::default(), tools: ToolsConfig::default() }
    }
}

impl Config {
    pub fn path(repo_root: &Path) -> PathBuf {
        repo_root.join("forge.toml")
    }

    /// Load `forge.toml` from `repo_root`, falling back to defaults when
    /// the file does not exist — a fresh `forge init` is usable without
    /// ever writing one.
    pub fn load(repo_root: &Path) -> Result<Self> {
        let path = Self::path(repo_root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse '{}'", path.display()))
    }

    pub fn tools_dir(&self, repo_root: &Path) -> PathBuf {
        self.tools
            .tools_dir
            .clone()
            .unwrap_or_else(|| repo_root.join("tools"))
    }

    pub fn save(&self, repo_root: &Path) -> Result<()> {
        let path = Self::path(repo_root);
        let content = toml::to_string_pretty(self).context("failed to serialize forge.toml")?;
        std::fs::write(&path, content).with_context(|| format!("failed to write '{}'", path.display()))
    }
}
