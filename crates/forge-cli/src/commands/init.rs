use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use forge_git::GitRepository;

use crate::config::Config;

pub fn run(path: Option<PathBuf>) -> Result<()> {
    let target = match path {
        Some(p) => {
            std::fs::create_dir_all(&p)
                .with_context(|| format!("failed to create directory '{}'", p.display()))?;
            p
        }
        None => std::env::current_dir().context("failed to get current directory")?,
    };
    let target = target.canonicalize().unwrap_or_else(|_| target.clone());

    let git_dir = target.join(".git");
    let is_reinit = git_dir.exists();

    if is_reinit {
        GitRepository::open(&target)
            .with_context(|| format!("failed to reinitialize repository at '{}'", target.display()))?;
    } else {
        GitRepository::init(&target)
            .with_context(|| format!("failed to initialize repository at '{}'", target.display()))?;
    }

    let config_path = Config::path(&target);
    if !config_path.exists() {
        Config::default()
            .save(&target)
            .with_context(|| format!("failed to write '{}'", config_path.display()))?;
    }
    std::fs::create_dir_all(target.join("tools")).ok();

    let (prefix, qualifier) = if is_reinit { ("Reinitialized", "existing") } else { ("Initialized", "empty") };
    println!("{} {} forge repository in {}", prefix, qualifier, git_dir.display().to_string().bold());
    Ok(())
}
