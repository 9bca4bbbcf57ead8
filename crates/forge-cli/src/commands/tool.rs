use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use forge_tools::{register_user_tools, standard_registry, ApprovalStore, Tool, UserTool};

use crate::config::Config;

fn approvals_path(root: &std::path::Path) -> PathBuf {
    root.join(".forge").join("approved_tools.json")
}

pub fn list(repo: Option<PathBuf>) -> Result<()> {
    let root = match repo {
        Some(p) => p,
        None => crate::util::discover_repo_root()?,
    };
    let config = Config::load(&root)?;
    let mut registry = standard_registry();
    register_user_tools(&mut registry, &config.tools_dir(&root));

    let approvals = ApprovalStore::load_from_path(&approvals_path(&root)).unwrap_or_default();
    for def in registry.definitions() {
        let tool = registry.get(def.name)?;
        let status = match tool.source_hash() {
            None => "built-in".dimmed(),
            Some(hash) if approvals.is_approved(def.name, &hash) => "approved".green(),
            Some(_) => "needs approval".yellow(),
        };
        println!("{:<20} {:<16} {}", def.name.bold(), status, def.description);
    }
    Ok(())
}

pub fn approve(repo: Option<PathBuf>, name: String) -> Result<()> {
    let root = match repo {
        Some(p) => p,
        None => crate::util::discover_repo_root()?,
    };
    let config = Config::load(&root)?;
    let tools_dir = config.tools_dir(&root);
    let discovered = UserTool::discover(&tools_dir);
    let tool = discovered
        .iter()
        .find(|t| t.name() == name)
        .with_context(|| format!("no user tool named '{name}' in '{}'", tools_dir.display()))?;

    let hash = tool
        .source_hash()
        .ok_or_else(|| anyhow::anyhow!("'{name}' is a built-in tool and needs no approval"))?;

    let path = approvals_path(&root);
    let mut approvals = ApprovalStore::load_from_path(&path)?;
    approvals.approve(name.clone(), hash.clone());
    approvals.save_to_path(&path)?;

    println!("Approved {} ({})", name.bold(), &hash[..12]);
    Ok(())
}

pub fn revoke(repo: Option<PathBuf>, name: String) -> Result<()> {
    let root = match repo {
        Some(p) => p,
        None => crate::util::discover_repo_root()?,
    };
    let path = approvals_path(&root);
    let mut approvals = ApprovalStore::load_from_path(&path)?;
    approvals.revoke(&name);
    approvals.save_to_path(&path)?;
    println!("Revoked approval for {}", name.bold());
    Ok(())
}
