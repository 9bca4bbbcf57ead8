use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use forge_core::BranchName;
use forge_git::GitRepository;
use forge_session::{RepoEventBus, SessionRegistry};
use forge_vfs::{CommitVfs, Vfs};

use crate::config::Config;

fn open(repo: Option<PathBuf>) -> Result<(PathBuf, Arc<GitRepository>, Config)> {
    let root = match repo {
        Some(p) => p,
        None => crate::util::discover_repo_root()?,
    };
    let git = Arc::new(GitRepository::open(&root).with_context(|| format!("'{}' is not a forge repository", root.display()))?);
    let config = Config::load(&root)?;
    Ok((root, git, config))
}

pub fn spawn(repo: Option<PathBuf>, intent: String) -> Result<()> {
    let (_root, git, config) = open(repo)?;
    let events = Arc::new(RepoEventBus::new());
    let registry = SessionRegistry::new(git, events);

    let branch = BranchName::new(format!("agent/{}", uuid::Uuid::new_v4()))?;
    let session = registry.get_or_create(&branch, &intent)?;

    let rt = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    rt.block_on(async {
        session.persist().await?;
        session
            .vfs
            .commit(&config.author.name, &config.author.email, &format!("spawn session: {intent}"))?;
        anyhow::Ok(())
    })?;

    println!(
        "Spawned session {} on branch {}",
        session.id.to_string().green(),
        branch.to_string().bold()
    );
    Ok(())
}

pub fn list(repo: Option<PathBuf>) -> Result<()> {
    let (_root, git, _config) = open(repo)?;

    let platform = git.inner().references().context("failed to read refs")?;
    let mut found = false;
    for reference in platform.local_branches().context("failed to list local branches")? {
        let reference = reference.context("failed to read a branch reference")?;
        let short = reference.name().shorten().to_string();
        let Ok(branch) = BranchName::new(short.clone()) else { continue };
        let Some(tip) = git.branch_tip(&branch)? else { continue };
        let view = CommitVfs::new(git.clone(), tip);
        let Ok(bytes) = view.read(".forge/session.json") else { continue };
        let Ok(record) = forge_session::SessionRecord::from_json(&bytes) else { continue };

        found = true;
        println!(
            "{}  {:<16}  {}",
            branch.to_string().bold(),
            record.state.as_str(),
            record.intent
        );
    }
    if !found {
        println!("no sessions found");
    }
    Ok(())
}

pub fn status(repo: Option<PathBuf>, branch: String) -> Result<()> {
    let (_root, git, _config) = open(repo)?;
    let branch = BranchName::new(branch)?;
    let Some(tip) = git.branch_tip(&branch)? else {
        bail!("branch '{branch}' has no commits");
    };
    let view = CommitVfs::new(git, tip);
    let bytes = view
        .read(".forge/session.json")
        .with_context(|| format!("branch '{branch}' has no session record"))?;
    let record = forge_session::SessionRecord::from_json(&bytes)?;

    println!("branch:        {}", branch);
    println!("session id:    {}", record.session_id);
    println!("state:         {}", record.state.as_str());
    println!("intent:        {}", record.intent);
    println!("messages:      {}", record.messages.len());
    println!("active files:  {}", record.active_files.len());
    if let Some(parent) = &record.parent {
        println!("parent:        {}", parent);
    }
    if !record.children.is_empty() {
        println!("children:      {}", record.children.len());
    }
    Ok(())
}

pub fn merge(repo: Option<PathBuf>, source: String, destination: String) -> Result<()> {
    let (_root, git, config) = open(repo)?;
    let source = BranchName::new(source)?;
    let destination = BranchName::new(destination)?;

    let commit = forge_session::merge_branch(&git, &source, &destination, &config.author.name, &config.author.email)
        .with_context(|| format!("failed to merge '{source}' into '{destination}'"))?;

    println!(
        "Merged {} into {} at {}",
        source.to_string().bold(),
        destination.to_string().bold(),
        commit.to_string().green()
    );
    git.working_tree_sync(&destination, commit).ok();
    Ok(())
}
