use std::path::PathBuf;

use anyhow::{Context, Result};

/// Discover the repository root by walking up from the current
/// directory, the same `gix::discover` the repository adapter's own
/// `GitRepository::open` is layered over.
pub fn discover_repo_root() -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    let repo = gix::discover(&cwd).context("not a forge repository (or any parent up to mount point)")?;
    let root = repo
        .workdir()
        .context("repository has no working directory")?
        .to_path_buf();
    Ok(root)
}
