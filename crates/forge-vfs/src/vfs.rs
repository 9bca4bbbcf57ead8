use std::collections::BTreeMap;
use std::sync::Arc;

use forge_core::{normalize_path, BranchName, Error, Result};
use forge_git::{GitRepository, Oid, TreeOverlay};
use tempfile::TempDir;

use crate::claim::{ClaimGuard, ClaimState};
use crate::overlay::Overlay;

const MAX_COMMIT_ATTEMPTS: u32 = 5;

/// Read access to repository content, independent of whether it is
/// backed by a frozen commit or a live overlay.
pub trait Vfs {
    fn read(&self, path: &str) -> Result<Vec<u8>>;
    fn list(&self, prefix: Option<&str>) -> Result<Vec<String>>;
}

/// A read-only view of exactly one commit — `spec.md` §4.2's
/// "commit view". Used for parent-branch reads and anywhere a turn
/// wants to address history without a claim.
pub struct CommitVfs {
    repo: Arc<GitRepository>,
    commit: Oid,
}

impl CommitVfs {
    pub fn new(repo: Arc<GitRepository>, commit: Oid) -> Self {
        Self { repo, commit }
    }

    pub fn commit(&self) -> Oid {
        self.commit
    }
}

impl Vfs for CommitVfs {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize_path(path)?;
        self.repo.read_tree_entry(self.commit, &path)
    }

    fn list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let files = self.repo.list_tree_files(self.commit)?;
        Ok(filter_by_prefix(files, prefix))
    }
}

/// The writable overlay over a branch's tip — `spec.md` §4.2's
/// "work-in-progress" VFS, the single closest analog of the teacher's
/// `dk-engine::workspace::session_workspace::SessionWorkspace`.
///
/// Reads resolve overlay-first, falling through to `base` on a miss.
/// Writes only ever touch the in-memory overlay; nothing here ever
/// writes to the working directory — that is
/// `GitRepository::working_tree_sync`'s job alone, and only ever
/// called after a successful [`Self::commit`].
pub struct WorkInProgressVfs {
    repo: Arc<GitRepository>,
    branch: BranchName,
    base: std::sync::RwLock<Option<Oid>>,
    overlay: Overlay,
    claim: ClaimState,
}

impl WorkInProgressVfs {
    /// Open a writable view of `branch`, capturing its current tip as
    /// the merge base for a later [`Self::commit`]. `None` means the
    /// branch has no commits yet.
    pub fn open(repo: Arc<GitRepository>, branch: BranchName) -> Result<Self> {
        let base = repo.branch_tip(&branch)?;
        Ok(Self {
            repo,
            branch,
            base: std::sync::RwLock::new(base),
            overlay: Overlay::new(),
            claim: ClaimState::default(),
        })
    }

    pub fn branch(&self) -> &BranchName {
        &self.branch
    }

    pub fn base(&self) -> Option<Oid> {
        *self.base.read().expect("vfs base lock poisoned")
    }

    pub fn claim(&self) -> Result<ClaimGuard<'_>> {
        self.claim.claim(self.branch.as_str())
    }

    pub fn write(&self, path: &str, content: Vec<u8>) -> Result<()> {
        let path = normalize_path(path)?;
        self.overlay.write(path, content);
        Ok(())
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        self.overlay.delete(path);
        Ok(())
    }

    pub fn revert(&self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        self.overlay.revert(&path);
        Ok(())
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    /// Drop every pending write without committing — a cancelled or
    /// conflicted turn's exit path, never a normal commit path (which
    /// clears the overlay itself once the new tree lands).
    pub fn discard_overlay(&self) {
        self.overlay.discard();
    }

    /// Build a sandbox directory containing the fully-resolved
    /// contents of this VFS (base tree with the overlay applied),
    /// for tools that need a real filesystem — `forge-tools`'
    /// `check`/`run_tests` sandboxed execution.
    pub fn materialize_to_tempdir(&self) -> Result<TempDir> {
        let dir = TempDir::new()?;
        let mut files: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        if let Some(base) = self.base() {
            for path in self.repo.list_tree_files(base)? {
                if let Some(bytes) = self.repo.read_tree_entry_opt(base, &path)? {
                    files.insert(path, bytes);
                }
            }
        }
        for path in self.overlay.list_paths() {
            match self.overlay.get(&path) {
                Some(entry) => match entry.content() {
                    Some(bytes) => {
                        files.insert(path, bytes.to_vec());
                    }
                    None => {
                        files.remove(&path);
                    }
                },
                None => {}
            }
        }
        for (path, bytes) in &files {
            let dest = dir.path().join(path);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&dest, bytes)?;
        }
        Ok(dir)
    }

    /// Land the overlay atomically on `self.branch`.
    ///
    /// Fast path: if the branch is still at `self.base`, the overlay
    /// commits directly as a child of it. If the branch has advanced
    /// (a sibling turn, or a parent session, committed meanwhile), each
    /// overlay path is rebased against the new tip using the same
    /// base/ours/theirs comparison `forge_git::three_way_merge` uses,
    /// just addressed against the overlay's sparse writes rather than
    /// a full second tree — `dk-engine::workspace::merge::merge_workspace`'s
    /// rebase path, generalised off `sqlx`.
    ///
    /// Races are retried up to [`MAX_COMMIT_ATTEMPTS`] times; conflicts
    /// are not retried and surface immediately as
    /// [`Error::MergeConflict`].
    pub fn commit(&self, author_name: &str, author_email: &str, message: &str) -> Result<Oid> {
        if self.overlay.is_empty() {
            return self
                .base()
                .ok_or_else(|| Error::Internal("nothing to commit on an unborn branch".into()));
        }

        let overlay_entries = self.overlay.as_tree_overlay();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let base = self.base();
            let tip = self.repo.branch_tip(&self.branch)?;

            let (parent, to_apply) = if tip == base {
                (base, overlay_entries.clone())
            } else {
                let tip = tip.expect("tip differs from base, so it cannot also be unborn");
                match self.rebase_onto(tip, &overlay_entries)? {
                    RebaseResult::Clean(applied) => (Some(tip), applied),
                    RebaseResult::Conflicts(paths) => return Err(Error::MergeConflict(paths)),
                }
            };

            let tree = self.repo.build_tree(parent, &to_apply)?;
            let parents: Vec<Oid> = parent.into_iter().collect();
            match self
                .repo
                .commit(tree, &parents, &self.branch, author_name, author_email, message)
            {
                Ok(commit) => {
                    // Land the new tip as the base for any further commit
                    // this same instance makes, and drop the overlay now
                    // that it is reflected in the branch — `spec.md` §4.2's
                    // "on success, clear overlay and advance base commit".
                    *self.base.write().expect("vfs base lock poisoned") = Some(commit);
                    self.overlay.discard();
                    return Ok(commit);
                }
                Err(Error::RefRaced { .. }) if attempt < MAX_COMMIT_ATTEMPTS => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn rebase_onto(&self, tip: Oid, overlay_entries: &TreeOverlay) -> Result<RebaseResult> {
        let mut resolved = Vec::with_capacity(overlay_entries.len());
        let mut conflicts = Vec::new();

        for (path, our_content) in overlay_entries {
            let base_content = match self.base() {
                Some(base) => self.repo.read_tree_entry_opt(base, path)?,
                None => None,
            };
            let tip_content = self.repo.read_tree_entry_opt(tip, path)?;

            if tip_content == base_content || tip_content == *our_content {
                resolved.push((path.clone(), our_content.clone()));
            } else {
                conflicts.push(path.clone());
            }
        }

        if conflicts.is_empty() {
            Ok(RebaseResult::Clean(resolved))
        } else {
            Ok(RebaseResult::Conflicts(conflicts))
        }
    }
}

enum RebaseResult {
    Clean(TreeOverlay),
    Conflicts(Vec<String>),
}

impl Vfs for WorkInProgressVfs {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize_path(path)?;
        if let Some(entry) = self.overlay.get(&path) {
            return entry
                .content()
                .map(<[u8]>::to_vec)
                .ok_or_else(|| Error::NotFound(path.clone()));
        }
        match self.base() {
            Some(base) => self.repo.read_tree_entry(base, &path),
            None => Err(Error::NotFound(path)),
        }
    }

    fn list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let mut paths: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        if let Some(base) = self.base() {
            paths.extend(self.repo.list_tree_files(base)?);
        }
        for path in self.overlay.list_paths() {
            match self.overlay.get(&path) {
                Some(entry) if entry.content().is_some() => {
                    paths.insert(path);
                }
                Some(_) => {
                    paths.remove(&path);
                }
                None => {}
            }
        }
        Ok(filter_by_prefix(paths.into_iter().collect(), prefix))
    }
}

fn filter_by_prefix(files: Vec<String>, prefix: Option<&str>) -> Vec<String> {
    match prefix {
        Some(p) => files.into_iter().filter(|f| f.starts_with(p)).collect(),
        None => files,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(name: &str) -> BranchName {
        BranchName::new(name).unwrap()
    }

    fn repo() -> (tempfile::TempDir, Arc<GitRepository>) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(GitRepository::init(dir.path()).unwrap());
        (dir, repo)
    }

    #[test]
    fn unborn_branch_reads_nothing() {
        let (_dir, repo) = repo();
        let vfs = WorkInProgressVfs::open(repo, branch("main")).unwrap();
        assert!(matches!(vfs.read("a.txt"), Err(Error::NotFound(_))));
        assert!(vfs.list(None).unwrap().is_empty());
    }

    #[test]
    fn write_then_read_resolves_from_overlay() {
        let (_dir, repo) = repo();
        let vfs = WorkInProgressVfs::open(repo, branch("main")).unwrap();
        vfs.write("a.txt", b"hello".to_vec()).unwrap();
        assert_eq!(vfs.read("a.txt").unwrap(), b"hello");
        assert_eq!(vfs.list(None).unwrap(), vec!["a.txt".to_string()]);
    }

    #[test]
    fn commit_then_reopen_sees_committed_content() {
        let (_dir, repo) = repo();
        let vfs = WorkInProgressVfs::open(repo.clone(), branch("main")).unwrap();
        vfs.write("a.txt", b"v1".to_vec()).unwrap();
        let commit = vfs.commit("Agent", "agent@forge.dev", "first turn").unwrap();

        let reopened = WorkInProgressVfs::open(repo.clone(), branch("main")).unwrap();
        assert_eq!(reopened.base(), Some(commit));
        assert_eq!(reopened.read("a.txt").unwrap(), b"v1");
    }

    #[test]
    fn a_second_commit_on_the_same_instance_starts_from_a_clean_overlay() {
        let (_dir, repo) = repo();
        let vfs = WorkInProgressVfs::open(repo.clone(), branch("main")).unwrap();
        vfs.write("a.txt", b"v1".to_vec()).unwrap();
        let first = vfs.commit("Agent", "agent@forge.dev", "first turn").unwrap();
        assert!(vfs.overlay().is_empty());
        assert_eq!(vfs.base(), Some(first));

        vfs.write("b.txt", b"v2".to_vec()).unwrap();
        let second = vfs.commit("Agent", "agent@forge.dev", "second turn").unwrap();
        assert_eq!(vfs.base(), Some(second));
        assert_eq!(vfs.read("a.txt").unwrap(), b"v1");
        assert_eq!(vfs.read("b.txt").unwrap(), b"v2");
    }

    #[test]
    fn delete_then_commit_removes_the_path() {
        let (_dir, repo) = repo();
        let vfs = WorkInProgressVfs::open(repo.clone(), branch("main")).unwrap();
        vfs.write("a.txt", b"v1".to_vec()).unwrap();
        vfs.commit("Agent", "agent@forge.dev", "seed").unwrap();

        let vfs2 = WorkInProgressVfs::open(repo.clone(), branch("main")).unwrap();
        vfs2.delete("a.txt").unwrap();
        vfs2.commit("Agent", "agent@forge.dev", "delete").unwrap();

        let vfs3 = WorkInProgressVfs::open(repo, branch("main")).unwrap();
        assert!(vfs3.list(None).unwrap().is_empty());
    }

    #[test]
    fn disjoint_concurrent_commits_both_land_via_rebase() {
        let (_dir, repo) = repo();
        let seed = WorkInProgressVfs::open(repo.clone(), branch("main")).unwrap();
        seed.write("shared.txt", b"base".to_vec()).unwrap();
        seed.commit("Agent", "agent@forge.dev", "seed").unwrap();

        let claim_a = WorkInProgressVfs::open(repo.clone(), branch("main")).unwrap();
        let claim_b = WorkInProgressVfs::open(repo.clone(), branch("main")).unwrap();
        claim_a.write("a.txt", b"from a".to_vec()).unwrap();
        claim_b.write("b.txt", b"from b".to_vec()).unwrap();

        claim_a.commit("Agent", "agent@forge.dev", "a commits first").unwrap();
        // claim_b's base is now stale; its commit must rebase rather than race forever.
        claim_b.commit("Agent", "agent@forge.dev", "b commits second").unwrap();

        let tip = WorkInProgressVfs::open(repo, branch("main")).unwrap();
        let files = tip.list(None).unwrap();
        assert!(files.contains(&"a.txt".to_string()));
        assert!(files.contains(&"b.txt".to_string()));
        assert!(files.contains(&"shared.txt".to_string()));
    }

    #[test]
    fn conflicting_concurrent_edits_surface_as_merge_conflict() {
        let (_dir, repo) = repo();
        let seed = WorkInProgressVfs::open(repo.clone(), branch("main")).unwrap();
        seed.write("shared.txt", b"base".to_vec()).unwrap();
        seed.commit("Agent", "agent@forge.dev", "seed").unwrap();

        let claim_a = WorkInProgressVfs::open(repo.clone(), branch("main")).unwrap();
        let claim_b = WorkInProgressVfs::open(repo.clone(), branch("main")).unwrap();
        claim_a.write("shared.txt", b"from a".to_vec()).unwrap();
        claim_b.write("shared.txt", b"from b".to_vec()).unwrap();

        claim_a.commit("Agent", "agent@forge.dev", "a commits first").unwrap();
        let err = claim_b
            .commit("Agent", "agent@forge.dev", "b commits second")
            .unwrap_err();
        assert!(matches!(err, Error::MergeConflict(_)));
    }
}
