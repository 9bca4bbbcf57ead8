use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use forge_core::{BranchName, Error, Result};
use gix::refs::transaction::{Change, LogChange, PreviousValue, RefEdit, RefLog};
use gix::refs::Target;

use crate::Oid;

/// A single resolved path/content pair inside a tree, used both as the
/// overlay format handed to [`GitRepository::build_tree`] and as the
/// per-path result of [`crate::merge::three_way_merge`].
///
/// `None` means "delete this path"; mirrors the teacher's
/// `dk-engine::workspace::session_workspace::overlay_for_tree` shape
/// (`Vec<(String, Option<Vec<u8>>)>`) almost unchanged.
pub type TreeOverlay = Vec<(String, Option<Vec<u8>>)>;

/// Adapter over a single on-disk git object store.
///
/// Generalises `dk-engine::git::repository::GitRepository`: where the
/// teacher always reads/writes against the literal `"HEAD"` ref and
/// shells out to the `git` binary for the working tree, every operation
/// here takes an explicit [`BranchName`] and a true compare-and-swap
/// update goes through `gix`'s reference transaction machinery — no
/// subprocess, no `"HEAD"` hardcoding.
pub struct GitRepository {
    inner: gix::Repository,
    path: PathBuf,
}

impl GitRepository {
    /// Open an existing repository at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = gix::open(&path).map_err(|e| Error::Git(e.to_string()))?;
        Ok(Self { inner, path })
    }

    /// Initialise a fresh repository at `path`, creating it if absent.
    pub fn init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        let inner = gix::init(&path).map_err(|e| Error::Git(e.to_string()))?;
        Ok(Self { inner, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn inner(&self) -> &gix::Repository {
        &self.inner
    }

    /// The commit currently at the tip of `branch`, or `None` if the
    /// branch has never been committed to.
    pub fn branch_tip(&self, branch: &BranchName) -> Result<Option<Oid>> {
        let full_name = format!("refs/heads/{branch}");
        match self.inner.try_find_reference(full_name.as_str()) {
            Ok(Some(mut r)) => {
                let id = r.peel_to_id_in_place().map_err(|e| Error::Git(e.to_string()))?;
                Ok(Some(Oid::from(id.detach())))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(Error::Git(e.to_string())),
        }
    }

    /// The branch currently checked out via `HEAD`, if any (a detached
    /// `HEAD` or an unborn repository both yield `None`).
    pub fn checked_out_branch(&self) -> Result<Option<BranchName>> {
        let head = self.inner.head().map_err(|e| Error::Git(e.to_string()))?;
        match head.referent_name() {
            Some(name) => {
                let short = name.shorten().to_string();
                Ok(BranchName::new(short).ok())
            }
            None => Ok(None),
        }
    }

    fn tree_of_commit(&self, commit: Oid) -> Result<gix::ObjectId> {
        let commit_obj = self
            .inner
            .find_object(commit.inner())
            .map_err(|e| Error::Git(e.to_string()))?
            .try_into_commit()
            .map_err(|e| Error::CorruptObject(e.to_string()))?;
        let tree_id = commit_obj
            .tree_id()
            .map_err(|e| Error::CorruptObject(e.to_string()))?;
        Ok(tree_id.detach())
    }

    /// Resolve `commit`'s tree for callers (e.g. the merge module) that
    /// need to address a tree directly rather than through a path read.
    pub(crate) fn resolve_tree(&self, commit: Oid) -> Result<gix::ObjectId> {
        self.tree_of_commit(commit)
    }

    /// Read the blob at `path` inside `tree`, or `None` if the path is
    /// absent or not a blob.
    pub(crate) fn read_blob_from_tree(
        &self,
        tree: gix::ObjectId,
        path: &str,
    ) -> Result<Option<Vec<u8>>> {
        let tree = self
            .inner
            .find_object(tree)
            .map_err(|e| Error::Git(e.to_string()))?
            .try_into_tree()
            .map_err(|e| Error::CorruptObject(e.to_string()))?;
        let Some(entry) = tree
            .lookup_entry_by_path(path)
            .map_err(|e| Error::Git(e.to_string()))?
        else {
            return Ok(None);
        };
        if !entry.mode().is_blob() {
            return Ok(None);
        }
        let blob = entry
            .object()
            .map_err(|e| Error::Git(e.to_string()))?
            .try_into_blob()
            .map_err(|e| Error::CorruptObject(e.to_string()))?;
        Ok(Some(blob.data.clone()))
    }

    /// Read the blob at `path` as of `commit`. Errors with `NotFound` if
    /// the path is absent, and `Binary` is left to the caller (the VFS
    /// layer decides what "text" means for a tool result).
    pub fn read_tree_entry(&self, commit: Oid, path: &str) -> Result<Vec<u8>> {
        let tree = self.tree_of_commit(commit)?;
        self.read_blob_from_tree(tree, path)?
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    /// Like [`Self::read_tree_entry`] but `None` rather than `NotFound`
    /// for an absent path — the shape the three-way merge and rebase
    /// logic in `forge-vfs` needs when a path may legitimately be
    /// missing from one side.
    pub fn read_tree_entry_opt(&self, commit: Oid, path: &str) -> Result<Option<Vec<u8>>> {
        let tree = self.tree_of_commit(commit)?;
        self.read_blob_from_tree(tree, path)
    }

    /// Enumerate every blob path reachable from `tree`, breadth-first —
    /// ported from `dk-engine::git::repository::GitRepository::list_tree_files`.
    pub(crate) fn list_files_in_tree(&self, tree: gix::ObjectId) -> Result<Vec<String>> {
        let tree = self
            .inner
            .find_object(tree)
            .map_err(|e| Error::Git(e.to_string()))?
            .try_into_tree()
            .map_err(|e| Error::CorruptObject(e.to_string()))?;
        let mut files = Vec::new();
        let mut recorder = gix::traverse::tree::Recorder::default();
        tree.traverse()
            .breadthfirst(&mut recorder)
            .map_err(|e| Error::Git(e.to_string()))?;
        for entry in recorder.records {
            if entry.mode.is_blob() {
                files.push(entry.filepath.to_string());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Enumerate every file path as of `commit`.
    pub fn list_tree_files(&self, commit: Oid) -> Result<Vec<String>> {
        let tree = self.tree_of_commit(commit)?;
        self.list_files_in_tree(tree)
    }

    /// Write `bytes` as a loose blob and return its id.
    pub fn write_blob(&self, bytes: &[u8]) -> Result<Oid> {
        let id = self
            .inner
            .write_blob(bytes)
            .map_err(|e| Error::Git(e.to_string()))?;
        Ok(Oid::from(id.detach()))
    }

    /// Build a tree starting from `base` (or the empty tree if `None`)
    /// with `overlay` applied path-by-path — `Some(content)` upserts a
    /// blob, `None` removes the path. Generalises
    /// `dk-engine::git::repository::GitRepository::commit_tree_overlay`'s
    /// tree-editing half, split out from commit creation so the merge
    /// module can build a tree without also minting a commit.
    pub fn build_tree(&self, base: Option<Oid>, overlay: &TreeOverlay) -> Result<Oid> {
        let base_tree = match base {
            Some(commit) => self.tree_of_commit(commit)?,
            None => self
                .inner
                .empty_tree()
                .id()
                .detach(),
        };
        self.apply_overlay_to_tree_id(base_tree, overlay)
    }

    fn apply_overlay_to_tree_id(&self, base_tree: gix::ObjectId, overlay: &TreeOverlay) -> Result<Oid> {
        let mut editor = self
            .inner
            .edit_tree(base_tree)
            .map_err(|e| Error::Git(e.to_string()))?;
        for (path, content) in overlay {
            match content {
                Some(bytes) => {
                    let blob_id = self
                        .inner
                        .write_blob(bytes)
                        .map_err(|e| Error::Git(e.to_string()))?;
                    editor
                        .upsert(
                            path.as_str(),
                            gix::object::tree::EntryKind::Blob,
                            blob_id,
                        )
                        .map_err(|e| Error::Git(e.to_string()))?;
                }
                None => {
                    editor
                        .remove(path.as_str())
                        .map_err(|e| Error::Git(e.to_string()))?;
                }
            }
        }
        let new_tree = editor.write().map_err(|e| Error::Git(e.to_string()))?;
        Ok(Oid::from(new_tree.detach()))
    }

    /// Create a commit object with `tree`/`parents` and land it at the
    /// tip of `branch` via a compare-and-swap reference update.
    ///
    /// The CAS check is against `parents.first()`: the caller is
    /// expected to have read that commit as `branch`'s current tip
    /// before building `tree`, exactly the "base commit captured at
    /// claim time" flow in `spec.md` §4.2. If the branch has since
    /// advanced (or, for a brand-new branch, already exists), the
    /// reference update is rejected and this returns
    /// [`Error::RefRaced`] rather than silently overwriting history —
    /// the teacher's unconditional `git checkout HEAD` / shell commit
    /// has no such check at all.
    pub fn commit(
        &self,
        tree: Oid,
        parents: &[Oid],
        branch: &BranchName,
        author_name: &str,
        author_email: &str,
        message: &str,
    ) -> Result<Oid> {
        let signature = gix::actor::Signature {
            name: author_name.into(),
            email: author_email.into(),
            time: gix::date::Time::now_local_or_utc(),
        };
        let commit_obj = gix::objs::Commit {
            tree: tree.inner(),
            parents: parents.iter().map(|p| p.inner()).collect(),
            author: signature.clone(),
            committer: signature,
            encoding: None,
            message: message.into(),
            extra_headers: Vec::new(),
        };
        let new_commit_id = self
            .inner
            .write_object(&commit_obj)
            .map_err(|e| Error::Git(e.to_string()))?
            .detach();

        let expected = parents.first().copied();
        self.update_branch_ref(branch, new_commit_id, expected)?;
        Ok(Oid::from(new_commit_id))
    }

    /// Create `new_branch` pointing at `from` — a fresh ref, not a new
    /// commit — so the new branch's history is indistinguishable from
    /// `from`'s own branch at the moment of the fork (`spec.md` §8 item
    /// 6: "the new branch's HEAD tree is byte-equal to [the source
    /// branch]'s current HEAD tree"). Used by
    /// `forge-session::registry::SessionRegistry::spawn_child` so a
    /// child session's branch starts with the parent's full tree
    /// rather than unborn.
    ///
    /// Fails with [`Error::RefRaced`] if `new_branch` already exists —
    /// forking is only ever meant to create a brand-new branch.
    pub fn fork_branch(&self, new_branch: &BranchName, from: Oid) -> Result<()> {
        self.update_branch_ref(new_branch, from.inner(), None)
    }

    /// The nearest common ancestor of two commits, if any — used by
    /// branch-level merge (as opposed to [`crate::merge::three_way_merge`]'s
    /// caller-supplied base) to find that base automatically.
    pub fn merge_base(&self, a: Oid, b: Oid) -> Result<Option<Oid>> {
        if a == b {
            return Ok(Some(a));
        }
        match self.inner.merge_base(a.inner(), b.inner()) {
            Ok(id) => Ok(Some(Oid::from(id.detach()))),
            Err(_) => Ok(None),
        }
    }

    fn update_branch_ref(
        &self,
        branch: &BranchName,
        new_oid: gix::ObjectId,
        expected: Option<Oid>,
    ) -> Result<()> {
        let full_name = format!("refs/heads/{branch}");
        let previous = match expected {
            Some(oid) => PreviousValue::MustExistAndMatch(Target::Object(oid.inner())),
            None => PreviousValue::MustNotExist,
        };
        let edit = RefEdit {
            change: Change::Update {
                log: LogChange {
                    message: format!("forge: commit to {branch}").into(),
                    force_create_reflog: false,
                    ref_log: RefLog::AndReference,
                },
                expected: previous,
                new: Target::Object(new_oid),
            },
            name: full_name
                .try_into()
                .map_err(|e| Error::Git(format!("invalid ref name: {e}")))?,
            deref: false,
        };
        self.inner
            .edit_reference(edit)
            .map_err(|_| Error::RefRaced {
                branch: branch.to_string(),
            })?;
        Ok(())
    }

    /// Fast-forward the working directory to `target` — the only
    /// function in this crate allowed to touch files outside `.git`.
    ///
    /// A no-op if `branch` is not the currently checked-out branch
    /// (nothing in the workdir reflects it). Refuses with
    /// [`Error::WorkdirDirty`] if the tree has uncommitted changes,
    /// since `spec.md`'s Non-goals rule out any edit-tracking beyond
    /// this fast-forward sync — there is nothing to merge with local
    /// edits, so the safe move is to refuse rather than clobber them.
    /// Replaces the teacher's unconditional, always-fire
    /// `git checkout HEAD -- .` shell-out.
    pub fn working_tree_sync(&self, branch: &BranchName, target: Oid) -> Result<()> {
        if self.checked_out_branch()?.as_ref() != Some(branch) {
            return Ok(());
        }
        let dirty = self.inner.is_dirty().map_err(|e| Error::Git(e.to_string()))?;
        if dirty {
            return Err(Error::WorkdirDirty(branch.to_string()));
        }

        let tree = self.tree_of_commit(target)?;
        let files = self.list_files_in_tree(tree)?;
        let mut wanted: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for path in &files {
            if let Some(bytes) = self.read_blob_from_tree(tree, path)? {
                wanted.insert(path.clone(), bytes);
            }
        }

        for entry in walk_workdir(&self.path) {
            let Ok(relative) = entry.strip_prefix(&self.path) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            if !wanted.contains_key(relative.as_str()) {
                let _ = std::fs::remove_file(&entry);
            }
        }
        for (path, bytes) in &wanted {
            let dest = self.path.join(path);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&dest, bytes)?;
        }
        Ok(())
    }
}

fn walk_workdir(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.components().any(|c| c.as_os_str() == ".git") {
                continue;
            }
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(name: &str) -> BranchName {
        BranchName::new(name).unwrap()
    }

    #[test]
    fn fresh_repository_has_no_tip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        assert!(repo.branch_tip(&branch("main")).unwrap().is_none());
    }

    #[test]
    fn commit_then_read_round_trips_content() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        let overlay: TreeOverlay = vec![("hello.txt".into(), Some(b"hi there".to_vec()))];
        let tree = repo.build_tree(None, &overlay).unwrap();
        let commit = repo
            .commit(tree, &[], &branch("main"), "Agent", "agent@forge.dev", "seed")
            .unwrap();
        assert_eq!(repo.read_tree_entry(commit, "hello.txt").unwrap(), b"hi there");
        assert_eq!(repo.list_tree_files(commit).unwrap(), vec!["hello.txt".to_string()]);
    }

    #[test]
    fn commit_against_stale_parent_races() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        let b = branch("main");
        let tree1 = repo.build_tree(None, &vec![("a.txt".into(), Some(b"1".to_vec()))]).unwrap();
        let c1 = repo.commit(tree1, &[], &b, "Agent", "agent@forge.dev", "first").unwrap();

        let tree2 = repo.build_tree(Some(c1), &vec![("b.txt".into(), Some(b"2".to_vec()))]).unwrap();
        let _c2 = repo.commit(tree2, &[c1], &b, "Agent", "agent@forge.dev", "second").unwrap();

        // Retrying against the now-stale `c1` parent must race, not overwrite.
        let tree3 = repo.build_tree(Some(c1), &vec![("c.txt".into(), Some(b"3".to_vec()))]).unwrap();
        let err = repo.commit(tree3, &[c1], &b, "Agent", "agent@forge.dev", "stale").unwrap_err();
        assert!(matches!(err, Error::RefRaced { .. }));
    }

    #[test]
    fn committing_a_second_root_commit_races_must_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        let b = branch("main");
        let tree1 = repo.build_tree(None, &vec![("a.txt".into(), Some(b"1".to_vec()))]).unwrap();
        let _c1 = repo.commit(tree1, &[], &b, "Agent", "agent@forge.dev", "first").unwrap();

        let tree2 = repo.build_tree(None, &vec![("z.txt".into(), Some(b"z".to_vec()))]).unwrap();
        let err = repo.commit(tree2, &[], &b, "Agent", "agent@forge.dev", "root again").unwrap_err();
        assert!(matches!(err, Error::RefRaced { .. }));
    }
}
