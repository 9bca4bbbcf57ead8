use std::collections::BTreeSet;

use forge_core::{BranchName, Error, Result};
use forge_git::{GitRepository, Oid, TreeOverlay};

use crate::store::SESSION_FILE_PATH;

/// Merge `source` into `destination`, landing the result as a new
/// commit on `destination` — `spec.md` §4.5's branch-merge operation.
///
/// Every path but the session record follows the same byte-level
/// three-way rule as [`forge_git::three_way_merge`] (a path conflicts
/// only when both sides changed it from the common base and disagree);
/// `.forge/session.json` is never subject to that rule at all; it
/// always resolves to destination's copy, with source's own copy
/// preserved at `.forge/merged/<source>.json` so the conversation that
/// ran on `source` is not lost, just no longer the branch's active
/// session (`spec.md` §4.5: "archiving the source branch's session ...
/// and keeping the destination's file"). A real conflict anywhere else
/// in the tree still aborts the merge with [`Error::MergeConflict`]
/// and leaves both branch refs untouched.
pub fn merge_branch(
    repo: &GitRepository,
    source: &BranchName,
    destination: &BranchName,
    author_name: &str,
    author_email: &str,
) -> Result<Oid> {
    let source_tip = repo
        .branch_tip(source)?
        .ok_or_else(|| Error::NotFound(format!("branch '{source}' has no commits")))?;
    let dest_tip = repo
        .branch_tip(destination)?
        .ok_or_else(|| Error::NotFound(format!("branch '{destination}' has no commits")))?;

    if source_tip == dest_tip {
        return Ok(dest_tip);
    }

    let base = repo.merge_base(source_tip, dest_tip)?.ok_or_else(|| {
        Error::MergeConflict(vec![format!("'{source}' and '{destination}' share no common history")])
    })?;

    let mut paths: BTreeSet<String> = BTreeSet::new();
    paths.extend(repo.list_tree_files(base)?);
    paths.extend(repo.list_tree_files(dest_tip)?);
    paths.extend(repo.list_tree_files(source_tip)?);

    let mut overlay: TreeOverlay = Vec::new();
    let mut conflicts = Vec::new();

    for path in paths {
        // The session record is resolved by the fixed archive-and-keep
        // policy below, never by the general three-way rule.
        if path == SESSION_FILE_PATH {
            continue;
        }
        let base_content = repo.read_tree_entry_opt(base, &path)?;
        let ours_content = repo.read_tree_entry_opt(dest_tip, &path)?;
        let theirs_content = repo.read_tree_entry_opt(source_tip, &path)?;

        if ours_content == theirs_content {
            overlay.push((path, ours_content));
        } else if base_content == ours_content {
            overlay.push((path, theirs_content));
        } else if base_content == theirs_content {
            overlay.push((path, ours_content));
        } else {
            conflicts.push(path);
        }
    }

    if !conflicts.is_empty() {
        return Err(Error::MergeConflict(conflicts));
    }

    if let Some(bytes) = repo.read_tree_entry_opt(dest_tip, SESSION_FILE_PATH)? {
        overlay.push((SESSION_FILE_PATH.to_string(), Some(bytes)));
    }
    if let Some(bytes) = repo.read_tree_entry_opt(source_tip, SESSION_FILE_PATH)? {
        overlay.push((format!(".forge/merged/{source}.json"), Some(bytes)));
    }

    let tree = repo.build_tree(None, &overlay)?;
    repo.commit(
        tree,
        &[dest_tip, source_tip],
        destination,
        author_name,
        author_email,
        &format!("merge {source} into {destination}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(name: &str) -> BranchName {
        BranchName::new(name).unwrap()
    }

    fn seed(repo: &GitRepository, branch: &BranchName, files: &[(&str, &str)]) -> Oid {
        let overlay: TreeOverlay = files.iter().map(|(p, c)| (p.to_string(), Some(c.as_bytes().to_vec()))).collect();
        let tree = repo.build_tree(None, &overlay).unwrap();
        repo.commit(tree, &[], branch, "Agent", "agent@forge.dev", "seed").unwrap()
    }

    fn amend(repo: &GitRepository, branch: &BranchName, parent: Oid, files: &[(&str, &str)]) -> Oid {
        let overlay: TreeOverlay = files.iter().map(|(p, c)| (p.to_string(), Some(c.as_bytes().to_vec()))).collect();
        let tree = repo.build_tree(Some(parent), &overlay).unwrap();
        repo.commit(tree, &[parent], branch, "Agent", "agent@forge.dev", "amend").unwrap()
    }

    #[test]
    fn disjoint_edits_merge_and_archive_source_session() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        let main = branch("main");
        let feature = branch("agent/feature");

        let base = seed(&repo, &main, &[("shared.txt", "base"), (".forge/session.json", "{\"dest\":true}")]);
        repo.fork_branch(&feature, base).unwrap();

        amend(&repo, &main, base, &[("a.txt", "from main"), (".forge/session.json", "{\"dest\":true}")]);
        amend(&repo, &feature, base, &[("b.txt", "from feature"), (".forge/session.json", "{\"source\":true}")]);

        let merged = merge_branch(&repo, &feature, &main, "Agent", "agent@forge.dev").unwrap();

        assert_eq!(repo.read_tree_entry(merged, "a.txt").unwrap(), b"from main");
        assert_eq!(repo.read_tree_entry(merged, "b.txt").unwrap(), b"from feature");
        assert_eq!(repo.read_tree_entry(merged, ".forge/session.json").unwrap(), b"{\"dest\":true}");
        assert_eq!(
            repo.read_tree_entry(merged, ".forge/merged/agent/feature.json").unwrap(),
            b"{\"source\":true}"
        );
    }

    #[test]
    fn a_real_conflict_outside_the_session_file_still_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        let main = branch("main");
        let feature = branch("agent/feature");

        let base = seed(&repo, &main, &[("shared.txt", "base")]);
        repo.fork_branch(&feature, base).unwrap();

        amend(&repo, &main, base, &[("shared.txt", "from main")]);
        amend(&repo, &feature, base, &[("shared.txt", "from feature")]);

        let dest_before = repo.branch_tip(&main).unwrap();
        let err = merge_branch(&repo, &feature, &main, "Agent", "agent@forge.dev").unwrap_err();
        assert!(matches!(err, Error::MergeConflict(_)));
        assert_eq!(repo.branch_tip(&main).unwrap(), dest_before);
    }

    #[test]
    fn merging_a_branch_into_itself_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        let main = branch("main");
        let tip = seed(&repo, &main, &[("a.txt", "1")]);

        let result = merge_branch(&repo, &main, &main, "Agent", "agent@forge.dev").unwrap();
        assert_eq!(result, tip);
    }
}
