use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// A single path's pending change in a writable VFS's overlay.
///
/// Generalises `dk-engine::workspace::overlay::OverlayEntry`, stripped
/// of the teacher's `Modified`/`Added` split (and the `sqlx`-backed
/// persistence that went with it, per Redesign Flag #1) — nothing
/// downstream of the overlay cares whether a write replaced an
/// existing blob or created a new one, only whether the path currently
/// resolves to content or to a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayEntry {
    Write(Vec<u8>),
    Delete,
}

impl OverlayEntry {
    pub fn content(&self) -> Option<&[u8]> {
        match self {
            Self::Write(bytes) => Some(bytes),
            Self::Delete => None,
        }
    }

    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        if let Self::Write(bytes) = self {
            hasher.update(bytes);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// The in-memory, per-branch set of pending writes layered over a
/// commit view. Lock-free via `DashMap`, same as the teacher's
/// `FileOverlay`, but entirely in-process: no `PgPool`, no
/// `session_overlay_files` table. State lives only as long as the
/// owning `WorkInProgressVfs` does; durability comes from committing,
/// not from a database row.
#[derive(Debug, Default)]
pub struct Overlay {
    entries: DashMap<String, OverlayEntry>,
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, path: String, content: Vec<u8>) {
        self.entries.insert(path, OverlayEntry::Write(content));
    }

    pub fn delete(&self, path: String) {
        self.entries.insert(path, OverlayEntry::Delete);
    }

    /// Drop a path's pending change so it falls back to the underlying
    /// commit view again (the overlay equivalent of an undo).
    pub fn revert(&self, path: &str) {
        self.entries.remove(path);
    }

    /// Drop every pending change at once — a cancelled or conflicted
    /// turn discards its whole overlay rather than reverting path by
    /// path.
    pub fn discard(&self) {
        self.entries.clear();
    }

    pub fn get(&self, path: &str) -> Option<OverlayEntry> {
        self.entries.get(path).map(|e| e.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.entries
            .iter()
            .filter_map(|e| e.value().content().map(<[u8]>::len))
            .sum()
    }

    /// Every path with a pending change, sorted for deterministic tool
    /// output.
    pub fn list_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    /// Snapshot the overlay as `(path, Some(content) | None)` pairs,
    /// the shape `forge_git::GitRepository::build_tree` and `::commit`
    /// consume — the direct analog of the teacher's
    /// `SessionWorkspace::overlay_for_tree`.
    pub fn as_tree_overlay(&self) -> forge_git::TreeOverlay {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().content().map(<[u8]>::to_vec)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_delete_then_revert() {
        let overlay = Overlay::new();
        overlay.write("a.txt".into(), b"hi".to_vec());
        assert_eq!(overlay.get("a.txt"), Some(OverlayEntry::Write(b"hi".to_vec())));

        overlay.delete("a.txt".into());
        assert_eq!(overlay.get("a.txt"), Some(OverlayEntry::Delete));

        overlay.revert("a.txt");
        assert_eq!(overlay.get("a.txt"), None);
    }

    #[test]
    fn discard_clears_every_pending_entry() {
        let overlay = Overlay::new();
        overlay.write("a.txt".into(), b"hi".to_vec());
        overlay.delete("b.txt".into());
        overlay.discard();
        assert!(overlay.is_empty());
    }

    #[test]
    fn total_bytes_ignores_deletes() {
        let overlay = Overlay::new();
        overlay.write("a.txt".into(), b"abc".to_vec());
        overlay.delete("b.txt".into());
        assert_eq!(overlay.total_bytes(), 3);
    }

    #[test]
    fn hash_is_stable_for_identical_content() {
        let a = OverlayEntry::Write(b"same".to_vec());
        let b = OverlayEntry::Write(b"same".to_vec());
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), OverlayEntry::Delete.hash());
    }
}
