use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use forge_core::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One recorded approval: a tool name paired with the SHA-256 of the
/// exact command/source it was approved for. A later invocation only
/// reuses the approval if its hash matches — edit the command and the
/// approval no longer applies, per `spec.md` §4.3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApprovalRecord {
    pub tool: String,
    pub hash: String,
}

/// Content hash of whatever a tool call is asking permission to run
/// (a shell command string, a file-write payload, …).
pub fn hash_source(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Persisted approvals for one branch, stored at
/// `.forge/approved_tools.json` inside the branch's own tree (so
/// approvals travel with the branch, the same way session state does)
/// and mirrored here for the turn executor to consult without a round
/// trip through the VFS on every tool call.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ApprovalStore {
    records: BTreeMap<String, String>,
}

impl ApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_approved(&self, tool: &str, hash: &str) -> bool {
        self.records.get(tool).map(String::as_str) == Some(hash)
    }

    pub fn approve(&mut self, tool: impl Into<String>, hash: impl Into<String>) {
        self.records.insert(tool.into(), hash.into());
    }

    pub fn revoke(&mut self, tool: &str) {
        self.records.remove(tool);
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::Internal(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(bytes).map_err(|e| Error::Internal(e.to_string()))
    }

    /// Load from a file on disk, treating a missing file as "no
    /// approvals yet" rather than an error.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => Self::from_json(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Durably persist via a write-to-temp-then-rename, so a crash
    /// mid-write never leaves `.forge/approved_tools.json` truncated —
    /// the same atomic-replace idiom the teacher's git adapter uses
    /// when writing tree state (`GitRepository::commit_tree_overlay`
    /// never leaves a half-written ref either).
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let bytes = self.to_json()?;
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let tmp: PathBuf = parent.join(format!(
            ".{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("approved_tools")
        ));
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_only_matches_exact_hash() {
        let mut store = ApprovalStore::new();
        store.approve("run_tests", "deadbeef");
        assert!(store.is_approved("run_tests", "deadbeef"));
        assert!(!store.is_approved("run_tests", "other"));
        assert!(!store.is_approved("check", "deadbeef"));
    }

    #[test]
    fn round_trips_through_json() {
        let mut store = ApprovalStore::new();
        store.approve("check", hash_source(b"make test"));
        let bytes = store.to_json().unwrap();
        let reloaded = ApprovalStore::from_json(&bytes).unwrap();
        assert!(reloaded.is_approved("check", &hash_source(b"make test")));
    }

    #[test]
    fn save_then_load_round_trips_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".forge").join("approved_tools.json");
        let mut store = ApprovalStore::new();
        store.approve("run_tests", "abc123");
        store.save_to_path(&path).unwrap();

        let reloaded = ApprovalStore::load_from_path(&path).unwrap();
        assert!(reloaded.is_approved("run_tests", "abc123"));
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let store = ApprovalStore::load_from_path(&path).unwrap();
        assert!(!store.is_approved("check", "anything"));
    }
}
