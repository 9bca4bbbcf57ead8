use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A git branch name, validated at construction.
///
/// Branches are equal in status in this model (`spec.md` §3): identity
/// is the name itself, not some numeric workspace id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BranchName(String);

impl BranchName {
    pub fn new(name: impl Into<String>) -> Result<Self, crate::Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::Error::BadPath("branch name cannot be empty".into()));
        }
        if name.starts_with('/') || name.ends_with('/') || name.contains("//") {
            return Err(crate::Error::BadPath(format!(
                "invalid branch name '{name}'"
            )));
        }
        if name.contains("..") || name.contains(['~', '^', ':', '?', '*', '[', '\\']) {
            return Err(crate::Error::BadPath(format!(
                "invalid branch name '{name}'"
            )));
        }
        if name.as_bytes().iter().any(|b| *b < 0x20 || *b == 0x7f) {
            return Err(crate::Error::BadPath(format!(
                "invalid branch name '{name}'"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier for a turn-unique tool invocation, generated by the model
/// and bound to its eventual result (`spec.md` §3, "Tool call reference").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolCallId(pub String);

impl fmt::Display for ToolCallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type SessionId = Uuid;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_names() {
        assert!(BranchName::new("main").is_ok());
        assert!(BranchName::new("agent/fix-bug-123").is_ok());
    }

    #[test]
    fn rejects_empty_and_slashes() {
        assert!(BranchName::new("").is_err());
        assert!(BranchName::new("/main").is_err());
        assert!(BranchName::new("main/").is_err());
        assert!(BranchName::new("a//b").is_err());
    }

    #[test]
    fn rejects_git_reserved_sequences() {
        assert!(BranchName::new("a..b").is_err());
        assert!(BranchName::new("a~b").is_err());
        assert!(BranchName::new("a*b").is_err());
    }
}
