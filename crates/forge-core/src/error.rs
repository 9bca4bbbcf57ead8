use thiserror::Error;

/// The full error taxonomy surfaced by the engine.
///
/// Every user-visible failure names one of these kinds; there is no
/// silent fallback path. Tool-level kinds (`BadPath`, `NotFound`,
/// `ToolFailed`, `ToolTimeout`, `Binary`) are meant to be turned back
/// into tool-result messages by the turn executor rather than aborting
/// a turn — see `forge-session::turn`.
#[derive(Error, Debug)]
pub enum Error {
    // ── Input errors ──────────────────────────────────────────────
    #[error("bad path '{0}': not normalised or escapes the repository root")]
    BadPath(String),

    #[error("bad arguments for tool '{tool}': {detail}")]
    BadArguments { tool: String, detail: String },

    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("approval required for tool '{tool}' (source hash {hash})")]
    ApprovalRequired { tool: String, hash: String },

    // ── VFS errors ────────────────────────────────────────────────
    #[error("not found: {0}")]
    NotFound(String),

    #[error("read-only view: cannot write '{0}'")]
    ReadOnly(String),

    #[error("'{0}' is binary and was requested as text")]
    Binary(String),

    #[error("overlay poisoned: a claim was not released cleanly")]
    OverlayPoisoned,

    // ── Git errors ────────────────────────────────────────────────
    #[error("ref '{branch}' raced: tip advanced since base was captured")]
    RefRaced { branch: String },

    #[error("merge conflict on {0} path(s)")]
    MergeConflict(Vec<String>),

    #[error("working tree is dirty: refusing to sync branch '{0}'")]
    WorkdirDirty(String),

    #[error("corrupt git object {0}")]
    CorruptObject(String),

    // ── Model/transport errors ────────────────────────────────────
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("model protocol error: {0}")]
    ModelProtocolError(String),

    #[error("quota exhausted")]
    QuotaExhausted,

    #[error("authentication failure")]
    AuthFailure,

    // ── Execution errors ──────────────────────────────────────────
    #[error("tool '{tool}' timed out after {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    #[error("tool '{tool}' failed: {detail}")]
    ToolFailed { tool: String, detail: String },

    #[error("cancelled")]
    Cancelled,

    // ── State errors ──────────────────────────────────────────────
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    #[error("git error: {0}")]
    Git(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// A stable, lowercase-snake-case tag naming the error's kind, for
    /// structured event payloads (`error(kind, detail)` in `spec.md` §6).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadPath(_) => "bad_path",
            Self::BadArguments { .. } => "bad_arguments",
            Self::UnknownTool(_) => "unknown_tool",
            Self::ApprovalRequired { .. } => "approval_required",
            Self::NotFound(_) => "not_found",
            Self::ReadOnly(_) => "read_only",
            Self::Binary(_) => "binary",
            Self::OverlayPoisoned => "overlay_poisoned",
            Self::RefRaced { .. } => "ref_raced",
            Self::MergeConflict(_) => "merge_conflict",
            Self::WorkdirDirty(_) => "workdir_dirty",
            Self::CorruptObject(_) => "corrupt_object",
            Self::ModelUnavailable(_) => "model_unavailable",
            Self::ModelProtocolError(_) => "model_protocol_error",
            Self::QuotaExhausted => "quota_exhausted",
            Self::AuthFailure => "auth_failure",
            Self::ToolTimeout { .. } => "tool_timeout",
            Self::ToolFailed { .. } => "tool_failed",
            Self::Cancelled => "cancelled",
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::Git(_) => "git",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether a model/transport error should be retried within the
    /// turn's retry budget (`spec.md` §4.6). Authentication, quota, and
    /// malformed-schema failures are non-retriable.
    pub fn is_retriable_model_error(&self) -> bool {
        matches!(self, Self::ModelUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_snake_case() {
        assert_eq!(Error::BadPath("x".into()).kind(), "bad_path");
        assert_eq!(Error::OverlayPoisoned.kind(), "overlay_poisoned");
        assert_eq!(
            Error::RefRaced { branch: "main".into() }.kind(),
            "ref_raced"
        );
    }

    #[test]
    fn retriable_classification() {
        assert!(Error::ModelUnavailable("timeout".into()).is_retriable_model_error());
        assert!(!Error::AuthFailure.is_retriable_model_error());
        assert!(!Error::QuotaExhausted.is_retriable_model_error());
    }

    #[test]
    fn merge_conflict_reports_path_count() {
        let err = Error::MergeConflict(vec!["a.txt".into(), "b.txt".into()]);
        assert_eq!(err.to_string(), "merge conflict on 2 path(s)");
    }
}
