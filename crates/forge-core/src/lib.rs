//! Core error taxonomy, identifiers, and path rules shared by every
//! `forge` crate. Mirrors the role `dk-core` plays for the teacher
//! codebase this workspace was grown from: a leaf crate every other
//! crate depends on, with no dependencies of its own beyond `serde`/
//! `thiserror`/`uuid`.

mod error;
mod ids;
mod path;

pub use error::{Error, Result};
pub use ids::{BranchName, SessionId, ToolCallId};
pub use path::normalize as normalize_path;
