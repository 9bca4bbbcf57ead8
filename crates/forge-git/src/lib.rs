//! Git object store adapter: the sole place in the `forge` workspace
//! that speaks `gix` directly.
//!
//! Everything above this crate — the VFS, the tool layer, the session
//! machinery — addresses commits and trees through [`Oid`] and
//! [`GitRepository`] rather than touching `gix` types, the same
//! boundary `dk-engine::git::repository` drew for the teacher codebase.

mod merge;
mod oid;
mod repository;

pub use merge::{three_way_merge, MergeOutcome, PathConflict};
pub use oid::Oid;
pub use repository::{GitRepository, TreeOverlay};
