//! Branch-scoped virtual filesystem over `forge-git`.
//!
//! Generalises `dk-engine::workspace`: the same read-overlay-then-base
//! resolution order and `DashMap`-backed pending-write set as the
//! teacher's `SessionWorkspace`/`FileOverlay`, with the `sqlx`
//! persistence layer removed (Redesign Flag #1 — session and overlay
//! state live only in the git tree itself, via [`WorkInProgressVfs::commit`]).

mod claim;
mod overlay;
mod vfs;

pub use claim::{ClaimGuard, ClaimState};
pub use overlay::{Overlay, OverlayEntry};
pub use vfs::{CommitVfs, Vfs, WorkInProgressVfs};
