use std::sync::atomic::{AtomicBool, Ordering};

use forge_core::{Error, Result};

/// The single-claimant discipline a writable VFS enforces: at most one
/// turn executor may hold write access to a branch's overlay at a
/// time. A second `claim()` while one is outstanding fails outright
/// rather than queuing — callers (`forge-session::live`) are expected
/// to serialize turns per branch themselves.
#[derive(Debug, Default)]
pub struct ClaimState {
    claimed: AtomicBool,
    poisoned: AtomicBool,
}

impl ClaimState {
    pub fn claim<'a>(&'a self, branch: &str) -> Result<ClaimGuard<'a>> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(Error::OverlayPoisoned);
        }
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Internal(format!(
                "vfs for branch '{branch}' is already claimed"
            )));
        }
        Ok(ClaimGuard { state: self })
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }
}

/// RAII proof of ownership returned by [`ClaimState::claim`].
///
/// Dropping the guard mid-panic (the turn executor unwound instead of
/// reaching its normal suspension points) poisons the claim state so
/// the overlay is never handed to a new claimant half-mutated — the
/// `OverlayPoisoned` case the teacher never had to model, since
/// `FileOverlay` had no notion of exclusive ownership at all.
pub struct ClaimGuard<'a> {
    state: &'a ClaimState,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.state.poisoned.store(true, Ordering::Release);
        }
        self.state.claimed.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_fails_while_first_outstanding() {
        let state = ClaimState::default();
        let _guard = state.claim("main").unwrap();
        assert!(state.claim("main").is_err());
    }

    #[test]
    fn releasing_the_guard_allows_reclaiming() {
        let state = ClaimState::default();
        {
            let _guard = state.claim("main").unwrap();
        }
        assert!(state.claim("main").is_ok());
    }

    #[test]
    fn panic_while_claimed_poisons_the_state() {
        let state = ClaimState::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = state.claim("main").unwrap();
            panic!("turn executor blew up mid-turn");
        }));
        assert!(result.is_err());
        assert!(state.is_poisoned());
        assert!(matches!(state.claim("main"), Err(Error::OverlayPoisoned)));
    }
}
