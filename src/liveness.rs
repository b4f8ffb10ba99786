//! Liveness tokens for async completions.
//!
//! Every background completion (camera acquisition, asset load, detection
//! pump) carries a `LivenessToken` minted for one session run. `stop()` revokes
//! the run; a token from a revoked or superseded run must not touch the camera,
//! the asset or the scene.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Liveness {
    generation: Arc<AtomicU64>,
    alive: Arc<AtomicBool>,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new run and return its token. Tokens from earlier runs go stale.
    pub fn begin(&self) -> LivenessToken {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.alive.store(true, Ordering::SeqCst);
        LivenessToken {
            generation,
            current: self.generation.clone(),
            alive: self.alive.clone(),
        }
    }

    /// Revoke the current run.
    pub fn revoke(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct LivenessToken {
    generation: u64,
    current: Arc<AtomicU64>,
    alive: Arc<AtomicBool>,
}

impl LivenessToken {
    /// A token that is never live. Used by components driven outside a session.
    pub fn detached() -> Self {
        Self {
            generation: 0,
            current: Arc::new(AtomicU64::new(1)),
            alive: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_live(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.current.load(Ordering::SeqCst) == self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revoke_kills_outstanding_tokens() {
        let liveness = Liveness::new();
        let token = liveness.begin();
        assert!(token.is_live());
        liveness.revoke();
        assert!(!token.is_live());
    }

    #[test]
    fn new_run_supersedes_old_tokens() {
        let liveness = Liveness::new();
        let first = liveness.begin();
        liveness.revoke();
        let second = liveness.begin();
        assert!(!first.is_live(), "stale run must stay dead after restart");
        assert!(second.is_live());
        assert_eq!(second.generation(), 2);
    }

    #[test]
    fn detached_token_is_never_live() {
        assert!(!LivenessToken::detached().is_live());
    }
}
