//! Leader election guard.

use std::sync::atomic::{AtomicBool, Ordering};

/// Tells whether this orchestrator instance is the leader.
///
/// Only the leader amends execution records, so two replicas never race to
/// recover the same run.
pub trait Leadership: Send + Sync {
    fn is_leader(&self) -> bool;
}

/// Leadership flag flipped by whatever election mechanism is deployed.
#[derive(Debug, Default)]
pub struct LeaderFlag(AtomicBool);

impl LeaderFlag {
    #[must_use]
    pub fn new(is_leader: bool) -> Self {
        Self(AtomicBool::new(is_leader))
    }

    /// Records the outcome of an election round.
    pub fn set_leader(&self, is_leader: bool) {
        self.0.store(is_leader, Ordering::SeqCst);
    }
}

impl Leadership for LeaderFlag {
    fn is_leader(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_follows_elections() {
        let flag = LeaderFlag::default();
        assert!(!flag.is_leader());

        flag.set_leader(true);
        assert!(flag.is_leader());

        flag.set_leader(false);
        assert!(!flag.is_leader());
    }
}
