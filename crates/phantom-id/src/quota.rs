//! Admin quota — a bounded count of live admin-flagged nodes.
//!
//! The quota is owned by the daemon and shared with its tree. Slots are
//! taken with a compare-and-swap so the counter can never pass
//! `max_admins`, even when several trees share one quota.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Default number of admin slots.
pub const DEFAULT_MAX_ADMINS: usize = 5;

/// Process-wide admin counter bounded by `max_admins`.
#[derive(Debug)]
pub struct AdminQuota {
    max_admins: usize,
    current: AtomicUsize,
}

impl AdminQuota {
    /// Create an empty quota with `max_admins` slots.
    pub fn new(max_admins: usize) -> Self {
        Self {
            max_admins,
            current: AtomicUsize::new(0),
        }
    }

    /// Take one slot. Returns `false` when the quota is exhausted.
    pub fn try_acquire(&self) -> bool {
        self.current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_admins).then_some(n + 1)
            })
            .is_ok()
    }

    /// Return one slot. Releasing an empty quota is a no-op.
    pub fn release(&self) {
        let _ = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Return `count` slots at once.
    pub fn release_many(&self, count: usize) {
        let _ = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(count))
            });
    }

    /// Slots currently in use.
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Configured upper bound.
    pub fn max(&self) -> usize {
        self.max_admins
    }

    /// Whether at least one slot is free right now.
    ///
    /// Advisory only: another caller may take the slot before `try_acquire`.
    pub fn has_headroom(&self) -> bool {
        self.current() < self.max_admins
    }
}

impl Default for AdminQuota {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ADMINS)
    }
}
