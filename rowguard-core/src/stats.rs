//! Counters for the connection guard.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Lock-free counters updated on every acquire and release.
#[derive(Debug, Default)]
pub struct GuardStats {
    acquired: AtomicU64,
    released: AtomicU64,
    denied: AtomicU64,
    bind_failures: AtomicU64,
    unbind_failures: AtomicU64,
    discarded: AtomicU64,
    background_releases: AtomicU64,
    active: AtomicUsize,
}

impl GuardStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_acquire(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_release(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_denied(&self) {
        self.denied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bind_failure(&self) {
        self.bind_failures.fetch_add(1, Ordering::Relaxed);
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// An unbind failure ends a borrow too, so `active` drops here.
    pub(crate) fn record_unbind_failure(&self) {
        self.unbind_failures.fetch_add(1, Ordering::Relaxed);
        self.discarded.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Connection dropped with no runtime to unbind it on.
    pub(crate) fn record_orphan_discard(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_background_release(&self) {
        self.background_releases.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of the counters.
    pub fn snapshot(&self) -> GuardStatsSnapshot {
        GuardStatsSnapshot {
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            bind_failures: self.bind_failures.load(Ordering::Relaxed),
            unbind_failures: self.unbind_failures.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            background_releases: self.background_releases.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
        }
    }
}

/// A snapshot of [`GuardStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GuardStatsSnapshot {
    /// Handles successfully bound and handed out.
    pub acquired: u64,
    /// Handles unbound and returned to the idle set.
    pub released: u64,
    /// Acquisitions refused because no tenant was bound.
    pub denied: u64,
    /// Bind statements that failed.
    pub bind_failures: u64,
    /// Unbind statements that failed.
    pub unbind_failures: u64,
    /// Physical connections removed from the pool instead of recycled.
    pub discarded: u64,
    /// Handles released by the drop path rather than an explicit `release`.
    pub background_releases: u64,
    /// Handles currently lent out.
    pub active: usize,
}
