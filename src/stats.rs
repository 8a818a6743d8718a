//! Run statistics.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters shared by every worker of a run.
#[derive(Debug, Default)]
pub struct RunStats {
    feeds_fetched: AtomicUsize,
    feeds_failed: AtomicUsize,
    notifications_queued: AtomicUsize,
    notifications_delivered: AtomicUsize,
    notifications_failed: AtomicUsize,
}

impl RunStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// A source was fetched and handed to the dedup filter.
    pub fn record_fetched(&self, queued: usize) {
        self.feeds_fetched.fetch_add(1, Ordering::Relaxed);
        self.notifications_queued.fetch_add(queued, Ordering::Relaxed);
    }

    /// A source could not be fetched, run or parsed.
    pub fn record_failed_feed(&self) {
        self.feeds_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.notifications_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_delivery(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            feeds_fetched: self.feeds_fetched.load(Ordering::Relaxed),
            feeds_failed: self.feeds_failed.load(Ordering::Relaxed),
            notifications_queued: self.notifications_queued.load(Ordering::Relaxed),
            notifications_delivered: self.notifications_delivered.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Sources fetched (or run) and parsed successfully.
    pub feeds_fetched: usize,
    /// Sources skipped because of a fetch, command or parse error.
    pub feeds_failed: usize,
    /// Notification events queued for delivery.
    pub notifications_queued: usize,
    /// Notifications delivered and marked.
    pub notifications_delivered: usize,
    /// Notifications dropped because rendering or delivery failed.
    pub notifications_failed: usize,
}
