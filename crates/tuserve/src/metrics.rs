//! Counters incremented at the protocol's transition points.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide upload counters. All increments are atomic; readers get a
/// consistent snapshot of each individual counter.
#[derive(Debug, Default)]
pub struct Metrics {
    requests_total: AtomicU64,
    uploads_created: AtomicU64,
    uploads_finished: AtomicU64,
    uploads_terminated: AtomicU64,
    bytes_received: AtomicU64,
    errors_total: AtomicU64,
}

impl Metrics {
    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn uploads_created(&self) -> u64 {
        self.uploads_created.load(Ordering::Relaxed)
    }

    pub fn uploads_finished(&self) -> u64 {
        self.uploads_finished.load(Ordering::Relaxed)
    }

    pub fn uploads_terminated(&self) -> u64 {
        self.uploads_terminated.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn errors_total(&self) -> u64 {
        self.errors_total.load(Ordering::Relaxed)
    }

    pub(crate) fn incr_requests(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_uploads_created(&self) {
        self.uploads_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_uploads_finished(&self) {
        self.uploads_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_uploads_terminated(&self) {
        self.uploads_terminated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn incr_errors(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }
}
