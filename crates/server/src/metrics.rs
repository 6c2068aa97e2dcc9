//! Request statistics
//!
//! Atomic counters shared by the router, the wire front end and the graph
//! worker. All operations use relaxed ordering; values are eventually
//! consistent and only read for logging and tests.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for scheduler requests
///
/// # Thread Safety
///
/// All methods are safe to call from multiple tasks concurrently. Reads may
/// be slightly stale.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Bind requests (wire BIND and relation bind events)
    bind_requests: AtomicU64,

    /// Unbind requests
    unbind_requests: AtomicU64,

    /// Single relation queries
    get_bind_requests: AtomicU64,

    /// Paged relation listings
    get_all_bind_requests: AtomicU64,

    /// Configuration events handed to the operator
    config_events: AtomicU64,

    /// Jobs submitted to the graph worker
    relation_enqueued: AtomicU64,

    /// Jobs the graph worker has run
    relation_dequeued: AtomicU64,

    /// Submissions that did not complete in time
    worker_timeouts: AtomicU64,

    /// Events refused before dispatch
    rejected_events: AtomicU64,
}

impl ServerMetrics {
    /// Create a metrics instance with every counter at zero
    #[inline]
    pub const fn new() -> Self {
        Self {
            bind_requests: AtomicU64::new(0),
            unbind_requests: AtomicU64::new(0),
            get_bind_requests: AtomicU64::new(0),
            get_all_bind_requests: AtomicU64::new(0),
            config_events: AtomicU64::new(0),
            relation_enqueued: AtomicU64::new(0),
            relation_dequeued: AtomicU64::new(0),
            worker_timeouts: AtomicU64::new(0),
            rejected_events: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_bind(&self) {
        self.bind_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unbind(&self) {
        self.unbind_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_get_bind(&self) {
        self.get_bind_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_get_all_bind(&self) {
        self.get_all_bind_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_config_event(&self) {
        self.config_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job handed to the graph worker
    #[inline]
    pub fn record_relation_enqueue(&self) {
        self.relation_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job picked up by the graph worker
    #[inline]
    pub fn record_relation_dequeue(&self) {
        self.relation_dequeued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_timeout(&self) {
        self.worker_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rejected(&self) {
        self.rejected_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn relation_enqueued(&self) -> u64 {
        self.relation_enqueued.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn relation_dequeued(&self) -> u64 {
        self.relation_dequeued.load(Ordering::Relaxed)
    }

    /// Get a point-in-time snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bind_requests: self.bind_requests.load(Ordering::Relaxed),
            unbind_requests: self.unbind_requests.load(Ordering::Relaxed),
            get_bind_requests: self.get_bind_requests.load(Ordering::Relaxed),
            get_all_bind_requests: self.get_all_bind_requests.load(Ordering::Relaxed),
            config_events: self.config_events.load(Ordering::Relaxed),
            relation_enqueued: self.relation_enqueued.load(Ordering::Relaxed),
            relation_dequeued: self.relation_dequeued.load(Ordering::Relaxed),
            worker_timeouts: self.worker_timeouts.load(Ordering::Relaxed),
            rejected_events: self.rejected_events.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        self.bind_requests.store(0, Ordering::Relaxed);
        self.unbind_requests.store(0, Ordering::Relaxed);
        self.get_bind_requests.store(0, Ordering::Relaxed);
        self.get_all_bind_requests.store(0, Ordering::Relaxed);
        self.config_events.store(0, Ordering::Relaxed);
        self.relation_enqueued.store(0, Ordering::Relaxed);
        self.relation_dequeued.store(0, Ordering::Relaxed);
        self.worker_timeouts.store(0, Ordering::Relaxed);
        self.rejected_events.store(0, Ordering::Relaxed);
    }

    /// Log every counter at info level
    pub fn log_summary(&self, what: &'static str) {
        let s = self.snapshot();
        tracing::info!(
            bind = s.bind_requests,
            unbind = s.unbind_requests,
            get_bind = s.get_bind_requests,
            get_all_bind = s.get_all_bind_requests,
            config_events = s.config_events,
            relation_enqueued = s.relation_enqueued,
            relation_dequeued = s.relation_dequeued,
            worker_timeouts = s.worker_timeouts,
            rejected_events = s.rejected_events,
            "{what} statistics"
        );
    }
}

/// Point-in-time copy of `ServerMetrics`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub bind_requests: u64,
    pub unbind_requests: u64,
    pub get_bind_requests: u64,
    pub get_all_bind_requests: u64,
    pub config_events: u64,
    pub relation_enqueued: u64,
    pub relation_dequeued: u64,
    pub worker_timeouts: u64,
    pub rejected_events: u64,
}

impl MetricsSnapshot {
    /// Jobs submitted but not yet picked up
    #[inline]
    pub fn relation_backlog(&self) -> u64 {
        self.relation_enqueued.saturating_sub(self.relation_dequeued)
    }
}
