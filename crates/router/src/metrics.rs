//! Router counters
//!
//! Local atomics for [`RouterStats`] snapshots; every update is mirrored to
//! the `metrics` facade through `observability`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use observability::{record_message_received, record_route_outcome, RouteOutcomeLabel};

/// Router metrics (shared by all workers)
#[derive(Debug, Default)]
pub struct RouterMetrics {
    received: AtomicU64,
    routed: AtomicU64,
    unrouted: AtomicU64,
    filtered_out: AtomicU64,
    filter_errors: AtomicU64,
    missing_sink: AtomicU64,
    delivered: AtomicU64,
    rejected: AtomicU64,
    saturated: AtomicU64,
    dropped_on_shutdown: AtomicU64,
    per_topic: Mutex<BTreeMap<String, u64>>,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// One message dequeued for `topic`
    pub fn record_received(&self, topic: &str) {
        self.received.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut per_topic) = self.per_topic.lock() {
            *per_topic.entry(topic.to_string()).or_default() += 1;
        }
        record_message_received(topic);
    }

    /// Message had at least one route
    pub fn record_routed(&self) {
        self.routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unrouted(&self) {
        self.unrouted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, sink: &str, outcome: RouteOutcomeLabel) {
        let counter = match outcome {
            RouteOutcomeLabel::Delivered => &self.delivered,
            RouteOutcomeLabel::Rejected => &self.rejected,
            RouteOutcomeLabel::FilteredOut => &self.filtered_out,
            RouteOutcomeLabel::FilterError => &self.filter_errors,
            RouteOutcomeLabel::MissingSink => &self.missing_sink,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        record_route_outcome(sink, outcome);
    }

    pub fn record_saturated(&self) {
        self.saturated.fetch_add(1, Ordering::Relaxed);
        observability::record_router_saturated();
    }

    /// Messages abandoned when the shutdown grace period ran out
    pub fn record_dropped_on_shutdown(&self, n: u64) {
        self.dropped_on_shutdown.fetch_add(n, Ordering::Relaxed);
        observability::record_router_dropped_on_shutdown(n);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> RouterStats {
        RouterStats {
            received: self.received.load(Ordering::Relaxed),
            routed: self.routed.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            filtered_out: self.filtered_out.load(Ordering::Relaxed),
            filter_errors: self.filter_errors.load(Ordering::Relaxed),
            missing_sink: self.missing_sink.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            saturated: self.saturated.load(Ordering::Relaxed),
            dropped_on_shutdown: self.dropped_on_shutdown.load(Ordering::Relaxed),
            per_topic: self
                .per_topic
                .lock()
                .map(|per_topic| per_topic.clone())
                .unwrap_or_default(),
        }
    }
}

/// Router counters at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub received: u64,
    pub routed: u64,
    pub unrouted: u64,
    pub filtered_out: u64,
    pub filter_errors: u64,
    pub missing_sink: u64,
    pub delivered: u64,
    pub rejected: u64,
    pub saturated: u64,
    /// Queued or mid-dispatch when workers were aborted
    pub dropped_on_shutdown: u64,
    /// Received count per topic
    pub per_topic: BTreeMap<String, u64>,
}

impl RouterStats {
    pub fn received_for(&self, topic: &str) -> u64 {
        self.per_topic.get(topic).copied().unwrap_or(0)
    }
}

impl fmt::Display for RouterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} routed={} unrouted={} delivered={} rejected={} filtered_out={} \
             filter_errors={} missing_sink={} saturated={} dropped_on_shutdown={}",
            self.received,
            self.routed,
            self.unrouted,
            self.delivered,
            self.rejected,
            self.filtered_out,
            self.filter_errors,
            self.missing_sink,
            self.saturated,
            self.dropped_on_shutdown
        )
    }
}
