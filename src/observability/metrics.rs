//! Thread-safe messaging metrics
//!
//! Atomic counters tracking connection attempts, publish outcomes and shutdown.
//! One collector lives inside each connection manager; callers read it through
//! [`MessagingMetrics::snapshot`].

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Counters for the event publisher
#[derive(Debug)]
pub struct MessagingMetrics {
    // Connection metrics
    connected: AtomicBool,
    connection_attempts: AtomicU64,
    connection_failures: AtomicU64,
    connections_established: AtomicU64,
    connected_since: AtomicU64,

    // Publish metrics (high frequency)
    events_published: AtomicU64,
    events_dropped_unavailable: AtomicU64,
    events_rejected: AtomicU64,
    publish_failures: AtomicU64,
    last_publish: AtomicU64,

    // Shutdown
    closes: AtomicU64,
    close_timeouts: AtomicU64,
}

impl Default for MessagingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MessagingMetrics {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connected_since: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            events_dropped_unavailable: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            last_publish: AtomicU64::new(0),
            closes: AtomicU64::new(0),
            close_timeouts: AtomicU64::new(0),
        }
    }

    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
        self.connected_since
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn connection_closed(&self, timed_out: bool) {
        self.connected.store(false, Ordering::Relaxed);
        self.connected_since.store(0, Ordering::Relaxed);
        self.closes.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.close_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn event_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        self.last_publish
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Event dropped because no session was available
    pub fn event_dropped(&self) {
        self.events_dropped_unavailable
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Event rejected before submission (bad routing key, unserializable payload)
    pub fn event_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connected: self.connected.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connected_since: self.connected_since.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            events_dropped_unavailable: self.events_dropped_unavailable.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            last_publish: self.last_publish.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
            close_timeouts: self.close_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`MessagingMetrics`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connection_failures: u64,
    pub connections_established: u64,
    /// Unix seconds, 0 when not connected
    pub connected_since: u64,
    pub events_published: u64,
    pub events_dropped_unavailable: u64,
    pub events_rejected: u64,
    pub publish_failures: u64,
    /// Unix seconds of the last successful submission, 0 if none
    pub last_publish: u64,
    pub closes: u64,
    pub close_timeouts: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
