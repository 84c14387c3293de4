//! Thread-safe publish metrics
//!
//! Each output instance owns its own [`PublishMetrics`]; counters are
//! atomics updated from every concurrent publish call, publish latencies
//! are kept in a bounded mutex-protected window.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const LATENCY_WINDOW: usize = 1000;

/// Counters for one output instance
#[derive(Debug)]
pub struct PublishMetrics {
    events_received: AtomicU64,
    events_published: AtomicU64,
    events_failed: AtomicU64,
    serialization_failures: AtomicU64,
    publish_attempts: AtomicU64,
    attempt_failures: AtomicU64,
    retries: AtomicU64,
    started_at: AtomicU64,
    // milliseconds per delivered event, including retries
    latencies: Mutex<Vec<u64>>,
}

impl Default for PublishMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishMetrics {
    pub fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            serialization_failures: AtomicU64::new(0),
            publish_attempts: AtomicU64::new(0),
            attempt_failures: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            started_at: AtomicU64::new(current_timestamp()),
            latencies: Mutex::new(Vec::new()),
        }
    }

    pub fn event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_published(&self, elapsed: Duration) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        self.record_latency(elapsed);
    }

    pub fn event_failed(&self) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn serialization_failed(&self) {
        self.serialization_failures.fetch_add(1, Ordering::Relaxed);
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one publish attempt; attempts after the first count as retries
    pub fn attempt(&self, attempt_index: u32, success: bool) {
        self.publish_attempts.fetch_add(1, Ordering::Relaxed);
        if attempt_index > 0 {
            self.retries.fetch_add(1, Ordering::Relaxed);
        }
        if !success {
            self.attempt_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_latency(&self, elapsed: Duration) {
        if let Ok(mut latencies) = self.latencies.lock() {
            latencies.push(elapsed.as_millis() as u64);
            if latencies.len() > LATENCY_WINDOW {
                latencies.remove(0);
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (average_latency_ms, max_latency_ms) = match self.latencies.lock() {
            Ok(latencies) if !latencies.is_empty() => {
                let sum: u64 = latencies.iter().sum();
                (
                    sum as f64 / latencies.len() as f64,
                    latencies.iter().copied().max().unwrap_or(0),
                )
            }
            _ => (0.0, 0),
        };

        MetricsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            serialization_failures: self.serialization_failures.load(Ordering::Relaxed),
            publish_attempts: self.publish_attempts.load(Ordering::Relaxed),
            attempt_failures: self.attempt_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            average_latency_ms,
            max_latency_ms,
            uptime_seconds: current_timestamp()
                .saturating_sub(self.started_at.load(Ordering::Relaxed)),
        }
    }
}

/// Serializable point-in-time view of [`PublishMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub events_received: u64,
    pub events_published: u64,
    pub events_failed: u64,
    pub serialization_failures: u64,
    pub publish_attempts: u64,
    pub attempt_failures: u64,
    pub retries: u64,
    pub average_latency_ms: f64,
    pub max_latency_ms: u64,
    pub uptime_seconds: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
