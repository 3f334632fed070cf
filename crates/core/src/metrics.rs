//! Counters owned by one watcher instance. Every increment is mirrored into
//! the global `metrics` recorder (`<name>_total{instance=...}`), while the
//! local atomics give tests an isolated, resettable view.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use serde::Serialize;

#[derive(Debug, Default)]
pub struct MetricsStore {
    instance: String,
    events_processed: AtomicU64,
    events_discarded: AtomicU64,
    watch_errors: AtomicU64,
    kube_api_read_cache_hits: AtomicU64,
    kube_api_read_requests: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub events_processed: u64,
    pub events_discarded: u64,
    pub watch_errors: u64,
    pub kube_api_read_cache_hits: u64,
    pub kube_api_read_requests: u64,
}

impl MetricsStore {
    pub fn new(instance: impl Into<String>) -> Self {
        Self { instance: instance.into(), ..Self::default() }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn inc_events_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
        counter!("events_processed_total", 1u64, "instance" => self.instance.clone());
    }

    pub fn inc_events_discarded(&self) {
        self.events_discarded.fetch_add(1, Ordering::Relaxed);
        counter!("events_discarded_total", 1u64, "instance" => self.instance.clone());
    }

    pub fn inc_watch_errors(&self) {
        self.watch_errors.fetch_add(1, Ordering::Relaxed);
        counter!("watch_errors_total", 1u64, "instance" => self.instance.clone());
    }

    pub fn inc_kube_api_read_cache_hits(&self) {
        self.kube_api_read_cache_hits.fetch_add(1, Ordering::Relaxed);
        counter!("kube_api_read_cache_hits_total", 1u64, "instance" => self.instance.clone());
    }

    pub fn inc_kube_api_read_requests(&self) {
        self.kube_api_read_requests.fetch_add(1, Ordering::Relaxed);
        counter!("kube_api_read_requests_total", 1u64, "instance" => self.instance.clone());
    }

    pub fn events_processed(&self) -> u64 { self.events_processed.load(Ordering::Relaxed) }
    pub fn events_discarded(&self) -> u64 { self.events_discarded.load(Ordering::Relaxed) }
    pub fn watch_errors(&self) -> u64 { self.watch_errors.load(Ordering::Relaxed) }
    pub fn kube_api_read_cache_hits(&self) -> u64 { self.kube_api_read_cache_hits.load(Ordering::Relaxed) }
    pub fn kube_api_read_requests(&self) -> u64 { self.kube_api_read_requests.load(Ordering::Relaxed) }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_processed: self.events_processed(),
            events_discarded: self.events_discarded(),
            watch_errors: self.watch_errors(),
            kube_api_read_cache_hits: self.kube_api_read_cache_hits(),
            kube_api_read_requests: self.kube_api_read_requests(),
        }
    }

    /// Zero the local counters. The global recorder is left alone.
    pub fn reset(&self) {
        for c in [
            &self.events_processed,
            &self.events_discarded,
            &self.watch_errors,
            &self.kube_api_read_cache_hits,
            &self.kube_api_read_requests,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}
