//! Bus-wide observability snapshot (ambient stack, SPEC_FULL.md §10).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use fabric_types::Source;
use parking_lot::Mutex;

const LATENCY_WINDOW: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub handled: u64,
    pub by_type: HashMap<String, u64>,
    pub by_source: HashMap<String, u64>,
    pub recent_latencies: Vec<Duration>,
}

#[derive(Default)]
pub struct BusMetrics {
    published: AtomicU64,
    handled: AtomicU64,
    by_type: DashMap<String, u64>,
    by_source: DashMap<Source, u64>,
    latencies: Mutex<std::collections::VecDeque<Duration>>,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self, source: Source, event_type: &str) {
        self.published.fetch_add(1, Ordering::Relaxed);
        *self.by_type.entry(event_type.to_string()).or_insert(0) += 1;
        *self.by_source.entry(source).or_insert(0) += 1;
    }

    pub fn record_handled(&self, latency: Duration) {
        self.handled.fetch_add(1, Ordering::Relaxed);
        let mut latencies = self.latencies.lock();
        if latencies.len() == LATENCY_WINDOW {
            latencies.pop_front();
        }
        latencies.push_back(latency);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            by_type: self
                .by_type
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            by_source: self
                .by_source
                .iter()
                .map(|e| (e.key().to_string(), *e.value()))
                .collect(),
            recent_latencies: self.latencies.lock().iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_per_publish_and_handle() {
        let metrics = BusMetrics::new();
        metrics.record_published(Source::Risk, "risk.quantified");
        metrics.record_published(Source::Risk, "risk.quantified");
        metrics.record_handled(Duration::from_millis(5));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.published, 2);
        assert_eq!(snapshot.handled, 1);
        assert_eq!(snapshot.by_type["risk.quantified"], 2);
        assert_eq!(snapshot.by_source["risk"], 2);
        assert_eq!(snapshot.recent_latencies.len(), 1);
    }

    #[test]
    fn latency_window_stays_bounded() {
        let metrics = BusMetrics::new();
        for i in 0..(LATENCY_WINDOW + 10) {
            metrics.record_handled(Duration::from_millis(i as u64));
        }
        assert_eq!(metrics.snapshot().recent_latencies.len(), LATENCY_WINDOW);
    }
}
