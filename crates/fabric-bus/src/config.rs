use std::time::Duration;

/// Background flush loop and dispatch tuning (spec.md §4.5, §5).
#[derive(Debug, Clone, PartialEq)]
pub struct BusConfig {
    pub flush_interval: Duration,
    pub batch_size: usize,
    pub max_concurrency: usize,
    /// Implicit per-subscriber dispatch deadline (spec.md §5).
    pub dispatch_deadline: Duration,
    pub persistence_ttl_seconds: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            flush_interval: Duration::from_millis(250),
            batch_size: 64,
            max_concurrency: 10,
            dispatch_deadline: Duration::from_secs(10),
            persistence_ttl_seconds: 86_400,
        }
    }
}

impl BusConfig {
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_dispatch_deadline(mut self, deadline: Duration) -> Self {
        self.dispatch_deadline = deadline;
        self
    }
}
