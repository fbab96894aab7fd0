use std::time::Duration;

/// Circuit breaker thresholds (spec.md §4.6, §6 `resilience.circuit_breaker_*`).
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }
}

/// Exponential backoff retry policy (spec.md §4.6, §6 `resilience.max_retry_attempts`,
/// `resilience.retry_delay_ms`).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retry_attempts: 3,
            retry_delay: Duration::from_millis(200),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// `retry_delay × 2^(attempt-1)`, `attempt` is 1-based and counts retries
    /// (not the initial call).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.retry_delay.as_secs_f64() * 2f64.powi(attempt as i32 - 1);
        let jittered = if self.jitter > 0.0 {
            let mut rng = rand::thread_rng();
            use rand::Rng;
            let range = base * self.jitter;
            (base + rng.gen_range(-range..=range)).max(0.0)
        } else {
            base
        };
        Duration::from_secs_f64(jittered)
    }
}

/// LRU cache configuration (spec.md §4.6, §6 `cache.*`).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            capacity: 1000,
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

impl CacheConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Time/size-bounded batching window for batch-tolerant targets (spec.md §4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub window: Duration,
    pub max_items: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            window: Duration::from_secs(2),
            max_items: 50,
        }
    }
}

impl BatchConfig {
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_without_jitter() {
        let policy = RetryPolicy::default().with_jitter(0.0);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }
}
