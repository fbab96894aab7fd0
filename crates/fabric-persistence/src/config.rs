/// Persistence configuration (spec.md §6: `persistence.*`), matching the
/// `with_*` builder idiom used by `CircuitBreakerConfig`/`RetryPolicy`
/// elsewhere in the workspace.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub default_ttl_seconds: u64,
    pub max_events: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            enabled: true,
            default_ttl_seconds: 24 * 3600,
            max_events: 100_000,
        }
    }
}

impl PersistenceConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_default_ttl_seconds(mut self, ttl: u64) -> Self {
        self.default_ttl_seconds = ttl;
        self
    }

    pub fn with_max_events(mut self, max: usize) -> Self {
        self.max_events = max;
        self
    }
}
