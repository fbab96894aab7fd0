//! Per-target resilience wrapper: circuit breaker, retry, cache, and
//! time/size-bounded batching (spec.md §4.6). One [`CircuitBreaker`]
//! instance per `(target_component, action)` edge.

mod batch;
mod cache;
mod circuit_breaker;
mod config;
mod retry;

pub use batch::BatchQueue;
pub use cache::ResilienceCache;
pub use circuit_breaker::{CircuitBreaker, CircuitOpenError, CircuitState};
pub use config::{BatchConfig, CacheConfig, CircuitBreakerConfig, RetryPolicy};
pub use retry::{retry_with_backoff, ErrorClass};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tracing::{instrument, warn};

/// A handler suitable for batch-tolerant dispatch: takes one item's input,
/// returns its output, and is cheap to clone (an `Arc`) since the batch
/// driver invokes it once per item on every flush.
pub type BatchableHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value, ResilienceError>> + Send>> + Send + Sync>;

#[derive(Debug, Error, Clone)]
pub enum ResilienceError {
    #[error("circuit breaker open for {target}.{action}")]
    CircuitOpen { target: String, action: String },
    #[error("transient failure calling {target}.{action}: {message}")]
    Transient {
        target: String,
        action: String,
        message: String,
    },
    #[error("permanent failure calling {target}.{action}: {message}")]
    Permanent {
        target: String,
        action: String,
        message: String,
    },
}

impl ResilienceError {
    fn classify(&self) -> ErrorClass {
        match self {
            ResilienceError::Transient { .. } => ErrorClass::Transient,
            ResilienceError::CircuitOpen { .. } | ResilienceError::Permanent { .. } => {
                ErrorClass::Permanent
            }
        }
    }
}

/// An undeliverable call recorded after retries are exhausted or the
/// breaker is open, so an operator can inspect it instead of it vanishing
/// silently.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub target: String,
    pub action: String,
    pub input: Value,
    pub error: String,
    pub recorded_at: DateTime<Utc>,
}

/// Registry of per-`(target, action)` circuit breakers plus a shared
/// fingerprint cache. This is the single entry point the bus and workflow
/// orchestrator call through to reach a component action with resilience.
pub struct ResilienceRegistry {
    breaker_config: CircuitBreakerConfig,
    retry_policy: RetryPolicy,
    batch_config: BatchConfig,
    cache: ResilienceCache,
    breakers: DashMap<(String, String), Arc<CircuitBreaker>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    /// One batch queue per batch-tolerant `(target, action)`, created lazily
    /// on first [`ResilienceRegistry::call_batched`] and drained by a
    /// background task spawned at that point (spec.md §4.6 "Batching").
    batch_queues: DashMap<(String, String), Arc<BatchQueue<Value, Result<Value, String>>>>,
}

impl ResilienceRegistry {
    pub fn new(
        breaker_config: CircuitBreakerConfig,
        retry_policy: RetryPolicy,
        cache_config: CacheConfig,
    ) -> Self {
        ResilienceRegistry {
            breaker_config,
            retry_policy,
            batch_config: BatchConfig::default(),
            cache: ResilienceCache::new(cache_config),
            breakers: DashMap::new(),
            dead_letters: Mutex::new(Vec::new()),
            batch_queues: DashMap::new(),
        }
    }

    pub fn with_batch_config(mut self, batch_config: BatchConfig) -> Self {
        self.batch_config = batch_config;
        self
    }

    fn breaker_for(&self, target: &str, action: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry((target.to_string(), action.to_string()))
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.breaker_config.clone())))
            .clone()
    }

    pub fn breaker_state(&self, target: &str, action: &str) -> CircuitState {
        self.breaker_for(target, action).state()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().clone()
    }

    fn record_dead_letter(&self, target: &str, action: &str, input: &Value, error: &str) {
        self.dead_letters.lock().push(DeadLetter {
            target: target.to_string(),
            action: action.to_string(),
            input: input.clone(),
            error: error.to_string(),
            recorded_at: Utc::now(),
        });
    }

    /// Invokes `f` for `(target, action)` through the breaker, retry, and
    /// cache layers. `f` is called at most `retry_policy.max_retry_attempts`
    /// times and must itself classify its own failures as `ResilienceError`
    /// variants.
    #[instrument(skip(self, input, f), fields(component = target, action))]
    pub async fn call<F, Fut>(
        &self,
        target: &str,
        action: &str,
        input: &Value,
        cacheable: bool,
        f: F,
    ) -> Result<Value, ResilienceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Value, ResilienceError>>,
    {
        let fingerprint = ResilienceCache::fingerprint(target, action, input);
        if cacheable {
            if let Some(cached) = self.cache.get(&fingerprint) {
                return Ok(cached);
            }
        }

        let breaker = self.breaker_for(target, action);
        let permit = breaker.try_acquire().map_err(|_| {
            let err = ResilienceError::CircuitOpen {
                target: target.to_string(),
                action: action.to_string(),
            };
            self.record_dead_letter(target, action, input, &err.to_string());
            err
        })?;

        let result = retry_with_backoff(
            &self.retry_policy,
            ResilienceError::classify,
            &mut || f(),
        )
        .await;

        match result {
            Ok(value) => {
                permit.success();
                if cacheable {
                    self.cache.put(fingerprint, value.clone());
                }
                Ok(value)
            }
            Err(err) => {
                permit.failure();
                warn!(component = target, action, %err, "resilient call failed after retries");
                self.record_dead_letter(target, action, input, &err.to_string());
                Err(err)
            }
        }
    }

    /// Routes `input` through a time/size-bounded batch queue for
    /// `(target, action)` before invoking `handler` (spec.md §4.6 batch-
    /// tolerant targets). The first call for a given `(target, action)`
    /// spawns that queue's background flush loop, which calls `handler`
    /// for each queued item through [`ResilienceRegistry::call`] (so
    /// batched items still get the breaker/retry/dead-letter treatment);
    /// later calls for the same `(target, action)` just enqueue behind it.
    pub async fn call_batched(
        self: &Arc<Self>,
        target: &str,
        action: &str,
        input: Value,
        handler: BatchableHandler,
    ) -> Result<Value, ResilienceError> {
        let key = (target.to_string(), action.to_string());
        let queue = self
            .batch_queues
            .entry(key.clone())
            .or_insert_with(|| {
                let queue: Arc<BatchQueue<Value, Result<Value, String>>> =
                    BatchQueue::new(self.batch_config.clone());
                let driver_queue = queue.clone();
                let registry = self.clone();
                let (target, action) = key;
                tokio::spawn(async move {
                    driver_queue
                        .run_async(move |items: Vec<(u64, Value)>| {
                            let registry = registry.clone();
                            let target = target.clone();
                            let action = action.clone();
                            let handler = handler.clone();
                            async move {
                                futures::future::join_all(items.into_iter().map(|(_, input)| {
                                    let registry = registry.clone();
                                    let target = target.clone();
                                    let action = action.clone();
                                    let handler = handler.clone();
                                    async move {
                                        registry
                                            .call(&target, &action, &input.clone(), false, move || {
                                                handler(input.clone())
                                            })
                                            .await
                                            .map_err(|err| err.to_string())
                                    }
                                }))
                                .await
                            }
                        })
                        .await;
                });
                queue
            })
            .clone();

        let (_, receiver) = queue.submit(input);
        match receiver.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(ResilienceError::Transient {
                target: target.to_string(),
                action: action.to_string(),
                message,
            }),
            Err(_) => Err(ResilienceError::Permanent {
                target: target.to_string(),
                action: action.to_string(),
                message: "batch queue dropped the reply before flushing".to_string(),
            }),
        }
    }
}
