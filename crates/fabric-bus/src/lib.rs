//! The core event bus (spec.md §4.2-§4.5): validated publish, declarative
//! routing, pub/sub delivery, batching, and trust-point awarding, wired
//! together as the single `process` pipeline every envelope passes
//! through.

mod config;
mod metrics;
pub mod routing;
pub mod transport;

pub use config::BusConfig;
pub use metrics::{BusMetrics, MetricsSnapshot};
pub use routing::{canonical_rules, RoutingRule, RoutingTable};
pub use transport::{DeliveryResult, Filter, Handler, Pattern, SubscriptionId, Transport};

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashSet;
use fabric_ledger::{RecordOutcome, TrustLedger};
use fabric_persistence::{EventFilter, EventStore, StoreError};
use fabric_resilience::{BatchableHandler, ResilienceRegistry};
use fabric_types::{validate, Envelope, SchemaError};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BusError {
    #[error("schema validation failed: {0}")]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Accepted { event_id: String },
    /// `event_id` had already been accepted; publish is a no-op (invariant
    /// E2, property P2).
    Duplicate { event_id: String },
}

pub type ResilientHandler =
    Arc<dyn Fn(Envelope) -> Pin<Box<dyn Future<Output = Result<Value, String>> + Send>> + Send + Sync>;

enum TargetHandler {
    Plain(Handler),
    Resilient {
        action: String,
        registry: Arc<ResilienceRegistry>,
        handler: ResilientHandler,
    },
    /// A batch-tolerant target (spec.md §4.6): dispatches are queued and
    /// flushed together by `registry` rather than invoked one at a time.
    Batched {
        action: String,
        registry: Arc<ResilienceRegistry>,
        handler: BatchableHandler,
    },
}

/// The bus. Cloning an `Arc<EventBus>` is the intended sharing pattern —
/// construct one per process and hand clones of the `Arc` to tasks.
pub struct EventBus {
    config: BusConfig,
    store: Arc<dyn EventStore>,
    ledger: Arc<TrustLedger>,
    routing: RoutingTable,
    transport: Transport,
    metrics: BusMetrics,
    targets: dashmap::DashMap<String, TargetHandler>,
    queue: Mutex<VecDeque<Envelope>>,
    /// Claims exactly one processor per `event_id`, so the synchronous
    /// high-priority fast path and the background flush never double-process
    /// the same publish (spec.md §4.5: "the queued copy is de-duplicated by
    /// event_id").
    claimed: DashSet<String>,
    /// Marks `event_id`s accepted by `publish`, so a second `publish` call
    /// for the same id is recognized as a duplicate (invariant E2).
    known: DashSet<String>,
    flushing: AtomicBool,
}

impl EventBus {
    pub fn new(config: BusConfig, store: Arc<dyn EventStore>, ledger: Arc<TrustLedger>) -> Self {
        EventBus {
            config,
            store,
            ledger,
            routing: RoutingTable::new(routing::canonical_rules()),
            transport: Transport::new(),
            metrics: BusMetrics::new(),
            targets: dashmap::DashMap::new(),
            queue: Mutex::new(VecDeque::new()),
            claimed: DashSet::new(),
            known: DashSet::new(),
            flushing: AtomicBool::new(false),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn subscribe(&self, pattern: Pattern, handler: Handler) -> SubscriptionId {
        self.transport.subscribe(pattern, handler)
    }

    /// Subscribes with an optional `filter` predicate: a subscriber
    /// receives only envelopes matching `pattern` for which `filter` (if
    /// any) also returns true (spec.md §4.5).
    pub fn subscribe_filtered(&self, pattern: Pattern, handler: Handler, filter: Option<Filter>) -> SubscriptionId {
        self.transport.subscribe_filtered(pattern, handler, filter)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.transport.unsubscribe(id)
    }

    /// Registers the handler a routed envelope reaches when `target` is one
    /// of routing's `targets` (spec.md §4.4, §4.5 "deliver").
    pub fn register_target(&self, target: impl Into<String>, handler: Handler) {
        self.targets.insert(target.into(), TargetHandler::Plain(handler));
    }

    /// Registers a target whose dispatch is wrapped by `registry`'s circuit
    /// breaker, retry, and cache layers (spec.md §4.6).
    pub fn register_resilient_target(
        &self,
        target: impl Into<String>,
        action: impl Into<String>,
        registry: Arc<ResilienceRegistry>,
        handler: ResilientHandler,
    ) {
        self.targets.insert(
            target.into(),
            TargetHandler::Resilient {
                action: action.into(),
                registry,
                handler,
            },
        );
    }

    /// Registers a batch-tolerant target (spec.md §4.6 "Batching"):
    /// dispatches to `target` are enqueued and flushed together by
    /// `registry`'s time/size-bounded batch queue rather than invoked one at
    /// a time.
    pub fn register_batch_tolerant_target(
        &self,
        target: impl Into<String>,
        action: impl Into<String>,
        registry: Arc<ResilienceRegistry>,
        handler: BatchableHandler,
    ) {
        self.targets.insert(
            target.into(),
            TargetHandler::Batched {
                action: action.into(),
                registry,
                handler,
            },
        );
    }

    pub async fn history(&self, filter: EventFilter) -> Result<Vec<Envelope>, StoreError> {
        self.store.history(filter).await
    }

    /// Validates, assigns missing fields, rejects exact-duplicate
    /// `event_id`s, enqueues, and (for high-priority envelopes) processes
    /// synchronously in addition to queueing (spec.md §4.5).
    #[instrument(skip(self, envelope), fields(event_type = %envelope.event_type))]
    pub async fn publish(&self, envelope: Envelope) -> Result<PublishOutcome, BusError> {
        let envelope = envelope.with_assigned_fields();
        validate(&envelope)?;

        if !self.known.insert(envelope.event_id.clone()) {
            return Ok(PublishOutcome::Duplicate {
                event_id: envelope.event_id,
            });
        }

        self.metrics.record_published(envelope.source, &envelope.event_type);
        self.queue.lock().push_back(envelope.clone());

        if envelope.is_high_priority() {
            info!(event_id = %envelope.event_id, "high-priority envelope, processing synchronously");
            self.process_one(envelope.clone()).await;
        }

        Ok(PublishOutcome::Accepted {
            event_id: envelope.event_id,
        })
    }

    /// Drains up to `batch_size` queued envelopes and processes them
    /// concurrently, bounded by `max_concurrency` (spec.md §4.5). No-op if a
    /// flush is already in progress (the `processing_batch` latch, spec.md
    /// §5).
    pub async fn flush(&self) {
        if self.flushing.swap(true, Ordering::SeqCst) {
            return;
        }

        let batch: Vec<Envelope> = {
            let mut queue = self.queue.lock();
            let n = queue.len().min(self.config.batch_size);
            queue.drain(..n).collect()
        };

        let mut in_flight = FuturesUnordered::new();
        let mut iter = batch.into_iter();
        for envelope in iter.by_ref().take(self.config.max_concurrency) {
            in_flight.push(self.process_one(envelope));
        }
        while in_flight.next().await.is_some() {
            if let Some(envelope) = iter.next() {
                in_flight.push(self.process_one(envelope));
            }
        }

        self.flushing.store(false, Ordering::SeqCst);
    }

    /// Background loop: wakes every `flush_interval` and flushes. Intended
    /// to be spawned once per bus instance; returns only when `stop`
    /// resolves (used by `shutdown`).
    pub async fn run(self: Arc<Self>, mut stop: tokio::sync::oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.flush_interval) => {
                    self.flush().await;
                }
                _ = &mut stop => {
                    self.flush().await;
                    break;
                }
            }
        }
    }

    /// Drains any remaining queued envelopes, then returns. Callers that
    /// spawned `run` should signal its stop channel before or after calling
    /// this — both orders are safe since `flush` is idempotent per-event.
    pub async fn shutdown(&self) {
        while !self.queue.lock().is_empty() {
            self.flush().await;
        }
    }

    #[instrument(skip(self, envelope), fields(event_id = %envelope.event_id))]
    async fn process_one(&self, envelope: Envelope) {
        if !self.claimed.insert(envelope.event_id.clone()) {
            return;
        }

        if let Err(err) = self
            .store
            .persist(envelope.clone(), self.config.persistence_ttl_seconds)
            .await
        {
            warn!(event_id = %envelope.event_id, %err, "persistence failed, continuing delivery");
        }

        self.deliver_to_subscribers(&envelope).await;

        for (target, routed) in self.routing.route(&envelope) {
            self.deliver_to_target(&target, routed).await;
        }

        if envelope.event_type == "trust.points.earned" {
            self.award_trust_points(&envelope).await;
        }

        let latency = chrono::Utc::now()
            .signed_duration_since(envelope.timestamp)
            .to_std()
            .unwrap_or_default();
        self.metrics.record_handled(latency);
    }

    async fn deliver_to_subscribers(&self, envelope: &Envelope) {
        for (_, handler) in self.transport.matching(envelope) {
            let deadline = self.config.dispatch_deadline;
            match tokio::time::timeout(deadline, handler(envelope.clone())).await {
                Ok(Err(err)) => warn!(event_id = %envelope.event_id, %err, "subscriber handler failed"),
                Err(_) => warn!(event_id = %envelope.event_id, ?deadline, "subscriber dispatch timed out, handler abandoned"),
                Ok(Ok(())) => {}
            }
        }
    }

    async fn deliver_to_target(&self, target: &str, envelope: Envelope) {
        let Some(entry) = self.targets.get(target) else {
            return;
        };
        let deadline = self.config.dispatch_deadline;
        match &*entry {
            TargetHandler::Plain(handler) => {
                match tokio::time::timeout(deadline, handler(envelope.clone())).await {
                    Ok(Err(err)) => warn!(component = target, %err, "target handler failed"),
                    Err(_) => warn!(component = target, ?deadline, "target dispatch timed out, handler abandoned"),
                    Ok(Ok(())) => {}
                }
            }
            TargetHandler::Resilient {
                action,
                registry,
                handler,
            } => {
                let handler = handler.clone();
                let input = envelope.data.clone();
                let result = tokio::time::timeout(
                    deadline,
                    registry.call(target, action, &input, false, || {
                        let handler = handler.clone();
                        let envelope = envelope.clone();
                        async move { handler(envelope).await.map_err(|message| fabric_resilience::ResilienceError::Transient {
                            target: target.to_string(),
                            action: action.clone(),
                            message,
                        }) }
                    }),
                )
                .await;
                match result {
                    Ok(Err(err)) => warn!(component = target, %err, "resilient target dispatch failed"),
                    Err(_) => warn!(component = target, ?deadline, "resilient target dispatch timed out, handler abandoned"),
                    Ok(Ok(_)) => {}
                }
            }
            TargetHandler::Batched {
                action,
                registry,
                handler,
            } => {
                let result = tokio::time::timeout(
                    deadline,
                    registry.call_batched(target, action, envelope.data.clone(), handler.clone()),
                )
                .await;
                match result {
                    Ok(Err(err)) => warn!(component = target, %err, "batched target dispatch failed"),
                    Err(_) => warn!(component = target, ?deadline, "batched target dispatch timed out, handler abandoned"),
                    Ok(Ok(_)) => {}
                }
            }
        }
    }

    /// Records the ledger transaction and, if the entity's tier changed,
    /// persists and delivers the resulting `trust.score.updated` envelope to
    /// subscribers without re-entering routing (spec.md §9: terminal, not
    /// re-routed).
    async fn award_trust_points(&self, envelope: &Envelope) {
        match self.ledger.record(envelope, self.store.as_ref()).await {
            Ok(RecordOutcome::Recorded { tier_change: Some(tier_envelope), .. }) => {
                if let Err(err) = self
                    .store
                    .persist(tier_envelope.clone(), self.config.persistence_ttl_seconds)
                    .await
                {
                    warn!(%err, "failed to persist trust.score.updated");
                }
                self.deliver_to_subscribers(&tier_envelope).await;
            }
            Ok(_) => {}
            Err(err) => warn!(event_id = %envelope.event_id, %err, "ledger rejected trust.points.earned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_ledger::TrustLedger;
    use fabric_persistence::{MemoryEventStore, PersistenceConfig};
    use fabric_resilience::{CacheConfig, CircuitBreakerConfig, ResilienceRegistry, RetryPolicy};
    use fabric_types::{json, Source};
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn test_bus() -> Arc<EventBus> {
        Arc::new(EventBus::new(
            BusConfig::default(),
            Arc::new(MemoryEventStore::new(PersistenceConfig::default())),
            Arc::new(TrustLedger::new()),
        ))
    }

    fn counting_handler() -> (Handler, Arc<AtomicU32>) {
        let count = Arc::new(AtomicU32::new(0));
        let captured = count.clone();
        let handler: Handler = Arc::new(move |_envelope: Envelope| {
            let captured = captured.clone();
            Box::pin(async move {
                captured.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(())
            })
        });
        (handler, count)
    }

    fn recording_handler() -> (Handler, Arc<StdMutex<Vec<Envelope>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let captured = seen.clone();
        let handler: Handler = Arc::new(move |envelope: Envelope| {
            let captured = captured.clone();
            Box::pin(async move {
                captured.lock().unwrap().push(envelope);
                Ok(())
            })
        });
        (handler, seen)
    }

    fn regulation_detected(regulation_id: &str) -> Envelope {
        Envelope::new(
            Source::Regulation,
            "regulation.detected",
            json!({
                "regulation_id": regulation_id,
                "impact": "high",
                "effective_date": "2026-01-01",
                "affected_frameworks": ["GDPR"],
                "estimated_cost": 250_000,
                "trust_equity_impact": 150,
            }),
        )
    }

    fn vulnerability_discovered(vulnerability_id: &str, severity: &str) -> Envelope {
        Envelope::new(
            Source::Vulnerability,
            "vulnerability.discovered",
            json!({
                "vulnerability_id": vulnerability_id,
                "severity": severity,
                "cvss_score": 7.5,
            }),
        )
    }

    fn risk_quantified(risk_id: &str, probability: f64) -> Envelope {
        Envelope::new(
            Source::Risk,
            "risk.quantified",
            json!({
                "risk_id": risk_id,
                "probability": probability,
                "impact_cost": 10_000,
            }),
        )
    }

    #[tokio::test]
    async fn p1_invalid_envelope_is_rejected() {
        let bus = test_bus();
        let bad = Envelope::new(Source::Regulation, "regulation.detected", json!({}));
        assert!(matches!(bus.publish(bad).await, Err(BusError::Schema(_))));
    }

    #[tokio::test]
    async fn p2_duplicate_publish_is_idempotent() {
        let bus = test_bus();
        let envelope = regulation_detected("r1").with_assigned_fields();

        let first = bus.publish(envelope.clone()).await.unwrap();
        let second = bus.publish(envelope.clone()).await.unwrap();
        assert!(matches!(first, PublishOutcome::Accepted { .. }));
        assert!(matches!(second, PublishOutcome::Duplicate { .. }));

        bus.flush().await;
        let history = bus
            .history(EventFilter {
                source: Some(Source::Regulation),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn p3_routing_coverage_delivers_to_every_named_target_only() {
        let bus = test_bus();
        let (risk_handler, risk_count) = counting_handler();
        let (monitoring_handler, monitoring_count) = counting_handler();
        let (policy_handler, policy_count) = counting_handler();
        let (value_handler, value_count) = counting_handler();
        bus.register_target("risk", risk_handler);
        bus.register_target("monitoring", monitoring_handler);
        bus.register_target("policy", policy_handler);
        bus.register_target("value", value_handler);

        let envelope = vulnerability_discovered("v1", "high");
        bus.publish(envelope).await.unwrap();
        bus.flush().await;

        assert_eq!(risk_count.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(monitoring_count.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(policy_count.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(value_count.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn p4_same_source_type_events_are_delivered_in_publish_order() {
        let bus = test_bus();
        let (handler, seen) = recording_handler();
        bus.subscribe(Pattern::Source(Source::Risk), handler);

        for i in 0..5 {
            let envelope = risk_quantified(&format!("r{i}"), 0.1 * i as f64);
            bus.publish(envelope).await.unwrap();
        }
        bus.flush().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        for (i, envelope) in seen.iter().enumerate() {
            assert_eq!(envelope.data["risk_id"], format!("r{i}"));
        }
    }

    // Seed scenario 2 (spec.md §8): a critical vulnerability takes the
    // high-priority synchronous fast path.
    #[tokio::test]
    async fn scenario_critical_vulnerability_processes_synchronously() {
        let bus = test_bus();
        let (handler, count) = counting_handler();
        bus.register_target("risk", handler);

        let envelope = vulnerability_discovered("v1", "critical");
        bus.publish(envelope).await.unwrap();
        // No flush() call: the critical envelope must already have been
        // delivered by the synchronous fast path.
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }

    // Seed scenario 1 (spec.md §8): a direct `trust.points.earned` publish
    // awards points to the named entity without needing routing to a
    // business-logic subscriber.
    #[tokio::test]
    async fn scenario_trust_points_earned_updates_the_ledger() {
        let ledger = Arc::new(TrustLedger::new());
        let bus = Arc::new(EventBus::new(
            BusConfig::default(),
            Arc::new(MemoryEventStore::new(PersistenceConfig::default())),
            ledger.clone(),
        ));

        let mut evidence = regulation_detected("evt-reg-1");
        evidence.event_id = "evt-reg-1".to_string();
        bus.publish(evidence).await.unwrap();
        bus.flush().await;

        let envelope = Envelope::new(
            Source::Regulation,
            "trust.points.earned",
            json!({
                "entity_id": "system",
                "entity_type": "organization",
                "delta": 25,
                "category": "compliance",
                "evidence_event_id": "evt-reg-1",
            }),
        );
        bus.publish(envelope).await.unwrap();
        bus.flush().await;

        assert_eq!(ledger.get_balance("system").total, 25);
    }

    // Seed scenario 6 (spec.md §8): 5 failures open the breaker, calls
    // short-circuit while open, and the target recovers after the timeout.
    #[tokio::test]
    async fn scenario_resilient_target_breaker_opens_and_recovers() {
        let bus = test_bus();
        let registry = Arc::new(ResilienceRegistry::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(5)
                .with_open_timeout(Duration::from_millis(20)),
            RetryPolicy::default()
                .with_max_retry_attempts(1)
                .with_retry_delay(Duration::from_millis(1)),
            CacheConfig::default().with_enabled(false),
        ));

        let fail_count = Arc::new(AtomicU32::new(0));
        let captured = fail_count.clone();
        let handler: ResilientHandler = Arc::new(move |_envelope: Envelope| {
            let captured = captured.clone();
            Box::pin(async move {
                let n = captured.fetch_add(1, AtomicOrdering::SeqCst);
                if n < 5 {
                    Err("simulated downstream failure".to_string())
                } else {
                    Ok(json!({"ok": true}))
                }
            })
        });
        bus.register_resilient_target("risk", "assess", registry.clone(), handler);

        for i in 0..5 {
            let envelope = regulation_detected(&format!("r{i}"));
            bus.publish(envelope).await.unwrap();
        }
        bus.flush().await;
        assert_eq!(registry.breaker_state("risk", "assess"), fabric_resilience::CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;

        let envelope = regulation_detected("r-recover");
        bus.publish(envelope).await.unwrap();
        bus.flush().await;

        assert_eq!(registry.breaker_state("risk", "assess"), fabric_resilience::CircuitState::Closed);
        assert!(!registry.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn subscriber_dispatch_times_out_and_is_abandoned() {
        let bus = Arc::new(EventBus::new(
            BusConfig::default().with_dispatch_deadline(Duration::from_millis(10)),
            Arc::new(MemoryEventStore::new(PersistenceConfig::default())),
            Arc::new(TrustLedger::new()),
        ));
        let completed = Arc::new(AtomicU32::new(0));
        let captured = completed.clone();
        let handler: Handler = Arc::new(move |_envelope: Envelope| {
            let captured = captured.clone();
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                captured.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(())
            })
        });
        bus.subscribe(Pattern::Any, handler);

        let envelope = regulation_detected("r1");
        bus.publish(envelope).await.unwrap();
        bus.flush().await;

        assert_eq!(completed.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handled_latency_is_measured_from_envelope_timestamp_not_dispatch_start() {
        let bus = test_bus();
        let mut envelope = regulation_detected("r1").with_assigned_fields();
        envelope.timestamp = chrono::Utc::now() - chrono::Duration::milliseconds(500);
        bus.publish(envelope).await.unwrap();
        bus.flush().await;

        let latency = bus.metrics().recent_latencies[0];
        assert!(latency >= Duration::from_millis(450), "expected queued delay to be reflected, got {latency:?}");
    }

    #[tokio::test]
    async fn batch_tolerant_target_flushes_queued_dispatches_together() {
        let bus = test_bus();
        let registry = Arc::new(
            ResilienceRegistry::new(
                CircuitBreakerConfig::default(),
                RetryPolicy::default(),
                CacheConfig::default().with_enabled(false),
            )
            .with_batch_config(
                fabric_resilience::BatchConfig::default()
                    .with_max_items(2)
                    .with_window(Duration::from_secs(10)),
            ),
        );

        let calls = Arc::new(AtomicU32::new(0));
        let captured = calls.clone();
        let handler: BatchableHandler = Arc::new(move |input: Value| {
            let captured = captured.clone();
            Box::pin(async move {
                captured.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(input)
            })
        });
        bus.register_batch_tolerant_target("monitoring", "aggregate", registry.clone(), handler);

        bus.publish(vulnerability_discovered("batched-1", "low")).await.unwrap();
        bus.publish(vulnerability_discovered("batched-2", "low")).await.unwrap();
        bus.flush().await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_delivery() {
        let bus = test_bus();
        let (handler, count) = counting_handler();
        let id = bus.subscribe(Pattern::Any, handler);

        let envelope = regulation_detected("r1");
        bus.publish(envelope).await.unwrap();
        bus.flush().await;
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);

        bus.unsubscribe(id);
        let envelope = regulation_detected("r2");
        bus.publish(envelope).await.unwrap();
        bus.flush().await;
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }
}
