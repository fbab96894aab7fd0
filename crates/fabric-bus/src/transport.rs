//! Subscription registry for the bus's delivery layer (spec.md §4.3). A
//! single in-process registry stands in for the broker: the distinction
//! between "in-process" and "broker-backed" subscribers is a deployment
//! choice, not a second code path (see the workspace-level decision notes
//! in `Cargo.toml`).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use fabric_types::{Envelope, Source};

pub type SubscriptionId = u64;

/// A delivered handler's outcome. Failures are contained to the
/// subscription that raised them — they never block sibling subscribers
/// (spec.md §4.3).
pub type DeliveryResult = Result<(), String>;

pub type HandlerFuture = Pin<Box<dyn Future<Output = DeliveryResult> + Send>>;
pub type Handler = Arc<dyn Fn(Envelope) -> HandlerFuture + Send + Sync>;

/// Optional per-subscription predicate (spec.md §4.5): a subscriber
/// receives only envelopes for which this, when present, returns true.
pub type Filter = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

/// The three subscription shapes spec.md §4.3 names: an exact
/// `(source, type)` pair, every event from one `source`, or every event on
/// the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Exact { source: Source, event_type: String },
    Source(Source),
    Any,
}

impl Pattern {
    fn matches(&self, envelope: &Envelope) -> bool {
        match self {
            Pattern::Exact { source, event_type } => {
                *source == envelope.source && event_type == &envelope.event_type
            }
            Pattern::Source(source) => *source == envelope.source,
            Pattern::Any => true,
        }
    }
}

struct Subscription {
    pattern: Pattern,
    filter: Option<Filter>,
    handler: Handler,
}

/// Registry of active subscriptions. Dispatch snapshots the matching set
/// under the map's lock-free read path before invoking any handler, so a
/// concurrent `unsubscribe` can race a dispatch in flight but never causes
/// a subscriber to receive more than the one event already captured in
/// that snapshot (spec.md §4.3, "unsubscribe is safe mid-dispatch").
#[derive(Default)]
pub struct Transport {
    subscriptions: DashMap<SubscriptionId, Subscription>,
    next_id: AtomicU64,
}

impl Transport {
    pub fn new() -> Self {
        Transport {
            subscriptions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, pattern: Pattern, handler: Handler) -> SubscriptionId {
        self.subscribe_filtered(pattern, handler, None)
    }

    /// Subscribes with an optional `filter`: when present, a matching
    /// envelope is delivered to this subscriber only if `filter` also
    /// returns true (spec.md §4.5).
    pub fn subscribe_filtered(&self, pattern: Pattern, handler: Handler, filter: Option<Filter>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.insert(id, Subscription { pattern, filter, handler });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Snapshot of handlers whose pattern matches `envelope`, in
    /// subscription-id order (registration order) so delivery is
    /// deterministic for tests.
    pub fn matching(&self, envelope: &Envelope) -> Vec<(SubscriptionId, Handler)> {
        let mut matches: Vec<(SubscriptionId, Handler)> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.pattern.matches(envelope))
            .filter(|entry| entry.filter.as_ref().map_or(true, |filter| filter(envelope)))
            .map(|entry| (*entry.key(), entry.handler.clone()))
            .collect();
        matches.sort_by_key(|(id, _)| *id);
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_types::json;
    use std::sync::Mutex;

    fn collecting_handler() -> (Handler, Arc<Mutex<Vec<Envelope>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
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

    #[test]
    fn exact_pattern_only_matches_same_source_and_type() {
        let transport = Transport::new();
        let (handler, _) = collecting_handler();
        transport.subscribe(
            Pattern::Exact {
                source: Source::Vulnerability,
                event_type: "vulnerability.discovered".into(),
            },
            handler,
        );

        let matching = Envelope::new(Source::Vulnerability, "vulnerability.discovered", json!({}));
        let other_type = Envelope::new(Source::Vulnerability, "security.posture.updated", json!({}));
        let other_source = Envelope::new(Source::Risk, "vulnerability.discovered", json!({}));

        assert_eq!(transport.matching(&matching).len(), 1);
        assert_eq!(transport.matching(&other_type).len(), 0);
        assert_eq!(transport.matching(&other_source).len(), 0);
    }

    #[test]
    fn source_wildcard_matches_every_type_from_that_source() {
        let transport = Transport::new();
        let (handler, _) = collecting_handler();
        transport.subscribe(Pattern::Source(Source::Monitoring), handler);

        assert_eq!(
            transport
                .matching(&Envelope::new(Source::Monitoring, "monitoring.alert", json!({})))
                .len(),
            1
        );
        assert_eq!(
            transport
                .matching(&Envelope::new(Source::Monitoring, "metrics.collected", json!({})))
                .len(),
            1
        );
        assert_eq!(
            transport
                .matching(&Envelope::new(Source::Risk, "risk.quantified", json!({})))
                .len(),
            0
        );
    }

    #[test]
    fn total_wildcard_matches_everything() {
        let transport = Transport::new();
        let (handler, _) = collecting_handler();
        transport.subscribe(Pattern::Any, handler);
        assert_eq!(
            transport
                .matching(&Envelope::new(Source::Policy, "anything.at.all", json!({})))
                .len(),
            1
        );
    }

    #[test]
    fn filter_excludes_envelopes_the_predicate_rejects() {
        let transport = Transport::new();
        let (handler, _) = collecting_handler();
        let filter: Filter = Arc::new(|envelope: &Envelope| envelope.data["severity"] == "critical");
        transport.subscribe_filtered(Pattern::Source(Source::Vulnerability), handler, Some(filter));

        let low = Envelope::new(Source::Vulnerability, "vulnerability.discovered", json!({"severity": "low"}));
        let critical = Envelope::new(Source::Vulnerability, "vulnerability.discovered", json!({"severity": "critical"}));

        assert_eq!(transport.matching(&low).len(), 0);
        assert_eq!(transport.matching(&critical).len(), 1);
    }

    #[test]
    fn unsubscribe_removes_from_future_dispatch() {
        let transport = Transport::new();
        let (handler, _) = collecting_handler();
        let id = transport.subscribe(Pattern::Any, handler);
        assert_eq!(transport.subscriber_count(), 1);
        transport.unsubscribe(id);
        assert_eq!(transport.subscriber_count(), 0);
        assert_eq!(
            transport
                .matching(&Envelope::new(Source::Policy, "anything.at.all", json!({})))
                .len(),
            0
        );
    }
}
