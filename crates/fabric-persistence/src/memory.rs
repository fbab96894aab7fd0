use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use fabric_types::Envelope;
use parking_lot::RwLock;
use tracing::warn;

use crate::{EventFilter, EventStore, PersistedEvent, PersistenceConfig, StoreError};

struct Inner {
    by_id: HashMap<String, PersistedEvent>,
    /// Insertion order, oldest first — drives the `max_events` eviction.
    order: VecDeque<String>,
}

/// In-memory implementation of [`EventStore`]. This is the backend exercised
/// by the test suite; a broker-backed implementation behind the same trait
/// is a deployment choice, not a second code path the bus needs to know
/// about.
pub struct MemoryEventStore {
    config: PersistenceConfig,
    inner: RwLock<Inner>,
}

impl MemoryEventStore {
    pub fn new(config: PersistenceConfig) -> Self {
        MemoryEventStore {
            config,
            inner: RwLock::new(Inner {
                by_id: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Drops expired entries. Called opportunistically on write and read so
    /// no background sweep task is needed for the in-memory backend.
    fn purge_expired_locked(inner: &mut Inner) {
        let now = Utc::now();
        while let Some(oldest_id) = inner.order.front() {
            match inner.by_id.get(oldest_id) {
                Some(entry) if entry.expires_at <= now => {
                    let id = inner.order.pop_front().unwrap();
                    inner.by_id.remove(&id);
                }
                _ => break,
            }
        }
        // Expired entries further back than the front are rare (TTLs are
        // mostly uniform) but are still swept so `len()` stays accurate.
        inner.by_id.retain(|_, v| v.expires_at > now);
    }

    fn evict_over_capacity_locked(inner: &mut Inner, max_events: usize) {
        while inner.by_id.len() > max_events {
            if let Some(oldest_id) = inner.order.pop_front() {
                inner.by_id.remove(&oldest_id);
            } else {
                break;
            }
        }
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn persist(&self, envelope: Envelope, ttl_seconds: u64) -> Result<(), StoreError> {
        if !self.config.enabled {
            return Err(StoreError::Disabled);
        }
        let mut inner = self.inner.write();
        Self::purge_expired_locked(&mut inner);

        if inner.by_id.contains_key(&envelope.event_id) {
            return Err(StoreError::Duplicate(envelope.event_id.clone()));
        }

        let stored_at = Utc::now();
        let expires_at = stored_at + ChronoDuration::seconds(ttl_seconds as i64);
        let origin_channel = envelope.channel();
        let event_id = envelope.event_id.clone();

        inner.by_id.insert(
            event_id.clone(),
            PersistedEvent {
                envelope,
                stored_at,
                expires_at,
                origin_channel,
            },
        );
        inner.order.push_back(event_id);

        let max_events = self.config.max_events;
        Self::evict_over_capacity_locked(&mut inner, max_events);
        Ok(())
    }

    async fn history(&self, filter: EventFilter) -> Result<Vec<Envelope>, StoreError> {
        let mut inner = self.inner.write();
        Self::purge_expired_locked(&mut inner);

        let mut matched: Vec<&PersistedEvent> = inner
            .by_id
            .values()
            .filter(|e| {
                filter
                    .source
                    .map(|s| s == e.envelope.source)
                    .unwrap_or(true)
            })
            .filter(|e| {
                filter
                    .event_type
                    .as_deref()
                    .map(|t| t == e.envelope.event_type)
                    .unwrap_or(true)
            })
            .filter(|e| {
                filter
                    .time_range
                    .map(|(start, end)| e.envelope.timestamp >= start && e.envelope.timestamp <= end)
                    .unwrap_or(true)
            })
            .collect();

        matched.sort_by(|a, b| {
            a.envelope
                .timestamp
                .cmp(&b.envelope.timestamp)
                .then_with(|| a.envelope.event_id.cmp(&b.envelope.event_id))
        });

        let limit = filter.effective_limit();
        if matched.len() > limit {
            warn!(matched = matched.len(), limit, "history query truncated");
        }

        Ok(matched
            .into_iter()
            .take(limit)
            .map(|e| e.envelope.clone())
            .collect())
    }

    async fn contains(&self, event_id: &str) -> bool {
        let mut inner = self.inner.write();
        Self::purge_expired_locked(&mut inner);
        inner.by_id.contains_key(event_id)
    }

    async fn len(&self) -> usize {
        let mut inner = self.inner.write();
        Self::purge_expired_locked(&mut inner);
        inner.by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_types::{json, Source};

    fn env(id: &str, source: Source, event_type: &str) -> Envelope {
        Envelope {
            event_id: id.to_string(),
            ..Envelope::new(source, event_type, json!({}))
        }
    }

    #[tokio::test]
    async fn persist_then_history_round_trips() {
        let store = MemoryEventStore::new(PersistenceConfig::default());
        store
            .persist(env("e1", Source::Regulation, "regulation.detected"), 60)
            .await
            .unwrap();

        let results = store.history(EventFilter::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event_id, "e1");
        assert!(store.contains("e1").await);
    }

    #[tokio::test]
    async fn duplicate_event_id_is_rejected() {
        let store = MemoryEventStore::new(PersistenceConfig::default());
        store
            .persist(env("e1", Source::Regulation, "regulation.detected"), 60)
            .await
            .unwrap();
        let err = store
            .persist(env("e1", Source::Regulation, "regulation.detected"), 60)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Duplicate("e1".to_string()));
    }

    #[tokio::test]
    async fn max_events_cap_evicts_oldest_first() {
        let store = MemoryEventStore::new(PersistenceConfig::default().with_max_events(2));
        store
            .persist(env("e1", Source::Regulation, "regulation.detected"), 60)
            .await
            .unwrap();
        store
            .persist(env("e2", Source::Regulation, "regulation.detected"), 60)
            .await
            .unwrap();
        store
            .persist(env("e3", Source::Regulation, "regulation.detected"), 60)
            .await
            .unwrap();

        assert_eq!(store.len().await, 2);
        assert!(!store.contains("e1").await);
        assert!(store.contains("e2").await);
        assert!(store.contains("e3").await);
    }

    #[tokio::test]
    async fn ttl_expiry_evicts_entries() {
        let store = MemoryEventStore::new(PersistenceConfig::default());
        store
            .persist(env("e1", Source::Regulation, "regulation.detected"), 0)
            .await
            .unwrap();
        // ttl_seconds=0 means expires_at <= now almost immediately.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn disabled_store_rejects_persist() {
        let store = MemoryEventStore::new(PersistenceConfig::default().with_enabled(false));
        let err = store
            .persist(env("e1", Source::Regulation, "regulation.detected"), 60)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Disabled);
    }

    #[tokio::test]
    async fn history_filters_by_source_and_type() {
        let store = MemoryEventStore::new(PersistenceConfig::default());
        store
            .persist(env("e1", Source::Regulation, "regulation.detected"), 60)
            .await
            .unwrap();
        store
            .persist(env("e2", Source::Vulnerability, "vulnerability.discovered"), 60)
            .await
            .unwrap();

        let filter = EventFilter {
            source: Some(Source::Vulnerability),
            ..Default::default()
        };
        let results = store.history(filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event_id, "e2");
    }
}
