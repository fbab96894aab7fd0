//! Bounded TTL persistence and replay store for the event bus (spec.md §4.2).
//!
//! Persistence is best-effort: a `StoreError` here never blocks delivery of
//! an envelope, it is only surfaced to callers of `history` and counted in
//! bus metrics.

mod config;
mod memory;

pub use config::PersistenceConfig;
pub use memory::MemoryEventStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fabric_types::{Envelope, Source};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("persistence is disabled")]
    Disabled,
    #[error("event {0} already persisted")]
    Duplicate(String),
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
}

/// Query parameters for `history` (spec.md §4.2). `limit` defaults to 1000
/// when unset.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub source: Option<Source>,
    pub event_type: Option<String>,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(1000)
    }
}

/// A record as held by the store: the envelope plus its storage metadata.
#[derive(Debug, Clone)]
pub struct PersistedEvent {
    pub envelope: Envelope,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub origin_channel: String,
}

#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    async fn persist(&self, envelope: Envelope, ttl_seconds: u64) -> Result<(), StoreError>;
    async fn history(&self, filter: EventFilter) -> Result<Vec<Envelope>, StoreError>;
    /// Whether `event_id` is currently held (used by the ledger to satisfy
    /// invariant L2 without requiring a full history scan).
    async fn contains(&self, event_id: &str) -> bool;
    async fn len(&self) -> usize;
}
