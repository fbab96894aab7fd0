//! Append-only trust equity ledger (spec.md §4.7). Subscribes conceptually
//! to `trust.points.earned`; the bus is the one that calls [`TrustLedger::record`]
//! after routing, since the ledger itself never talks to the transport
//! layer — keeping component-to-component coupling funneled through the bus.

mod category;
mod tier;

pub use category::Category;
pub use tier::{Tier, TIER_THRESHOLDS};

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::{DashMap, DashSet};
use fabric_persistence::EventStore;
use fabric_types::{Envelope, EntityType, Source};
use parking_lot::RwLock;
use serde_json::json;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("envelope is not a trust.points.earned event")]
    WrongEventType,
    #[error("missing or malformed field `{0}` on trust.points.earned payload")]
    MalformedPayload(&'static str),
    /// Invariant L2: `evidence_event_id` must name an event the persistence
    /// store is still holding.
    #[error("evidence_event_id `{0}` is not a persisted event")]
    UnknownEvidence(String),
}

/// Append-only ledger entry attributing a signed point delta to an entity
/// (spec.md §3, Trust transaction).
#[derive(Debug, Clone)]
pub struct TrustTransaction {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub delta: i64,
    pub category: Category,
    pub source_component: Source,
    pub evidence_event_id: String,
    pub timestamp: DateTime<Utc>,
    pub multiplier: f64,
}

/// Result of [`TrustLedger::get_balance`] — the only externally offered
/// read (spec.md §4.7).
#[derive(Debug, Clone)]
pub struct Balance {
    pub total: i64,
    pub breakdown: HashMap<Category, i64>,
    pub tier: Tier,
}

#[derive(Debug, Clone)]
pub enum RecordOutcome {
    Recorded {
        transaction: TrustTransaction,
        /// `Some` when the entity's tier changed, carrying the
        /// `trust.score.updated` envelope the bus should re-publish.
        tier_change: Option<Envelope>,
    },
    /// `evidence_event_id` was already recorded; idempotent no-op.
    Duplicate,
}

struct EntityLedger {
    transactions: Vec<TrustTransaction>,
    last_tier: Tier,
}

impl EntityLedger {
    fn new() -> Self {
        EntityLedger {
            transactions: Vec::new(),
            last_tier: Tier::Bronze,
        }
    }

    fn balance_as_of(&self, now: DateTime<Utc>, window: ChronoDuration) -> Balance {
        let cutoff = now - window;
        let mut breakdown: HashMap<Category, i64> = HashMap::new();
        let mut raw_total = 0.0f64;

        for tx in self.transactions.iter().filter(|t| t.timestamp >= cutoff) {
            let weighted = tx.delta as f64 * tx.multiplier;
            raw_total += weighted;
            *breakdown.entry(tx.category).or_insert(0) += weighted.round() as i64;
        }

        let total = raw_total.clamp(0.0, 1000.0).round() as i64;
        Balance {
            total,
            breakdown,
            tier: Tier::from_total(total),
        }
    }
}

/// Single logical ledger resource. Per-entity updates are serialized by a
/// per-entity lock (striped by entity id via `DashMap`'s internal
/// sharding); unrelated entities update concurrently (spec.md §5).
pub struct TrustLedger {
    entities: DashMap<String, RwLock<EntityLedger>>,
    seen_evidence: DashSet<String>,
    /// Rolling window over which the score total is computed (spec.md §4.7:
    /// 12 months).
    window: ChronoDuration,
}

impl TrustLedger {
    pub fn new() -> Self {
        TrustLedger {
            entities: DashMap::new(),
            seen_evidence: DashSet::new(),
            window: ChronoDuration::days(365),
        }
    }

    /// Processes a `trust.points.earned` envelope: existence check on
    /// `evidence_event_id` (invariant L2), idempotency check, append,
    /// recompute, and tier-change detection (spec.md §4.7 steps 1-4).
    pub async fn record(&self, envelope: &Envelope, store: &dyn EventStore) -> Result<RecordOutcome, LedgerError> {
        if envelope.event_type != "trust.points.earned" {
            return Err(LedgerError::WrongEventType);
        }
        let data = &envelope.data;
        let entity_id = data
            .get("entity_id")
            .and_then(|v| v.as_str())
            .ok_or(LedgerError::MalformedPayload("entity_id"))?
            .to_string();
        let entity_type_str = data
            .get("entity_type")
            .and_then(|v| v.as_str())
            .ok_or(LedgerError::MalformedPayload("entity_type"))?;
        let entity_type = match entity_type_str {
            "organization" => EntityType::Organization,
            "user" => EntityType::User,
            "asset" => EntityType::Asset,
            _ => return Err(LedgerError::MalformedPayload("entity_type")),
        };
        let delta = data
            .get("delta")
            .and_then(|v| v.as_i64())
            .ok_or(LedgerError::MalformedPayload("delta"))?;
        let category = data
            .get("category")
            .and_then(|v| v.as_str())
            .and_then(Category::parse)
            .ok_or(LedgerError::MalformedPayload("category"))?;
        let evidence_event_id = data
            .get("evidence_event_id")
            .and_then(|v| v.as_str())
            .ok_or(LedgerError::MalformedPayload("evidence_event_id"))?
            .to_string();
        let multiplier = data.get("multiplier").and_then(|v| v.as_f64()).unwrap_or(1.0);

        // Invariant L2: evidence_event_id must name a persisted event.
        if !store.contains(&evidence_event_id).await {
            return Err(LedgerError::UnknownEvidence(evidence_event_id));
        }

        // Step 1: idempotency check on evidence_event_id.
        if !self.seen_evidence.insert(evidence_event_id.clone()) {
            return Ok(RecordOutcome::Duplicate);
        }

        let transaction = TrustTransaction {
            entity_id: entity_id.clone(),
            entity_type,
            delta,
            category,
            source_component: envelope.source,
            evidence_event_id,
            timestamp: envelope.timestamp,
            multiplier,
        };

        let entry = self
            .entities
            .entry(entity_id.clone())
            .or_insert_with(|| RwLock::new(EntityLedger::new()));
        let mut state = entry.write();

        let now = Utc::now();
        let previous_balance = state.balance_as_of(now, self.window);

        // Step 2: append.
        state.transactions.push(transaction.clone());

        // Step 3 & 4: recompute and derive tier.
        let balance = state.balance_as_of(now, self.window);
        let tier_change = if balance.tier != state.last_tier {
            let previous_tier = state.last_tier;
            state.last_tier = balance.tier;
            info!(entity_id = %entity_id, from = %previous_tier, to = %balance.tier, "trust tier changed");
            Some(build_tier_change_envelope(&previous_balance, &balance))
        } else {
            None
        };

        Ok(RecordOutcome::Recorded {
            transaction,
            tier_change,
        })
    }

    pub fn get_balance(&self, entity_id: &str) -> Balance {
        match self.entities.get(entity_id) {
            Some(entry) => entry.read().balance_as_of(Utc::now(), self.window),
            None => Balance {
                total: 0,
                breakdown: HashMap::new(),
                tier: Tier::Bronze,
            },
        }
    }

    pub fn transaction_count(&self, entity_id: &str) -> usize {
        self.entities
            .get(entity_id)
            .map(|e| e.read().transactions.len())
            .unwrap_or(0)
    }
}

impl Default for TrustLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn build_tier_change_envelope(previous_balance: &Balance, balance: &Balance) -> Envelope {
    let breakdown: serde_json::Map<String, serde_json::Value> = balance
        .breakdown
        .iter()
        .map(|(category, total)| (category.to_string(), json!(total)))
        .collect();
    Envelope::new(
        Source::TrustEngine,
        "trust.score.updated",
        json!({
            "previous_score": previous_balance.total,
            "new_score": balance.total,
            "change": balance.total - previous_balance.total,
            "tier": balance.tier.as_str(),
            "tier_change": true,
            "breakdown": breakdown,
        }),
    )
    .with_assigned_fields()
}
