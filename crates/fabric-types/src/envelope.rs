use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The fixed enumeration of components that may appear as an envelope's
/// `source`. `trust_engine` and `orchestrator` are not domain subsystems —
/// they are the ledger and the workflow orchestrator speaking for themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Regulation,
    Vulnerability,
    Risk,
    Monitoring,
    Policy,
    Intelligence,
    Value,
    Clearance,
    TrustEngine,
    Orchestrator,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Regulation => "regulation",
            Source::Vulnerability => "vulnerability",
            Source::Risk => "risk",
            Source::Monitoring => "monitoring",
            Source::Policy => "policy",
            Source::Intelligence => "intelligence",
            Source::Value => "value",
            Source::Clearance => "clearance",
            Source::TrustEngine => "trust_engine",
            Source::Orchestrator => "orchestrator",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity kinds the trust ledger tracks a balance for (spec.md §3, Trust
/// transaction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Organization,
    User,
    Asset,
}

/// A validated event record. `(source, type)` is the discriminator pair that
/// selects the schema `data` must satisfy (invariant E1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: Source,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}

impl Envelope {
    /// Constructs an envelope with `event_id` and `timestamp` left unset so
    /// the bus can assign them at publish time (invariant E3).
    pub fn new(source: Source, event_type: impl Into<String>, data: Value) -> Self {
        Envelope {
            event_id: String::new(),
            timestamp: Utc::now(),
            source,
            event_type: event_type.into(),
            data,
        }
    }

    /// Fills in `event_id`/`timestamp` if absent, per invariant E3. Idempotent
    /// on an envelope that already carries both.
    pub fn with_assigned_fields(mut self) -> Self {
        if self.event_id.is_empty() {
            self.event_id = Uuid::now_v7().to_string();
        }
        self
    }

    pub fn channel(&self) -> String {
        format!("{}:event:{}", self.source, self.event_type)
    }

    pub fn global_channel(&self) -> String {
        format!("global:event:{}", self.event_type)
    }

    /// Matches spec.md §4.5's `is_high_priority` predicate: the event type is
    /// one of the three severity-bearing alert types and its `data.severity`
    /// is `critical`.
    pub fn is_high_priority(&self) -> bool {
        const FAST_PATH_TYPES: [&str; 3] = [
            "vulnerability.discovered",
            "monitoring.alert",
            "threat.intelligence.updated",
        ];
        FAST_PATH_TYPES.contains(&self.event_type.as_str())
            && self.data.get("severity").and_then(Value::as_str) == Some("critical")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assigns_event_id_only_when_absent() {
        let e = Envelope::new(Source::Vulnerability, "vulnerability.discovered", json!({}));
        assert!(e.event_id.is_empty());
        let assigned = e.with_assigned_fields();
        assert!(!assigned.event_id.is_empty());

        let preset = Envelope {
            event_id: "fixed-id".into(),
            ..Envelope::new(Source::Vulnerability, "vulnerability.discovered", json!({}))
        }
        .with_assigned_fields();
        assert_eq!(preset.event_id, "fixed-id");
    }

    #[test]
    fn high_priority_requires_critical_severity_on_known_types() {
        let critical = Envelope::new(
            Source::Vulnerability,
            "vulnerability.discovered",
            json!({"severity": "critical"}),
        );
        assert!(critical.is_high_priority());

        let high = Envelope::new(
            Source::Vulnerability,
            "vulnerability.discovered",
            json!({"severity": "high"}),
        );
        assert!(!high.is_high_priority());

        let unrelated_type = Envelope::new(
            Source::Regulation,
            "regulation.detected",
            json!({"severity": "critical"}),
        );
        assert!(!unrelated_type.is_high_priority());
    }

    #[test]
    fn channel_names_match_broker_layer_convention() {
        let e = Envelope::new(Source::Monitoring, "monitoring.alert", json!({}));
        assert_eq!(e.channel(), "monitoring:event:monitoring.alert");
        assert_eq!(e.global_channel(), "global:event:monitoring.alert");
    }
}
