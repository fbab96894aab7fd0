//! Declarative routing-rule engine (spec.md §4.4). The rule set is
//! immutable after construction, so routing itself takes no lock.

use std::sync::Arc;

use fabric_types::{Envelope, Source};

pub type Condition = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;
pub type Transform = Arc<dyn Fn(Envelope) -> Envelope + Send + Sync>;

pub struct RoutingRule {
    pub event_type: String,
    /// Empty means "any source".
    pub sources: Vec<Source>,
    pub targets: Vec<String>,
    pub priority: i32,
    pub condition: Option<Condition>,
    pub transform: Option<Transform>,
}

impl RoutingRule {
    pub fn new(event_type: impl Into<String>, sources: Vec<Source>, targets: Vec<&str>) -> Self {
        RoutingRule {
            event_type: event_type.into(),
            sources,
            targets: targets.into_iter().map(String::from).collect(),
            priority: 0,
            condition: None,
            transform: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    fn matches_type_and_source(&self, envelope: &Envelope) -> bool {
        self.event_type == envelope.event_type
            && (self.sources.is_empty() || self.sources.contains(&envelope.source))
    }
}

/// Static, ordered table of rules. Declaration order is preserved within a
/// priority tier; rules are stably sorted by `priority` ascending once, at
/// construction.
pub struct RoutingTable {
    rules: Vec<RoutingRule>,
}

impl RoutingTable {
    pub fn new(mut rules: Vec<RoutingRule>) -> Self {
        rules.sort_by_key(|r| r.priority);
        RoutingTable { rules }
    }

    /// Produces the ordered `(target_component, routed_envelope)` pairs for
    /// `envelope`, per spec.md §4.4's three-step rule evaluation.
    pub fn route(&self, envelope: &Envelope) -> Vec<(String, Envelope)> {
        let mut out = Vec::new();
        for rule in &self.rules {
            if !rule.matches_type_and_source(envelope) {
                continue;
            }
            if let Some(condition) = &rule.condition {
                if !condition(envelope) {
                    continue;
                }
            }
            let routed = match &rule.transform {
                Some(transform) => transform(envelope.clone()),
                None => envelope.clone(),
            };
            for target in &rule.targets {
                out.push((target.clone(), routed.clone()));
            }
        }
        out
    }
}

/// The canonical routing table (spec.md §4.4).
pub fn canonical_rules() -> Vec<RoutingRule> {
    vec![
        RoutingRule::new("regulation.detected", vec![Source::Regulation], vec!["vulnerability", "risk"]),
        RoutingRule::new(
            "compliance.gap.identified",
            vec![Source::Regulation],
            vec!["vulnerability", "risk", "policy"],
        ),
        RoutingRule::new(
            "vulnerability.discovered",
            vec![Source::Vulnerability],
            vec!["risk", "monitoring", "policy"],
        ),
        RoutingRule::new(
            "security.posture.updated",
            vec![Source::Vulnerability],
            vec!["value", "regulation"],
        ),
        RoutingRule::new("risk.quantified", vec![Source::Risk], vec!["clearance", "value"]),
        RoutingRule::new(
            "monitoring.alert",
            vec![Source::Monitoring],
            vec!["vulnerability", "intelligence", "clearance"],
        ),
        RoutingRule::new(
            "metrics.collected",
            vec![Source::Monitoring],
            vec!["value", "regulation", "vulnerability"],
        ),
        RoutingRule::new(
            "threat.intelligence.updated",
            vec![Source::Intelligence],
            vec!["vulnerability", "monitoring", "policy"],
        ),
        // Any of the 8 domain sources may emit `trust.points.earned`; an
        // empty `sources` list means "any source" matches.
        RoutingRule::new("trust.points.earned", vec![], vec!["trust_engine", "value"]),
    ]
}
