use crate::envelope::{Envelope, Source};
use serde_json::Value;
use thiserror::Error;

/// Payload validation failures (spec.md §4.1). Pure and free of I/O — the
/// validator never touches the persistence store or the bus.
#[derive(Debug, Error, PartialEq, Clone)]
pub enum SchemaError {
    #[error("unknown (source, type) pair: ({event_source}, {event_type})")]
    UnknownVariant { event_source: String, event_type: String },
    #[error("missing required field `{field}` on {event_type}")]
    MissingField { event_type: String, field: &'static str },
    #[error("field `{field}` on {event_type} has the wrong type, expected {expected}")]
    WrongType {
        event_type: String,
        field: &'static str,
        expected: &'static str,
    },
    #[error("field `{field}` on {event_type} must be one of {allowed:?}")]
    InvalidEnum {
        event_type: String,
        field: &'static str,
        allowed: &'static [&'static str],
    },
    #[error("field `{field}` on {event_type} must be within [{min}, {max}], got {actual}")]
    OutOfRange {
        event_type: String,
        field: &'static str,
        min: f64,
        max: f64,
        actual: f64,
    },
}

const SEVERITIES: &[&str] = &["low", "medium", "high", "critical"];
const ENTITY_TYPES: &[&str] = &["organization", "user", "asset"];
const CATEGORIES: &[&str] = &[
    "compliance",
    "security",
    "risk_management",
    "automation",
    "intelligence",
];
const URGENCIES: &[&str] = &["low", "medium", "high", "immediate"];

struct Field {
    name: &'static str,
    required: bool,
    kind: Kind,
}

enum Kind {
    String,
    StringEnum(&'static [&'static str]),
    StringArray,
    Number,
    NumberRange(f64, f64),
    Object,
    Bool,
}

fn req(name: &'static str, kind: Kind) -> Field {
    Field { name, required: true, kind }
}

fn opt(name: &'static str, kind: Kind) -> Field {
    Field { name, required: false, kind }
}

/// Validates `envelope.data` against the schema selected by
/// `(envelope.source, envelope.event_type)`. Unknown pairs are a hard error
/// at the edge (spec.md §4.1, §9 Design Notes).
pub fn validate(envelope: &Envelope) -> Result<(), SchemaError> {
    let fields = schema_for(envelope.source, &envelope.event_type).ok_or_else(|| {
        SchemaError::UnknownVariant {
            event_source: envelope.source.to_string(),
            event_type: envelope.event_type.clone(),
        }
    })?;

    for field in fields {
        check_field(&envelope.event_type, &envelope.data, field)?;
    }
    Ok(())
}

fn schema_for(source: Source, event_type: &str) -> Option<Vec<Field>> {
    use Source::*;
    let fields = match (source, event_type) {
        (Regulation, "regulation.detected") => vec![
            req("regulation_id", Kind::String),
            req("impact", Kind::StringEnum(SEVERITIES)),
            req("effective_date", Kind::String),
            req("affected_frameworks", Kind::StringArray),
            req("estimated_cost", Kind::NumberRange(0.0, f64::MAX)),
            req("trust_equity_impact", Kind::Number),
        ],
        (Regulation, "compliance.gap.identified") => vec![
            req("gap_id", Kind::String),
            req("framework", Kind::String),
            req("severity", Kind::StringEnum(SEVERITIES)),
            opt("description", Kind::String),
        ],
        (Vulnerability, "vulnerability.discovered") => vec![
            req("vulnerability_id", Kind::String),
            req("severity", Kind::StringEnum(SEVERITIES)),
            req("cvss_score", Kind::NumberRange(0.0, 10.0)),
            opt("description", Kind::String),
        ],
        (Vulnerability, "security.posture.updated") => vec![
            req("posture_score", Kind::NumberRange(0.0, 100.0)),
            opt("previous_score", Kind::NumberRange(0.0, 100.0)),
            opt("delta", Kind::Number),
        ],
        (Risk, "risk.quantified") => vec![
            req("risk_id", Kind::String),
            req("probability", Kind::NumberRange(0.0, 1.0)),
            req("impact_cost", Kind::NumberRange(0.0, f64::MAX)),
            opt("category", Kind::String),
        ],
        (Monitoring, "monitoring.alert") => vec![
            req("alert_id", Kind::String),
            req("severity", Kind::StringEnum(SEVERITIES)),
            req("source_system", Kind::String),
            opt("description", Kind::String),
        ],
        (Monitoring, "metrics.collected") => vec![
            req("metric_name", Kind::String),
            req("value", Kind::Number),
            opt("unit", Kind::String),
        ],
        (Intelligence, "threat.intelligence.updated") => vec![
            req("threat_id", Kind::String),
            req("severity", Kind::StringEnum(SEVERITIES)),
            req("indicator_type", Kind::String),
            opt("confidence", Kind::NumberRange(0.0, 1.0)),
        ],
        (TrustEngine, "trust.score.updated") => vec![
            req("previous_score", Kind::Number),
            req("new_score", Kind::Number),
            req("change", Kind::Number),
            req("tier", Kind::String),
            req("tier_change", Kind::Bool),
            req("breakdown", Kind::Object),
        ],
        (Orchestrator, "emergency.decision.required") => vec![
            req("workflow_id", Kind::String),
            req("urgency", Kind::StringEnum(URGENCIES)),
            req("sla_minutes", Kind::NumberRange(0.0, f64::MAX)),
            req("reason", Kind::String),
        ],
        (Orchestrator, "workflow.started") => vec![
            req("workflow_id", Kind::String),
            req("kind", Kind::String),
            req("context", Kind::Object),
        ],
        (Orchestrator, "workflow.step.requested") => vec![
            req("workflow_id", Kind::String),
            req("step_id", Kind::String),
            req("component", Kind::String),
            req("action", Kind::String),
            req("input", Kind::Object),
        ],
        (Orchestrator, "workflow.step.completed") => vec![
            req("workflow_id", Kind::String),
            req("step_id", Kind::String),
            opt("output", Kind::Object),
            opt("error", Kind::String),
        ],
        (Orchestrator, "workflow.completed") => vec![
            req("workflow_id", Kind::String),
            req("result", Kind::Object),
        ],
        (Orchestrator, "workflow.failed") => vec![
            req("workflow_id", Kind::String),
            req("error", Kind::String),
        ],
        (Orchestrator, "workflow.compensated") => vec![req("workflow_id", Kind::String)],
        (_, "trust.points.earned") if source != TrustEngine && source != Orchestrator => vec![
            req("entity_id", Kind::String),
            req("entity_type", Kind::StringEnum(ENTITY_TYPES)),
            req("category", Kind::StringEnum(CATEGORIES)),
            req("delta", Kind::Number),
            req("evidence_event_id", Kind::String),
            opt("multiplier", Kind::Number),
        ],
        _ => return None,
    };
    Some(fields)
}

fn check_field(event_type: &str, data: &Value, field: Field) -> Result<(), SchemaError> {
    let value = match data.get(field.name) {
        Some(v) => v,
        None if field.required => {
            return Err(SchemaError::MissingField {
                event_type: event_type.to_string(),
                field: field.name,
            })
        }
        None => return Ok(()),
    };

    match field.kind {
        Kind::String => {
            value.as_str().ok_or_else(|| SchemaError::WrongType {
                event_type: event_type.to_string(),
                field: field.name,
                expected: "string",
            })?;
        }
        Kind::StringEnum(allowed) => {
            let s = value.as_str().ok_or_else(|| SchemaError::WrongType {
                event_type: event_type.to_string(),
                field: field.name,
                expected: "string",
            })?;
            if !allowed.contains(&s) {
                return Err(SchemaError::InvalidEnum {
                    event_type: event_type.to_string(),
                    field: field.name,
                    allowed,
                });
            }
        }
        Kind::StringArray => {
            let arr = value.as_array().ok_or_else(|| SchemaError::WrongType {
                event_type: event_type.to_string(),
                field: field.name,
                expected: "array of string",
            })?;
            for item in arr {
                if item.as_str().is_none() {
                    return Err(SchemaError::WrongType {
                        event_type: event_type.to_string(),
                        field: field.name,
                        expected: "array of string",
                    });
                }
            }
        }
        Kind::Number => {
            value.as_f64().ok_or_else(|| SchemaError::WrongType {
                event_type: event_type.to_string(),
                field: field.name,
                expected: "number",
            })?;
        }
        Kind::NumberRange(min, max) => {
            let n = value.as_f64().ok_or_else(|| SchemaError::WrongType {
                event_type: event_type.to_string(),
                field: field.name,
                expected: "number",
            })?;
            if n < min || n > max {
                return Err(SchemaError::OutOfRange {
                    event_type: event_type.to_string(),
                    field: field.name,
                    min,
                    max,
                    actual: n,
                });
            }
        }
        Kind::Object => {
            if !value.is_object() {
                return Err(SchemaError::WrongType {
                    event_type: event_type.to_string(),
                    field: field.name,
                    expected: "object",
                });
            }
        }
        Kind::Bool => {
            value.as_bool().ok_or_else(|| SchemaError::WrongType {
                event_type: event_type.to_string(),
                field: field.name,
                expected: "bool",
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use serde_json::json;

    fn env(source: Source, event_type: &str, data: Value) -> Envelope {
        Envelope::new(source, event_type, data).with_assigned_fields()
    }

    #[test]
    fn unknown_pair_is_rejected() {
        let e = env(Source::Value, "value.unheard_of", json!({}));
        assert!(matches!(validate(&e), Err(SchemaError::UnknownVariant { .. })));
    }

    #[test]
    fn regulation_detected_accepts_a_well_formed_payload() {
        let e = env(
            Source::Regulation,
            "regulation.detected",
            json!({
                "regulation_id": "G-2024-01",
                "impact": "high",
                "effective_date": "2026-01-01",
                "affected_frameworks": ["GDPR"],
                "estimated_cost": 250000,
                "trust_equity_impact": 150
            }),
        );
        assert!(validate(&e).is_ok());
    }

    #[test]
    fn cvss_score_out_of_range_is_rejected() {
        let e = env(
            Source::Vulnerability,
            "vulnerability.discovered",
            json!({"vulnerability_id": "CVE-1", "severity": "critical", "cvss_score": 11.0}),
        );
        assert!(matches!(validate(&e), Err(SchemaError::OutOfRange { .. })));
    }

    #[test]
    fn invalid_severity_enum_is_rejected() {
        let e = env(
            Source::Monitoring,
            "monitoring.alert",
            json!({"alert_id": "A1", "severity": "disastrous", "source_system": "edr"}),
        );
        assert!(matches!(validate(&e), Err(SchemaError::InvalidEnum { .. })));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let e = env(
            Source::Risk,
            "risk.quantified",
            json!({"risk_id": "R1", "probability": 0.5}),
        );
        assert!(matches!(validate(&e), Err(SchemaError::MissingField { .. })));
    }

    #[test]
    fn trust_points_earned_accepts_any_domain_source() {
        for source in [Source::Regulation, Source::Clearance, Source::Policy] {
            let e = env(
                source,
                "trust.points.earned",
                json!({
                    "entity_id": "system",
                    "entity_type": "organization",
                    "category": "compliance",
                    "delta": 25,
                    "evidence_event_id": "evt-1"
                }),
            );
            assert!(validate(&e).is_ok(), "source {source} should be accepted");
        }
    }

    #[test]
    fn trust_points_earned_rejects_trust_engine_as_source() {
        let e = env(
            Source::TrustEngine,
            "trust.points.earned",
            json!({
                "entity_id": "system",
                "entity_type": "organization",
                "category": "compliance",
                "delta": 25,
                "evidence_event_id": "evt-1"
            }),
        );
        assert!(matches!(validate(&e), Err(SchemaError::UnknownVariant { .. })));
    }
}
