//! The two canonical workflows named in spec.md §4.8: `breach_response` and
//! `trust_score_generation`. Each is a fixed chain, not a general DAG
//! builder — [`crate::step::WorkflowDefinition`] supports branching, but
//! neither canonical workflow needs it.

use std::sync::Arc;
use std::time::Duration;

use fabric_types::{json, Envelope, Source};

use crate::step::StepDefinition;
use crate::step::WorkflowDefinition;

/// Reacts to a newly discovered threat: assess impact, map it against
/// regulation, quantify the resulting risk, and route a decision — escalating
/// to a human operator if automated routing itself fails.
pub fn breach_response() -> WorkflowDefinition {
    let steps = vec![
        StepDefinition::new("intelligence-ingest", "intelligence", "ingest_threat", Arc::new(|ctx| ctx.input.clone())),
        StepDefinition::new(
            "security-impact-assessment",
            "vulnerability",
            "assess_impact",
            Arc::new(|ctx| {
                json!({
                    "threat": ctx.output("intelligence-ingest").cloned().unwrap_or(json!({})),
                })
            }),
        )
        .depends_on(&["intelligence-ingest"]),
        StepDefinition::new(
            "regulatory-mapping",
            "regulation",
            "map_obligations",
            Arc::new(|ctx| {
                json!({
                    "impact": ctx.output("security-impact-assessment").cloned().unwrap_or(json!({})),
                })
            }),
        )
        .depends_on(&["security-impact-assessment"]),
        StepDefinition::new(
            "risk-quantification",
            "risk",
            "quantify",
            Arc::new(|ctx| {
                json!({
                    "impact": ctx.output("security-impact-assessment").cloned().unwrap_or(json!({})),
                    "obligations": ctx.output("regulatory-mapping").cloned().unwrap_or(json!({})),
                })
            }),
        )
        .depends_on(&["regulatory-mapping"]),
        StepDefinition::new("decision-routing", "clearance", "route_decision", Arc::new(route_decision_input))
            .depends_on(&["risk-quantification"])
            .with_timeout(Duration::from_secs(30))
            .with_compensation(Arc::new(|ctx| {
                Envelope::new(
                    Source::Orchestrator,
                    "emergency.decision.required",
                    json!({
                        "workflow_id": ctx.workflow_id,
                        "urgency": "immediate",
                        "sla_minutes": 30,
                        "reason": "automated decision routing failed during breach response",
                    }),
                )
            })),
        StepDefinition::new(
            "value-report",
            "value",
            "report_outcome",
            Arc::new(|ctx| {
                json!({
                    "risk": ctx.output("risk-quantification").cloned().unwrap_or(json!({})),
                    "decision": ctx.output("decision-routing").cloned().unwrap_or(json!({})),
                })
            }),
        )
        .depends_on(&["decision-routing"]),
    ];
    WorkflowDefinition::new("breach_response", steps)
}

fn route_decision_input(ctx: &crate::context::WorkflowContext) -> serde_json::Value {
    let risk = ctx.output("risk-quantification").cloned().unwrap_or(json!({}));
    let critical = ctx
        .input
        .get("severity")
        .and_then(|v| v.as_str())
        .map(|s| s == "critical")
        .unwrap_or(false);
    if critical {
        json!({"risk": risk, "approval_level": "executive", "urgency": "immediate"})
    } else {
        json!({"risk": risk, "approval_level": "standard", "urgency": "medium"})
    }
}

/// Aggregates every compliance/security/risk/operational signal for an
/// entity into a single trust score, renders a presentation, and optionally
/// mints a time-bounded shareable link.
pub fn trust_score_generation() -> WorkflowDefinition {
    let steps = vec![
        StepDefinition::new("aggregate-compliance", "regulation", "aggregate", Arc::new(|ctx| ctx.input.clone())),
        StepDefinition::new("aggregate-security", "vulnerability", "aggregate", Arc::new(|ctx| ctx.input.clone())),
        StepDefinition::new("aggregate-risk", "risk", "aggregate", Arc::new(|ctx| ctx.input.clone())),
        StepDefinition::new("aggregate-operational", "monitoring", "aggregate", Arc::new(|ctx| ctx.input.clone())),
        StepDefinition::new(
            "compute-score",
            "trust_engine",
            "compute",
            Arc::new(|ctx| {
                json!({
                    "compliance": ctx.output("aggregate-compliance").cloned().unwrap_or(json!({})),
                    "security": ctx.output("aggregate-security").cloned().unwrap_or(json!({})),
                    "risk": ctx.output("aggregate-risk").cloned().unwrap_or(json!({})),
                    "operational": ctx.output("aggregate-operational").cloned().unwrap_or(json!({})),
                })
            }),
        )
        .depends_on(&["aggregate-compliance", "aggregate-security", "aggregate-risk", "aggregate-operational"]),
        StepDefinition::new(
            "render-presentation",
            "value",
            "render_scorecard",
            Arc::new(|ctx| {
                json!({"score": ctx.output("compute-score").cloned().unwrap_or(json!({}))})
            }),
        )
        .depends_on(&["compute-score"]),
        StepDefinition::new(
            "issue-shareable-url",
            "value",
            "issue_share_link",
            Arc::new(|ctx| {
                json!({"presentation": ctx.output("render-presentation").cloned().unwrap_or(json!({}))})
            }),
        )
        .depends_on(&["render-presentation"])
        .with_condition(Arc::new(|ctx| {
            ctx.input.get("scope").and_then(|s| s.get("shareable_url")).and_then(|v| v.as_bool()).unwrap_or(false)
        })),
    ];
    WorkflowDefinition::new("trust_score_generation", steps)
}
