// Seeds a short end-to-end scenario: a critical vulnerability publish
// (synchronous fast path), a trust-points-earned publish (ledger update),
// and a full breach-response workflow run. Prints a summary of each step.

use anyhow::Result;
use fabric_types::{json, Envelope, Source};

use crate::output::print_field;
use crate::runtime::Runtime;

pub async fn run(runtime: &Runtime) -> Result<()> {
    println!("== publishing a critical vulnerability ==");
    let vulnerability = Envelope::new(
        Source::Vulnerability,
        "vulnerability.discovered",
        json!({"vulnerability_id": "CVE-2026-0001", "severity": "critical", "cvss_score": 9.8}),
    );
    let outcome = runtime.bus.publish(vulnerability).await?;
    print_field("publish", &format!("{outcome:?}"));
    let evidence_event_id = match &outcome {
        fabric_bus::PublishOutcome::Accepted { event_id } | fabric_bus::PublishOutcome::Duplicate { event_id } => {
            event_id.clone()
        }
    };

    println!("\n== awarding trust points ==");
    let earned = Envelope::new(
        Source::Vulnerability,
        "trust.points.earned",
        json!({
            "entity_id": "acme-corp",
            "entity_type": "organization",
            "category": "security",
            "delta": 40,
            "evidence_event_id": evidence_event_id,
        }),
    );
    runtime.bus.publish(earned).await?;
    runtime.bus.flush().await;
    let balance = runtime.ledger.get_balance("acme-corp");
    print_field("acme-corp total", &balance.total.to_string());
    print_field("acme-corp tier", &balance.tier.to_string());

    println!("\n== running breach-response workflow ==");
    let record = runtime
        .orchestrator
        .execute(&fabric_workflow::breach_response(), json!({"severity": "critical"}))
        .await;
    print_field("workflow_id", &record.workflow_id);
    print_field("status", &format!("{:?}", record.status));
    for (step_id, step) in &record.steps {
        println!("  {step_id:<28} {:?}", step.status);
    }

    let metrics = runtime.bus.metrics();
    println!("\n== bus metrics ==");
    print_field("published", &metrics.published.to_string());
    print_field("handled", &metrics.handled.to_string());

    Ok(())
}
