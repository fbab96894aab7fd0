// Publish a single envelope to the bus and report the outcome.

use anyhow::{Context, Result};
use fabric_bus::EventBus;
use fabric_types::Envelope;

use crate::output::{print_field, OutputFormat};
use crate::runtime::parse_source;

pub async fn run(bus: &EventBus, output: OutputFormat, source: &str, event_type: &str, data: &str) -> Result<()> {
    let source = parse_source(source)?;
    let data = serde_json::from_str(data).context("--data must be a JSON object")?;
    let envelope = Envelope::new(source, event_type, data);

    let outcome = bus.publish(envelope).await?;
    bus.flush().await;

    if output.is_text() {
        match &outcome {
            fabric_bus::PublishOutcome::Accepted { event_id } => print_field("accepted", event_id),
            fabric_bus::PublishOutcome::Duplicate { event_id } => print_field("duplicate", event_id),
        }
    } else {
        output.print_value(&outcome_json(&outcome));
    }
    Ok(())
}

fn outcome_json(outcome: &fabric_bus::PublishOutcome) -> serde_json::Value {
    match outcome {
        fabric_bus::PublishOutcome::Accepted { event_id } => serde_json::json!({"status": "accepted", "event_id": event_id}),
        fabric_bus::PublishOutcome::Duplicate { event_id } => serde_json::json!({"status": "duplicate", "event_id": event_id}),
    }
}
