// Run one of the two canonical workflows to completion and report the
// resulting execution record.

use anyhow::{Context, Result};
use clap::Subcommand;
use fabric_workflow::{breach_response, trust_score_generation, StepStatus, WorkflowOrchestrator, WorkflowStatus};
use serde_json::json;

use crate::output::{print_field, OutputFormat};

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Run the breach-response workflow
    BreachResponse {
        /// JSON input, e.g. '{"severity": "critical"}'
        #[arg(long, default_value = "{}")]
        input: String,
    },
    /// Run the trust-score-generation workflow
    TrustScore {
        /// JSON input, e.g. '{"entity_id": "org-1", "scope": {"shareable_url": true}}'
        #[arg(long, default_value = "{}")]
        input: String,
    },
}

pub async fn run(command: WorkflowCommand, orchestrator: &WorkflowOrchestrator, output: OutputFormat) -> Result<()> {
    let (definition, input) = match command {
        WorkflowCommand::BreachResponse { input } => {
            (breach_response(), serde_json::from_str(&input).context("--input must be a JSON object")?)
        }
        WorkflowCommand::TrustScore { input } => {
            (trust_score_generation(), serde_json::from_str(&input).context("--input must be a JSON object")?)
        }
    };

    let record = orchestrator.execute(&definition, input).await;

    if output.is_text() {
        print_field("workflow_id", &record.workflow_id);
        print_field("kind", &record.kind);
        print_field("status", &format!("{:?}", record.status));
        for (step_id, step) in &record.steps {
            println!("  {step_id:<28} {:?}", step.status);
        }
        print_field("consistent", &record.is_consistent().to_string());
    } else {
        output.print_value(&json!({
            "workflow_id": record.workflow_id,
            "kind": record.kind,
            "status": format!("{:?}", record.status),
            "steps": record.steps.iter().map(|(id, s)| (id.clone(), format!("{:?}", s.status))).collect::<std::collections::BTreeMap<_, _>>(),
            "result": record.result,
            "consistent": record.is_consistent(),
        }));
    }

    if record.status != WorkflowStatus::Completed && record.steps.values().any(|s| s.status == StepStatus::Failed) {
        anyhow::bail!("workflow did not complete successfully");
    }
    Ok(())
}
