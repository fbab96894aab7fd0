//! Workflow execution engine (spec.md §4.8). Each step is dispatched as a
//! `workflow.step.requested` envelope and resolved by awaiting the matching
//! `workflow.step.completed` envelope, correlated by `workflow_id` +
//! `step_id` — the orchestrator is itself a bus subscriber, not a special
//! case bypassing it.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use fabric_bus::{EventBus, Pattern};
use fabric_resilience::{ResilienceError, ResilienceRegistry};
use fabric_types::{json, Envelope, Source, Value};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::context::WorkflowContext;
use crate::record::{StepRecord, StepStatus, WorkflowRecord, WorkflowStatus};
use crate::step::WorkflowDefinition;

pub type StepOutcome = Result<Value, String>;
pub type StepHandler = Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = StepOutcome> + Send>> + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("no handler registered for {component}.{action}")]
    NoHandler { component: String, action: String },
    #[error("step {step_id} failed: {message}")]
    StepFailed { step_id: String, message: String },
    #[error("step {step_id} timed out")]
    StepTimedOut { step_id: String },
}

/// Drives workflows defined as [`WorkflowDefinition`]s. Construct one per
/// bus; it registers two bus subscriptions on creation and lives for the
/// life of the process.
pub struct WorkflowOrchestrator {
    bus: Arc<EventBus>,
    step_handlers: Arc<DashMap<(String, String), StepHandler>>,
    pending: Arc<DashMap<(String, String), oneshot::Sender<StepOutcome>>>,
}

impl WorkflowOrchestrator {
    pub fn new(bus: Arc<EventBus>, registry: Arc<ResilienceRegistry>) -> Self {
        let step_handlers: Arc<DashMap<(String, String), StepHandler>> = Arc::new(DashMap::new());
        let pending: Arc<DashMap<(String, String), oneshot::Sender<StepOutcome>>> = Arc::new(DashMap::new());

        {
            let step_handlers = step_handlers.clone();
            let registry = registry.clone();
            let bus_for_closure = bus.clone();
            bus.subscribe(
                Pattern::Exact {
                    source: Source::Orchestrator,
                    event_type: "workflow.step.requested".to_string(),
                },
                Arc::new(move |envelope: Envelope| {
                    let step_handlers = step_handlers.clone();
                    let registry = registry.clone();
                    let bus = bus_for_closure.clone();
                    Box::pin(async move { dispatch_step_request(envelope, step_handlers, registry, bus).await })
                }),
            );
        }

        {
            let pending = pending.clone();
            bus.subscribe(
                Pattern::Exact {
                    source: Source::Orchestrator,
                    event_type: "workflow.step.completed".to_string(),
                },
                Arc::new(move |envelope: Envelope| {
                    let pending = pending.clone();
                    Box::pin(async move { resolve_pending_step(envelope, pending).await })
                }),
            );
        }

        WorkflowOrchestrator { bus, step_handlers, pending }
    }

    /// Registers the handler standing in for `component`'s `action`
    /// implementation — invoked, through the resilience registry, whenever
    /// a step names this `(component, action)` pair.
    pub fn register_step_handler(&self, component: impl Into<String>, action: impl Into<String>, handler: StepHandler) {
        self.step_handlers.insert((component.into(), action.into()), handler);
    }

    #[instrument(skip(self, definition, input), fields(kind = %definition.kind))]
    pub async fn execute(&self, definition: &WorkflowDefinition, input: Value) -> WorkflowRecord {
        let workflow_id = Uuid::now_v7().to_string();
        let started_at = chrono::Utc::now();
        info!(workflow_id = %workflow_id, "starting workflow");

        let _ = self
            .bus
            .publish(Envelope::new(
                Source::Orchestrator,
                "workflow.started",
                json!({"workflow_id": workflow_id, "kind": definition.kind, "context": input}),
            ))
            .await;

        let mut ctx = WorkflowContext::new(workflow_id.clone(), input);
        let mut records: HashMap<String, StepRecord> = HashMap::new();
        let mut completed: HashSet<String> = HashSet::new();
        let mut skipped: HashSet<String> = HashSet::new();
        let mut failure: Option<(String, String)> = None;
        let mut compensated = false;

        'outer: loop {
            let ready: Vec<&crate::step::StepDefinition> = definition
                .steps
                .iter()
                .filter(|s| !completed.contains(&s.id) && !skipped.contains(&s.id))
                .filter(|s| s.depends_on.iter().all(|d| completed.contains(d) || skipped.contains(d)))
                .collect();
            if ready.is_empty() {
                break;
            }

            let mut futures = Vec::new();
            let mut ready_ids = Vec::new();
            for step in &ready {
                if let Some(condition) = &step.condition {
                    if !condition(&ctx) {
                        skipped.insert(step.id.clone());
                        continue;
                    }
                }
                ready_ids.push(step.id.clone());
                futures.push(self.run_step(&workflow_id, step, &ctx));
            }
            if ready_ids.is_empty() {
                continue;
            }

            let outcomes = futures::future::join_all(futures).await;
            for (step_id, outcome) in ready_ids.into_iter().zip(outcomes) {
                let step = definition.step(&step_id).expect("ready step exists in definition");
                match outcome {
                    Ok(output) => {
                        ctx.record_output(step_id.clone(), output.clone());
                        records.insert(
                            step_id.clone(),
                            StepRecord {
                                status: StepStatus::Completed,
                                output: Some(output),
                                error: None,
                                started_at: Some(started_at),
                                finished_at: Some(chrono::Utc::now()),
                            },
                        );
                        completed.insert(step_id);
                    }
                    Err(message) => {
                        let detail = WorkflowError::StepFailed { step_id: step_id.clone(), message: message.clone() }.to_string();
                        records.insert(
                            step_id.clone(),
                            StepRecord {
                                status: StepStatus::Failed,
                                output: None,
                                error: Some(detail.clone()),
                                started_at: Some(started_at),
                                finished_at: Some(chrono::Utc::now()),
                            },
                        );
                        if let Some(compensation) = &step.compensation {
                            let envelope = compensation(&ctx);
                            compensated = self.bus.publish(envelope).await.is_ok();
                        }
                        failure = Some((step_id, detail));
                        break 'outer;
                    }
                }
            }
        }

        let finished_at = chrono::Utc::now();
        let (status, result) = match failure {
            // W1: compensated only if the failing step's compensation
            // envelope itself published successfully — a compensation that
            // fails schema validation (or any other publish error) leaves
            // the workflow Failed, not Compensated.
            Some(_) => (if compensated { WorkflowStatus::Compensated } else { WorkflowStatus::Failed }, None),
            None => {
                let aggregated: serde_json::Map<String, Value> = ctx.outputs.clone().into_iter().collect();
                (WorkflowStatus::Completed, Some(Value::Object(aggregated)))
            }
        };

        let closing = match status {
            WorkflowStatus::Completed => Envelope::new(
                Source::Orchestrator,
                "workflow.completed",
                json!({"workflow_id": workflow_id, "result": result.clone().unwrap_or(json!({}))}),
            ),
            WorkflowStatus::Compensated => Envelope::new(
                Source::Orchestrator,
                "workflow.compensated",
                json!({"workflow_id": workflow_id}),
            ),
            WorkflowStatus::Failed | WorkflowStatus::Running => Envelope::new(
                Source::Orchestrator,
                "workflow.failed",
                json!({"workflow_id": workflow_id, "error": failure.as_ref().map(|(_, m)| m.clone()).unwrap_or_default()}),
            ),
        };
        let _ = self.bus.publish(closing).await;

        WorkflowRecord {
            workflow_id,
            kind: definition.kind.clone(),
            status,
            started_at,
            finished_at: Some(finished_at),
            steps: records,
            result,
        }
    }

    async fn run_step(&self, workflow_id: &str, step: &crate::step::StepDefinition, ctx: &WorkflowContext) -> StepOutcome {
        let input = (step.bind)(ctx);
        let (sender, receiver) = oneshot::channel();
        self.pending.insert((workflow_id.to_string(), step.id.clone()), sender);

        let request = Envelope::new(
            Source::Orchestrator,
            "workflow.step.requested",
            json!({
                "workflow_id": workflow_id,
                "step_id": step.id,
                "component": step.component,
                "action": step.action,
                "input": input,
            }),
        );
        if self.bus.publish(request).await.is_err() {
            self.pending.remove(&(workflow_id.to_string(), step.id.clone()));
            return Err("failed to publish workflow.step.requested".to_string());
        }

        match tokio::time::timeout(step.timeout, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err("step completion channel dropped".to_string()),
            Err(_) => {
                self.pending.remove(&(workflow_id.to_string(), step.id.clone()));
                warn!(workflow_id, step_id = %step.id, "step timed out");
                Err(WorkflowError::StepTimedOut { step_id: step.id.clone() }.to_string())
            }
        }
    }
}

async fn dispatch_step_request(
    envelope: Envelope,
    step_handlers: Arc<DashMap<(String, String), StepHandler>>,
    registry: Arc<ResilienceRegistry>,
    bus: Arc<EventBus>,
) -> fabric_bus::DeliveryResult {
    let workflow_id = envelope.data["workflow_id"].as_str().unwrap_or_default().to_string();
    let step_id = envelope.data["step_id"].as_str().unwrap_or_default().to_string();
    let component = envelope.data["component"].as_str().unwrap_or_default().to_string();
    let action = envelope.data["action"].as_str().unwrap_or_default().to_string();
    let input = envelope.data["input"].clone();

    let handler = step_handlers.get(&(component.clone(), action.clone())).map(|h| h.clone());
    let (output, error) = match handler {
        Some(handler) => {
            let component_for_call = component.clone();
            let action_for_call = action.clone();
            let result = registry
                .call(&component, &action, &input, false, || {
                    let handler = handler.clone();
                    let input = input.clone();
                    let component = component_for_call.clone();
                    let action = action_for_call.clone();
                    async move {
                        handler(input).await.map_err(|message| ResilienceError::Transient {
                            target: component,
                            action,
                            message,
                        })
                    }
                })
                .await;
            match result {
                Ok(value) => (Some(value), None),
                Err(err) => (None, Some(err.to_string())),
            }
        }
        None => (
            None,
            Some(WorkflowError::NoHandler { component: component.clone(), action: action.clone() }.to_string()),
        ),
    };

    let mut payload = serde_json::Map::new();
    payload.insert("workflow_id".to_string(), json!(workflow_id));
    payload.insert("step_id".to_string(), json!(step_id));
    if let Some(output) = output {
        payload.insert("output".to_string(), output);
    }
    if let Some(error) = error {
        payload.insert("error".to_string(), json!(error));
    }
    let completed = Envelope::new(Source::Orchestrator, "workflow.step.completed", Value::Object(payload));
    let _ = bus.publish(completed).await;
    Ok(())
}

async fn resolve_pending_step(
    envelope: Envelope,
    pending: Arc<DashMap<(String, String), oneshot::Sender<StepOutcome>>>,
) -> fabric_bus::DeliveryResult {
    let workflow_id = envelope.data["workflow_id"].as_str().unwrap_or_default().to_string();
    let step_id = envelope.data["step_id"].as_str().unwrap_or_default().to_string();
    if let Some((_, sender)) = pending.remove(&(workflow_id, step_id)) {
        let error = envelope.data.get("error").and_then(|v| v.as_str()).map(String::from);
        let output = envelope.data.get("output").cloned().unwrap_or(json!({}));
        let _ = sender.send(if let Some(message) = error { Err(message) } else { Ok(output) });
    }
    Ok(())
}
