//! Static DAG workflow orchestration on top of the event bus (spec.md §4.8).
//!
//! A [`step::WorkflowDefinition`] is pure data: steps, dependencies, and the
//! closures that bind each step's input from prior outputs. A
//! [`orchestrator::WorkflowOrchestrator`] drives execution by publishing
//! `workflow.step.requested` envelopes and awaiting the matching
//! `workflow.step.completed` envelope — the orchestrator has no privileged
//! path into the bus, it is a subscriber like any other component.

mod context;
mod definitions;
mod orchestrator;
mod record;
mod step;

pub use context::WorkflowContext;
pub use definitions::{breach_response, trust_score_generation};
pub use orchestrator::{StepHandler, StepOutcome, WorkflowError, WorkflowOrchestrator};
pub use record::{StepRecord, StepStatus, WorkflowRecord, WorkflowStatus};
pub use step::{StepDefinition, WorkflowDefinition};
