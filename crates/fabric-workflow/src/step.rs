//! Static step declarations (spec.md §4.8). A step is pure data plus two
//! pure closures (`bind`, and the optional `compensation` envelope
//! builder) — the actual work happens out-of-process, reached through
//! [`crate::orchestrator::WorkflowOrchestrator`]'s step-handler registry.

use std::sync::Arc;

use fabric_types::Envelope;
use serde_json::Value;

use crate::context::WorkflowContext;

pub type BindFn = Arc<dyn Fn(&WorkflowContext) -> Value + Send + Sync>;
pub type ConditionFn = Arc<dyn Fn(&WorkflowContext) -> bool + Send + Sync>;
pub type CompensationFn = Arc<dyn Fn(&WorkflowContext) -> Envelope + Send + Sync>;

pub struct StepDefinition {
    pub id: String,
    pub component: String,
    pub action: String,
    pub depends_on: Vec<String>,
    pub bind: BindFn,
    pub timeout: std::time::Duration,
    /// Skip this step unless `condition` is absent or returns true (used by
    /// the shareable-URL step, gated on `context.scope.shareable_url`).
    pub condition: Option<ConditionFn>,
    /// Pure builder for a notification envelope published (not awaited) if
    /// this step fails.
    pub compensation: Option<CompensationFn>,
}

impl StepDefinition {
    pub fn new(
        id: impl Into<String>,
        component: impl Into<String>,
        action: impl Into<String>,
        bind: BindFn,
    ) -> Self {
        StepDefinition {
            id: id.into(),
            component: component.into(),
            action: action.into(),
            depends_on: Vec::new(),
            bind,
            timeout: std::time::Duration::from_secs(10),
            condition: None,
            compensation: None,
        }
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.depends_on = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_condition(mut self, condition: ConditionFn) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_compensation(mut self, compensation: CompensationFn) -> Self {
        self.compensation = Some(compensation);
        self
    }
}

/// A static named workflow: an ordered list of steps forming a DAG via
/// `depends_on`.
pub struct WorkflowDefinition {
    pub kind: String,
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn new(kind: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        WorkflowDefinition { kind: kind.into(), steps }
    }

    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }
}
