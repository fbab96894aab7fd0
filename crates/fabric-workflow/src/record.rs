//! Execution record: what actually happened during one `execute` call
//! (spec.md §4.8, invariants W1-W2).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    Compensated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct StepRecord {
    pub status: StepStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    pub fn pending() -> Self {
        StepRecord {
            status: StepStatus::Pending,
            output: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowRecord {
    pub workflow_id: String,
    pub kind: String,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: HashMap<String, StepRecord>,
    /// Present once `status` is `Completed`: every completed step's output
    /// keyed by step id.
    pub result: Option<Value>,
}

impl WorkflowRecord {
    /// Invariant W1: completed iff every non-skipped step completed; failed
    /// iff at least one step failed and no compensation path completed.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            WorkflowStatus::Completed => self.steps.values().all(|s| s.status == StepStatus::Completed),
            WorkflowStatus::Failed | WorkflowStatus::Compensated => {
                self.steps.values().any(|s| s.status == StepStatus::Failed)
            }
            WorkflowStatus::Running => true,
        }
    }
}
