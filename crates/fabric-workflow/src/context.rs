//! Binding context threaded through a workflow execution: the caller's
//! input plus every completed step's output so far (spec.md §4.8,
//! "input-binding expression referencing context and prior step outputs").

use std::collections::HashMap;

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct WorkflowContext {
    pub workflow_id: String,
    pub input: Value,
    pub outputs: HashMap<String, Value>,
}

impl WorkflowContext {
    pub fn new(workflow_id: impl Into<String>, input: Value) -> Self {
        WorkflowContext {
            workflow_id: workflow_id.into(),
            input,
            outputs: HashMap::new(),
        }
    }

    pub fn output(&self, step_id: &str) -> Option<&Value> {
        self.outputs.get(step_id)
    }

    pub fn record_output(&mut self, step_id: impl Into<String>, output: Value) {
        self.outputs.insert(step_id.into(), output);
    }
}
