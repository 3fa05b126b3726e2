//! Workflow Context
//!
//! Per-execution state handed to every processor: run parameters, the
//! outputs accumulated so far keyed by step id, free-form variables, an
//! optional source reference, and the run's control handle.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::execution::control::ExecutionControl;

/// A single tabular record flowing between steps.
pub type Record = Map<String, Value>;

/// Outcome of a validation step. Invalid data is reported, not raised.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(default)]
    pub records_checked: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Output produced by a step.
///
/// Downstream processors match on the variant instead of guessing the shape
/// of an untyped value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StepOutput {
    /// The step produced nothing worth passing on
    Empty,
    /// Rows extracted, transformed or enriched
    Records(Vec<Record>),
    /// Any other structured result
    Value(Value),
    Validation(ValidationReport),
    /// Name of the branch a branch step selected
    Branch { selected: String },
}

impl StepOutput {
    /// Returns the records carried by this output, if any.
    pub fn records(&self) -> Option<&[Record]> {
        match self {
            StepOutput::Records(records) => Some(records),
            _ => None,
        }
    }

    /// Number of records carried, zero for non-record outputs.
    pub fn record_count(&self) -> usize {
        self.records().map_or(0, <[Record]>::len)
    }
}

/// State shared by all steps of one execution.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    execution_id: Uuid,

    /// Definition parameters overridden by run parameters
    pub parameters: HashMap<String, Value>,

    /// Output of every step that has completed, keyed by step id
    pub step_outputs: HashMap<String, StepOutput>,

    /// Free-form values processors may read and write
    pub variables: HashMap<String, Value>,

    /// Reference to the data source that triggered the run
    pub source: Option<String>,

    control: ExecutionControl,
}

impl WorkflowContext {
    /// Creates an empty context with a fresh control handle.
    pub fn new(execution_id: Uuid) -> Self {
        Self {
            execution_id,
            parameters: HashMap::new(),
            step_outputs: HashMap::new(),
            variables: HashMap::new(),
            source: None,
            control: ExecutionControl::new(),
        }
    }

    /// Replaces the control handle, e.g. with one the caller already holds.
    pub fn with_control(mut self, control: ExecutionControl) -> Self {
        self.control = control;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Pause/resume/cancel handle for this run.
    pub fn control(&self) -> &ExecutionControl {
        &self.control
    }

    /// Shorthand for `control().is_cancelled()`, for processors that poll.
    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn output(&self, step_id: &str) -> Option<&StepOutput> {
        self.step_outputs.get(step_id)
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: i64) -> Record {
        let mut row = Record::new();
        row.insert("id".to_string(), json!(id));
        row
    }

    #[test]
    fn test_record_accessors() {
        let output = StepOutput::Records(vec![record(1), record(2)]);
        assert_eq!(output.record_count(), 2);
        assert!(StepOutput::Empty.records().is_none());
        assert_eq!(StepOutput::Value(json!(3)).record_count(), 0);
    }

    #[test]
    fn test_output_serialization_is_tagged() {
        let output = StepOutput::Branch {
            selected: "eu".to_string(),
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json, json!({"kind": "branch", "data": {"selected": "eu"}}));

        let empty = serde_json::to_value(&StepOutput::Empty).unwrap();
        assert_eq!(empty, json!({"kind": "empty"}));
    }

    #[test]
    fn test_context_cancellation_follows_control() {
        let control = ExecutionControl::new();
        let context = WorkflowContext::new(Uuid::new_v4()).with_control(control.clone());

        assert!(!context.is_cancelled());
        control.cancel();
        assert!(context.is_cancelled());
    }

    #[test]
    fn test_context_lookups() {
        let mut context = WorkflowContext::new(Uuid::new_v4()).with_source("s3://bucket/orders");
        context.parameters.insert("region".to_string(), json!("eu"));
        context
            .step_outputs
            .insert("extract".to_string(), StepOutput::Empty);
        context.set_variable("rows", json!(10));

        assert_eq!(context.parameter("region"), Some(&json!("eu")));
        assert_eq!(context.output("extract"), Some(&StepOutput::Empty));
        assert_eq!(context.variables.get("rows"), Some(&json!(10)));
        assert_eq!(context.source.as_deref(), Some("s3://bucket/orders"));
    }
}
