//! Execution State
//!
//! The execution record is the recovery unit of a run: one
//! [`WorkflowExecution`] per run holding one [`StepExecution`] per defined
//! step. It is checkpointed through the repository after every transition,
//! so reloading it lets scheduling resume from the persisted step statuses.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::context::StepOutput;
use super::model::WorkflowDefinition;

/// Overall status of a workflow execution.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    NotStarted,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Returns true once no further transitions are expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub const ALL: [ExecutionStatus; 6] = [
        Self::NotStarted,
        Self::Running,
        Self::Paused,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Status of a single step within an execution.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    NotStarted,
    Running,
    Completed,
    Skipped,
    Failed,
}

impl StepStatus {
    /// Completed and Skipped both unblock dependents.
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Step id to current status, the scheduler's view of a run.
pub type StatusMap = HashMap<String, StepStatus>;

/// How a run was started.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[default]
    Manual,
    Scheduled,
    Event,
    Api,
}

/// An append-only error record, attached to a step, the run, or both.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowExecutionError {
    pub id: Uuid,

    /// None for workflow-level errors
    pub step_id: Option<String>,

    pub error_type: String,

    pub message: String,

    /// Formatted `source()` chain of the originating error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl WorkflowExecutionError {
    pub fn new(
        step_id: Option<&str>,
        error_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            step_id: step_id.map(str::to_string),
            error_type: error_type.into(),
            message: message.into(),
            stack_trace: None,
            timestamp: Utc::now(),
        }
    }

    /// Builds a record from an error, keeping its cause chain as the trace.
    pub fn from_error(
        step_id: Option<&str>,
        error_type: impl Into<String>,
        error: &(dyn Error + 'static),
    ) -> Self {
        let mut record = Self::new(step_id, error_type, error.to_string());

        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(format!("caused by: {}", cause));
            source = cause.source();
        }
        if !causes.is_empty() {
            record.stack_trace = Some(causes.join("\n"));
        }

        record
    }
}

/// Per-step execution record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepExecution {
    pub id: Uuid,

    pub step_id: String,

    pub status: StepStatus,

    pub start_time: Option<DateTime<Utc>>,

    pub end_time: Option<DateTime<Utc>>,

    /// Dependency id to that dependency's output
    #[serde(default)]
    pub input: HashMap<String, StepOutput>,

    #[serde(default)]
    pub output: Option<StepOutput>,

    /// Retries consumed so far
    #[serde(default)]
    pub retry_count: u32,

    #[serde(default)]
    pub errors: Vec<WorkflowExecutionError>,
}

impl StepExecution {
    /// Creates a fresh record at NotStarted.
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            step_id: step_id.into(),
            status: StepStatus::NotStarted,
            start_time: None,
            end_time: None,
            input: HashMap::new(),
            output: None,
            retry_count: 0,
            errors: Vec::new(),
        }
    }

    /// Wall-clock duration in milliseconds, once both ends are stamped.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// The persisted record of one workflow run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowExecution {
    pub id: Uuid,

    pub workflow_id: String,

    /// Definition version this run was started from
    #[serde(default)]
    pub workflow_version: String,

    pub status: ExecutionStatus,

    pub start_time: Option<DateTime<Utc>>,

    pub end_time: Option<DateTime<Utc>>,

    /// One record per defined step, in definition order
    pub step_executions: Vec<StepExecution>,

    /// Every error raised during the run, step-level ones included
    #[serde(default)]
    pub errors: Vec<WorkflowExecutionError>,

    #[serde(default)]
    pub trigger_type: TriggerType,

    /// Run parameters, kept so a resumed run sees the same values
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, Value>,
}

impl WorkflowExecution {
    /// Creates a run for `definition` with every step at NotStarted.
    pub fn new(definition: &WorkflowDefinition, trigger_type: TriggerType) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: definition.id.clone(),
            workflow_version: definition.version.clone(),
            status: ExecutionStatus::NotStarted,
            start_time: None,
            end_time: None,
            step_executions: definition
                .steps
                .iter()
                .map(|step| StepExecution::new(step.id.clone()))
                .collect(),
            errors: Vec::new(),
            trigger_type,
            parameters: HashMap::new(),
        }
    }

    pub fn step_execution(&self, step_id: &str) -> Option<&StepExecution> {
        self.step_executions.iter().find(|s| s.step_id == step_id)
    }

    pub fn step_execution_mut(&mut self, step_id: &str) -> Option<&mut StepExecution> {
        self.step_executions.iter_mut().find(|s| s.step_id == step_id)
    }

    /// Builds the scheduler's status map from the step records.
    pub fn status_map(&self) -> StatusMap {
        self.step_executions
            .iter()
            .map(|s| (s.step_id.clone(), s.status))
            .collect()
    }

    /// Number of steps currently in `status`.
    pub fn count_steps(&self, status: StepStatus) -> usize {
        self.step_executions
            .iter()
            .filter(|s| s.status == status)
            .count()
    }

    /// Returns true when every step is Completed or Skipped.
    pub fn all_steps_settled(&self) -> bool {
        self.step_executions
            .iter()
            .all(|s| s.status.satisfies_dependents())
    }

    /// Errors recorded against a given step.
    pub fn errors_for_step<'a>(
        &'a self,
        step_id: &'a str,
    ) -> impl Iterator<Item = &'a WorkflowExecutionError> + 'a {
        self.errors
            .iter()
            .filter(move |e| e.step_id.as_deref() == Some(step_id))
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}
