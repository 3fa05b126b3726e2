//! Run Notifications
//!
//! Sent when a run reaches a terminal state and notifications are enabled.

use log::{info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::workflow::{ExecutionStatus, StepStatus, WorkflowDefinition, WorkflowExecution};

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// What a notifier is handed for a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    pub summary: String,
}

impl Notification {
    pub fn for_execution(definition: &WorkflowDefinition, execution: &WorkflowExecution) -> Self {
        Self {
            execution_id: execution.id,
            workflow_id: execution.workflow_id.clone(),
            workflow_name: definition.display_name().to_string(),
            status: execution.status,
            summary: Self::summary(definition, execution),
        }
    }

    /// Human-readable one-line summary of a run.
    pub fn summary(definition: &WorkflowDefinition, execution: &WorkflowExecution) -> String {
        let mut text = format!(
            "Workflow '{}' {}: {}/{} steps completed",
            definition.display_name(),
            execution.status,
            execution.count_steps(StepStatus::Completed),
            execution.step_executions.len()
        );

        let skipped = execution.count_steps(StepStatus::Skipped);
        if skipped > 0 {
            text.push_str(&format!(", {} skipped", skipped));
        }
        let failed = execution.count_steps(StepStatus::Failed);
        if failed > 0 {
            text.push_str(&format!(", {} failed", failed));
        }

        if let Some(duration) = execution.duration_ms() {
            text.push_str(&format!(" in {} ms", duration));
        }

        if let Some(error) = execution.errors.last() {
            text.push_str(&format!(". Last error: {}", error.message));
        }

        text
    }
}

/// Delivers notifications for finished runs.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Notifier that writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotificationError> {
        match notification.status {
            ExecutionStatus::Completed => info!("[{}] {}", notification.execution_id, notification.summary),
            _ => warn!("[{}] {}", notification.execution_id, notification.summary),
        }
        Ok(())
    }
}
