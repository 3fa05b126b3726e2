//! Per-workflow metrics derived from stored executions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflow::{ExecutionStatus, WorkflowExecution};

/// Number of error signatures kept in [`WorkflowMetrics::top_errors`].
pub const TOP_ERROR_LIMIT: usize = 5;

/// A recurring error, grouped by step, type and message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorSignature {
    pub step_id: Option<String>,
    pub error_type: String,
    pub message: String,
    pub count: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Aggregate view of every stored run of one workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct WorkflowMetrics {
    pub workflow_id: String,
    pub total_executions: usize,
    pub status_counts: HashMap<ExecutionStatus, usize>,
    /// Over runs with both start and end stamped
    pub min_duration_ms: Option<i64>,
    pub avg_duration_ms: Option<f64>,
    pub max_duration_ms: Option<i64>,
    pub top_errors: Vec<ErrorSignature>,
    pub last_run: Option<DateTime<Utc>>,
}

impl WorkflowMetrics {
    pub fn count(&self, status: ExecutionStatus) -> usize {
        self.status_counts.get(&status).copied().unwrap_or(0)
    }

    /// Completed runs over terminal runs, if any run has finished.
    pub fn success_rate(&self) -> Option<f64> {
        let finished: usize = [
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ]
        .iter()
        .map(|s| self.count(*s))
        .sum();

        if finished == 0 {
            return None;
        }
        Some(self.count(ExecutionStatus::Completed) as f64 / finished as f64)
    }
}

/// Aggregates `executions` of `workflow_id` into metrics.
pub fn compute_metrics(workflow_id: &str, executions: &[WorkflowExecution]) -> WorkflowMetrics {
    let mut metrics = WorkflowMetrics {
        workflow_id: workflow_id.to_string(),
        total_executions: executions.len(),
        ..WorkflowMetrics::default()
    };

    let mut durations = Vec::new();
    let mut signatures: HashMap<(Option<String>, String, String), ErrorSignature> = HashMap::new();

    for execution in executions {
        *metrics.status_counts.entry(execution.status).or_insert(0) += 1;

        if let Some(duration) = execution.duration_ms() {
            durations.push(duration);
        }

        if let Some(start) = execution.start_time {
            metrics.last_run = Some(metrics.last_run.map_or(start, |last| last.max(start)));
        }

        for error in &execution.errors {
            let key = (
                error.step_id.clone(),
                error.error_type.clone(),
                error.message.clone(),
            );
            signatures
                .entry(key)
                .and_modify(|sig| {
                    sig.count += 1;
                    sig.first_seen = sig.first_seen.min(error.timestamp);
                    sig.last_seen = sig.last_seen.max(error.timestamp);
                })
                .or_insert_with(|| ErrorSignature {
                    step_id: error.step_id.clone(),
                    error_type: error.error_type.clone(),
                    message: error.message.clone(),
                    count: 1,
                    first_seen: error.timestamp,
                    last_seen: error.timestamp,
                });
        }
    }

    if !durations.is_empty() {
        metrics.min_duration_ms = durations.iter().min().copied();
        metrics.max_duration_ms = durations.iter().max().copied();
        metrics.avg_duration_ms =
            Some(durations.iter().sum::<i64>() as f64 / durations.len() as f64);
    }

    let mut top: Vec<ErrorSignature> = signatures.into_values().collect();
    top.sort_by(|a, b| b.count.cmp(&a.count).then(b.last_seen.cmp(&a.last_seen)));
    top.truncate(TOP_ERROR_LIMIT);
    metrics.top_errors = top;

    metrics
}
