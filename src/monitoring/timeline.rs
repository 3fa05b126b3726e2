//! Execution Timeline
//!
//! Records every state transition of a run, for reports, Gantt charts and
//! per-workflow metrics.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::WorkflowMonitor;
use crate::storage::metrics::compute_metrics;
use crate::storage::{WorkflowMetrics, WorkflowRepository};
use crate::workflow::WorkflowExecution;

/// Type of timeline event.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkflowStarted,
    WorkflowPaused,
    WorkflowResumed,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCancelled,
    StepStarted,
    StepCompleted,
    StepFailed,
    StepSkipped,
    StepRetry,
    /// A fallback step was reset so the scheduler runs it again
    StepRequeued,
    ErrorOccurred,
}

impl EventType {
    /// Events that close a step's time span.
    fn ends_step(self) -> bool {
        matches!(
            self,
            EventType::StepCompleted | EventType::StepFailed | EventType::StepSkipped
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::WorkflowStarted => "workflow_started",
            EventType::WorkflowPaused => "workflow_paused",
            EventType::WorkflowResumed => "workflow_resumed",
            EventType::WorkflowCompleted => "workflow_completed",
            EventType::WorkflowFailed => "workflow_failed",
            EventType::WorkflowCancelled => "workflow_cancelled",
            EventType::StepStarted => "step_started",
            EventType::StepCompleted => "step_completed",
            EventType::StepFailed => "step_failed",
            EventType::StepSkipped => "step_skipped",
            EventType::StepRetry => "step_retry",
            EventType::StepRequeued => "step_requeued",
            EventType::ErrorOccurred => "error_occurred",
        };
        f.write_str(name)
    }
}

/// A single event in the execution timeline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TimelineEvent {
    pub execution_id: Uuid,
    /// None for workflow-level events
    pub step_id: Option<String>,
    pub event_type: EventType,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Executions kept by a monitor unless configured otherwise.
pub const DEFAULT_RETAINED_EXECUTIONS: usize = 100;

#[derive(Debug, Default)]
struct TimelineState {
    events: HashMap<Uuid, Vec<TimelineEvent>>,
    /// Executions in the order they were first seen, oldest first
    order: VecDeque<Uuid>,
    /// Latest snapshot of each run, used when no repository is attached
    runs: HashMap<Uuid, WorkflowExecution>,
    metrics: HashMap<String, WorkflowMetrics>,
}

/// In-memory [`WorkflowMonitor`].
///
/// Keeps the events of the most recent executions it sees, up to its
/// retention limit; older executions are evicted whole. When a repository
/// is attached, `update_metrics` pulls the workflow's metrics from it;
/// otherwise they are computed from the retained runs.
pub struct TimelineMonitor {
    state: Mutex<TimelineState>,
    repository: Option<Arc<dyn WorkflowRepository>>,
    retention: usize,
}

impl Default for TimelineMonitor {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            repository: None,
            retention: DEFAULT_RETAINED_EXECUTIONS,
        }
    }
}

impl TimelineMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repository(repository: Arc<dyn WorkflowRepository>) -> Self {
        Self {
            repository: Some(repository),
            ..Self::default()
        }
    }

    /// Sets how many executions are kept; zero is treated as one.
    pub fn with_retention(mut self, executions: usize) -> Self {
        self.retention = executions.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, TimelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns all recorded events of an execution, oldest first.
    pub fn events(&self, execution_id: Uuid) -> Vec<TimelineEvent> {
        self.state()
            .events
            .get(&execution_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the event types recorded for one step, in order.
    pub fn step_events(&self, execution_id: Uuid, step_id: &str) -> Vec<EventType> {
        self.events(execution_id)
            .into_iter()
            .filter(|e| e.step_id.as_deref() == Some(step_id))
            .map(|e| e.event_type)
            .collect()
    }

    pub fn count(&self, execution_id: Uuid, event_type: EventType) -> usize {
        self.state()
            .events
            .get(&execution_id)
            .map_or(0, |events| {
                events.iter().filter(|e| e.event_type == event_type).count()
            })
    }

    /// Latest metrics snapshot for a workflow.
    pub fn metrics(&self, workflow_id: &str) -> Option<WorkflowMetrics> {
        self.state().metrics.get(workflow_id).cloned()
    }

    /// Returns step durations in milliseconds, measured from the last start
    /// of each step to the event that ended it.
    pub fn durations(&self, execution_id: Uuid) -> HashMap<String, i64> {
        step_spans(&self.events(execution_id))
            .into_iter()
            .map(|(step_id, (start, end))| (step_id, (end - start).num_milliseconds()))
            .collect()
    }

    /// Generates an ASCII Gantt chart of one execution.
    ///
    /// Each step is shown as a bar indicating when it ran relative to the
    /// whole run.
    pub fn gantt_chart(&self, execution_id: Uuid) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let events = self.events(execution_id);
        let (Some(first), Some(last)) = (events.first(), events.last()) else {
            return output;
        };
        let origin = first.timestamp;
        let total_time = (last.timestamp - origin).num_milliseconds();

        let mut spans: Vec<(String, (DateTime<Utc>, DateTime<Utc>))> =
            step_spans(&events).into_iter().collect();
        spans.sort_by_key(|(_, (start, _))| *start);

        // Scale to 50 characters width
        let scale = if total_time > 0 {
            50.0 / total_time as f64
        } else {
            0.0
        };

        for (step_id, (start, end)) in spans {
            let offset = (start - origin).num_milliseconds();
            let duration_ms = (end - start).num_milliseconds();

            let start_pos = (offset as f64 * scale) as usize;
            let width = ((duration_ms as f64 * scale).max(1.0)) as usize;

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&"#".repeat(width));

            output.push_str(&format!(
                "{:12} |{:50}| ({} ms)\n",
                truncate(&step_id, 12),
                bar,
                duration_ms
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Drops the events of an execution.
    pub fn clear(&self, execution_id: Uuid) {
        let mut state = self.state();
        state.events.remove(&execution_id);
        state.runs.remove(&execution_id);
        state.order.retain(|id| *id != execution_id);
    }

    /// Number of executions currently retained.
    pub fn retained(&self) -> usize {
        self.state().order.len()
    }
}

impl TimelineState {
    /// Starts tracking an execution, evicting the oldest beyond `limit`.
    fn track(&mut self, execution_id: Uuid, limit: usize) {
        if self.order.contains(&execution_id) {
            return;
        }
        self.order.push_back(execution_id);

        while self.order.len() > limit {
            let Some(evicted) = self.order.pop_front() else {
                break;
            };
            self.events.remove(&evicted);
            self.runs.remove(&evicted);
            debug!("Evicted timeline of execution {}", evicted);
        }
    }
}

impl WorkflowMonitor for TimelineMonitor {
    fn record_timeline_event(
        &self,
        execution_id: Uuid,
        step_id: Option<&str>,
        event_type: EventType,
        payload: Value,
    ) {
        debug!(
            "[{}] {}{}",
            execution_id,
            event_type,
            step_id.map(|s| format!(" ({})", s)).unwrap_or_default()
        );

        let mut state = self.state();
        state.track(execution_id, self.retention);
        state
            .events
            .entry(execution_id)
            .or_default()
            .push(TimelineEvent {
                execution_id,
                step_id: step_id.map(str::to_string),
                event_type,
                payload,
                timestamp: Utc::now(),
            });
    }

    fn update_metrics(&self, execution: &WorkflowExecution) {
        let metrics = match &self.repository {
            Some(repository) => match repository.workflow_metrics(&execution.workflow_id) {
                Ok(metrics) => metrics,
                Err(e) => {
                    warn!(
                        "Failed to refresh metrics for workflow '{}': {}",
                        execution.workflow_id, e
                    );
                    return;
                }
            },
            None => {
                let mut state = self.state();
                state.track(execution.id, self.retention);
                state.runs.insert(execution.id, execution.clone());
                let runs: Vec<WorkflowExecution> = state
                    .runs
                    .values()
                    .filter(|r| r.workflow_id == execution.workflow_id)
                    .cloned()
                    .collect();
                compute_metrics(&execution.workflow_id, &runs)
            }
        };

        self.state()
            .metrics
            .insert(execution.workflow_id.clone(), metrics);
    }
}

impl fmt::Debug for TimelineMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimelineMonitor")
            .field("executions", &self.state().events.len())
            .field("retention", &self.retention)
            .field("repository", &self.repository.is_some())
            .finish()
    }
}

/// Start and end of every step that has ended.
fn step_spans(events: &[TimelineEvent]) -> HashMap<String, (DateTime<Utc>, DateTime<Utc>)> {
    let mut starts: HashMap<&str, DateTime<Utc>> = HashMap::new();
    let mut spans = HashMap::new();

    for event in events {
        let Some(step_id) = event.step_id.as_deref() else {
            continue;
        };

        if event.event_type == EventType::StepStarted {
            starts.insert(step_id, event.timestamp);
        } else if event.event_type.ends_step() {
            // Condition skips end a step that never started
            let start = starts.get(step_id).copied().unwrap_or(event.timestamp);
            spans.insert(step_id.to_string(), (start, event.timestamp));
        }
    }

    spans
}

/// Truncates a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryRepository;
    use crate::workflow::{ExecutionStatus, StepType, TriggerType, WorkflowDefinition, WorkflowStep};
    use serde_json::json;
    use std::thread;
    use std::time::Duration;

    fn record(monitor: &TimelineMonitor, id: Uuid, step: &str, event_type: EventType) {
        monitor.record_timeline_event(id, Some(step), event_type, Value::Null);
    }

    fn run(status: ExecutionStatus) -> WorkflowExecution {
        let definition =
            WorkflowDefinition::from_steps("wf", vec![WorkflowStep::new("a", StepType::Extract)]);
        let mut execution = WorkflowExecution::new(&definition, TriggerType::Manual);
        execution.status = status;
        execution
    }

    #[test]
    fn test_events_are_kept_per_execution() {
        let monitor = TimelineMonitor::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        record(&monitor, first, "a", EventType::StepStarted);
        record(&monitor, first, "a", EventType::StepCompleted);
        monitor.record_timeline_event(
            second,
            None,
            EventType::WorkflowStarted,
            json!({"steps": 1}),
        );

        assert_eq!(monitor.events(first).len(), 2);
        assert_eq!(monitor.events(second).len(), 1);
        assert_eq!(monitor.events(second)[0].payload["steps"], 1);
        assert!(monitor.events(Uuid::new_v4()).is_empty());
    }

    #[test]
    fn test_step_events_and_count() {
        let monitor = TimelineMonitor::new();
        let id = Uuid::new_v4();
        record(&monitor, id, "a", EventType::StepStarted);
        record(&monitor, id, "a", EventType::StepRetry);
        record(&monitor, id, "b", EventType::StepStarted);
        record(&monitor, id, "a", EventType::StepStarted);

        assert_eq!(
            monitor.step_events(id, "a"),
            vec![
                EventType::StepStarted,
                EventType::StepRetry,
                EventType::StepStarted
            ]
        );
        assert_eq!(monitor.count(id, EventType::StepStarted), 3);
    }

    #[test]
    fn test_durations() {
        let monitor = TimelineMonitor::new();
        let id = Uuid::new_v4();
        record(&monitor, id, "step1", EventType::StepStarted);
        thread::sleep(Duration::from_millis(50));
        record(&monitor, id, "step1", EventType::StepCompleted);
        record(&monitor, id, "step2", EventType::StepStarted);

        let durations = monitor.durations(id);
        assert!(*durations.get("step1").unwrap() >= 50);
        assert!(!durations.contains_key("step2"));
    }

    #[test]
    fn test_condition_skip_has_zero_duration() {
        let monitor = TimelineMonitor::new();
        let id = Uuid::new_v4();
        record(&monitor, id, "gated", EventType::StepSkipped);

        assert_eq!(monitor.durations(id).get("gated"), Some(&0));
    }

    #[test]
    fn test_gantt_chart_generation() {
        let monitor = TimelineMonitor::new();
        let id = Uuid::new_v4();

        record(&monitor, id, "extract", EventType::StepStarted);
        thread::sleep(Duration::from_millis(30));
        record(&monitor, id, "extract", EventType::StepCompleted);
        record(&monitor, id, "load_warehouse_tables", EventType::StepStarted);
        thread::sleep(Duration::from_millis(30));
        record(&monitor, id, "load_warehouse_tables", EventType::StepFailed);

        let chart = monitor.gantt_chart(id);
        assert!(chart.contains("extract"));
        assert!(chart.contains("load_ware..."));
        assert!(chart.contains("Total:"));
    }

    #[test]
    fn test_gantt_chart_empty() {
        let monitor = TimelineMonitor::new();
        let chart = monitor.gantt_chart(Uuid::new_v4());
        assert!(chart.contains("Timeline"));
        assert!(!chart.contains("Total:"));
    }

    #[test]
    fn test_metrics_without_repository() {
        let monitor = TimelineMonitor::new();
        monitor.update_metrics(&run(ExecutionStatus::Completed));
        monitor.update_metrics(&run(ExecutionStatus::Failed));

        let metrics = monitor.metrics("wf").unwrap();
        assert_eq!(metrics.total_executions, 2);
        assert_eq!(metrics.count(ExecutionStatus::Failed), 1);
    }

    #[test]
    fn test_metrics_from_repository() {
        let repository = Arc::new(InMemoryRepository::new());
        let execution = run(ExecutionStatus::Completed);
        repository.save_execution(&execution).unwrap();

        let monitor = TimelineMonitor::with_repository(repository);
        monitor.update_metrics(&execution);

        let metrics = monitor.metrics("wf").unwrap();
        assert_eq!(metrics.count(ExecutionStatus::Completed), 1);
        assert!(monitor.metrics("other").is_none());
    }

    #[test]
    fn test_clear() {
        let monitor = TimelineMonitor::new();
        let id = Uuid::new_v4();
        record(&monitor, id, "a", EventType::StepStarted);
        monitor.clear(id);
        assert!(monitor.events(id).is_empty());
        assert_eq!(monitor.retained(), 0);
    }

    #[test]
    fn test_oldest_executions_evicted() {
        let monitor = TimelineMonitor::new().with_retention(2);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

        for id in &ids {
            record(&monitor, *id, "a", EventType::StepStarted);
            record(&monitor, *id, "a", EventType::StepCompleted);
        }

        assert_eq!(monitor.retained(), 2);
        assert!(monitor.events(ids[0]).is_empty());
        assert_eq!(monitor.events(ids[1]).len(), 2);
        assert_eq!(monitor.events(ids[2]).len(), 2);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 8), "short   ");
        assert_eq!(truncate("much_too_long", 8), "much_...");
    }
}
