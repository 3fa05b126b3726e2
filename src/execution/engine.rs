//! Workflow Execution Engine
//!
//! The scheduling loop that drives a run to a terminal state:
//! - Dependency-aware selection of ready steps
//! - Pause and cancellation through the run's control handle
//! - Checkpointing through the repository after every transition
//! - Final status, timeline event, notification and metrics refresh
//! - Resuming a checkpointed run after a crash

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use uuid::Uuid;

use super::error::EngineError;
use super::processor::{ConditionEvaluator, ProcessorRegistry};
use super::step::StepExecutor;
use crate::config::EngineConfig;
use crate::monitoring::{EventType, Notification, Notifier, WorkflowMonitor};
use crate::storage::{RepositoryError, WorkflowRepository};
use crate::workflow::planner::{any_running, is_ready, ready_steps, starved_steps};
use crate::workflow::{
    validate_definition, ExecutionStatus, StepExecution, StepStatus, TriggerType,
    WorkflowContext, WorkflowDefinition, WorkflowExecution, WorkflowExecutionError,
};

/// Workflow execution engine.
///
/// Owns the scheduling loop of a run. Steps ready in the same pass run one
/// at a time, in definition order.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use std::sync::Arc;
///
/// use etlrunner::execution::{ProcessorRegistry, WorkflowExecutor};
/// use etlrunner::storage::InMemoryRepository;
/// use etlrunner::workflow::{ExecutionStatus, StepType, TriggerType, WorkflowDefinition, WorkflowStep};
///
/// let definition = WorkflowDefinition::from_steps(
///     "orders",
///     vec![
///         WorkflowStep::new("extract", StepType::Extract),
///         WorkflowStep::new("load", StepType::Load).depends_on("extract"),
///     ],
/// );
///
/// let executor = WorkflowExecutor::new(
///     ProcessorRegistry::dry_run(),
///     Arc::new(InMemoryRepository::new()),
/// );
/// let execution = executor.execute(&definition, HashMap::new(), TriggerType::Manual);
/// assert_eq!(execution.status, ExecutionStatus::Completed);
/// ```
pub struct WorkflowExecutor {
    registry: ProcessorRegistry,
    repository: Arc<dyn WorkflowRepository>,
    monitor: Option<Arc<dyn WorkflowMonitor>>,
    notifier: Option<Arc<dyn Notifier>>,
    evaluator: Option<Arc<dyn ConditionEvaluator>>,
    config: EngineConfig,
}

impl WorkflowExecutor {
    pub fn new(registry: ProcessorRegistry, repository: Arc<dyn WorkflowRepository>) -> Self {
        Self {
            registry,
            repository,
            monitor: None,
            notifier: None,
            evaluator: None,
            config: EngineConfig::default(),
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn WorkflowMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_condition_evaluator(mut self, evaluator: impl ConditionEvaluator + 'static) -> Self {
        self.evaluator = Some(Arc::new(evaluator));
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    pub fn repository(&self) -> &Arc<dyn WorkflowRepository> {
        &self.repository
    }

    /// Builds a run of `definition` with every step at NotStarted, and its
    /// context. Run parameters override the definition's parameters.
    pub fn prepare(
        &self,
        definition: &WorkflowDefinition,
        parameters: HashMap<String, Value>,
        trigger: TriggerType,
    ) -> (WorkflowExecution, WorkflowContext) {
        let mut execution = WorkflowExecution::new(definition, trigger);
        execution.parameters = parameters;

        let context = build_context(definition, &execution);
        (execution, context)
    }

    /// Prepares and runs `definition` to a terminal state.
    pub fn execute(
        &self,
        definition: &WorkflowDefinition,
        parameters: HashMap<String, Value>,
        trigger: TriggerType,
    ) -> WorkflowExecution {
        let (mut execution, mut context) = self.prepare(definition, parameters, trigger);
        self.run(definition, &mut execution, &mut context);
        execution
    }

    /// Continues a checkpointed run from its persisted step statuses.
    ///
    /// Steps that were Running when the run was interrupted start over.
    /// Runs already in a terminal state are returned unchanged.
    pub fn resume(&self, execution_id: Uuid) -> Result<WorkflowExecution, EngineError> {
        let mut execution =
            self.repository
                .get_execution(execution_id)?
                .ok_or_else(|| RepositoryError::NotFound {
                    kind: "execution",
                    id: execution_id.to_string(),
                })?;

        if execution.status.is_terminal() {
            info!(
                "Execution {} already finished as {}",
                execution_id, execution.status
            );
            return Ok(execution);
        }

        let definition = self
            .repository
            .get_definition(&execution.workflow_id, Some(&execution.workflow_version))?
            .ok_or_else(|| RepositoryError::NotFound {
                kind: "definition",
                id: format!("{}@{}", execution.workflow_id, execution.workflow_version),
            })?;

        let mut context = build_context(&definition, &execution);
        for record in &execution.step_executions {
            if record.status == StepStatus::Completed {
                if let Some(output) = &record.output {
                    context
                        .step_outputs
                        .insert(record.step_id.clone(), output.clone());
                }
            }
        }

        info!(
            "Resuming execution {} of '{}' ({} steps settled)",
            execution_id,
            definition.display_name(),
            execution.count_steps(StepStatus::Completed) + execution.count_steps(StepStatus::Skipped)
        );

        self.run(&definition, &mut execution, &mut context);
        Ok(execution)
    }

    /// Drives `execution` to a terminal state.
    ///
    /// Never fails: every engine error is recorded on the execution, and
    /// callers inspect `execution.status`.
    pub fn run(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut WorkflowExecution,
        context: &mut WorkflowContext,
    ) {
        let outcome = self.schedule(definition, execution, context);
        self.finish(definition, execution, context, outcome);
    }

    fn schedule(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut WorkflowExecution,
        context: &mut WorkflowContext,
    ) -> Result<(), EngineError> {
        // Fallback loops and dependency cycles would never settle
        validate_definition(definition).map_err(EngineError::InvalidDefinition)?;

        let resumed = self.initialize(definition, execution);
        let mut statuses = execution.status_map();

        execution.status = ExecutionStatus::Running;
        execution.start_time.get_or_insert_with(Utc::now);
        execution.end_time = None;
        self.checkpoint(execution)?;

        info!(
            "Starting workflow '{}' version {} ({} steps)",
            definition.display_name(),
            definition.version,
            definition.steps.len()
        );
        self.emit(
            execution,
            None,
            EventType::WorkflowStarted,
            json!({
                "workflow_version": definition.version,
                "steps": definition.steps.len(),
                "resumed": resumed,
            }),
        );

        let step_executor = StepExecutor::new(&self.registry, self.repository.as_ref())
            .with_monitor(self.monitor.as_deref())
            .with_condition_evaluator(self.evaluator.as_deref());

        loop {
            if context.is_cancelled() {
                info!("Cancellation requested, stopping scheduler");
                break;
            }

            if context.control().is_paused() {
                self.wait_for_resume(execution, context)?;
                continue;
            }

            let ready = ready_steps(&definition.steps, &statuses);
            if ready.is_empty() {
                if any_running(&statuses) {
                    context.control().sleep(self.config.running_poll_interval());
                    continue;
                }
                debug!("No ready steps left");
                break;
            }

            debug!(
                "Ready steps: {:?}",
                ready.iter().map(|s| s.id.as_str()).collect::<Vec<_>>()
            );

            for step in ready {
                if context.is_cancelled() || context.control().is_paused() {
                    break;
                }
                // An earlier step of this pass may have changed the picture
                if statuses.get(&step.id) != Some(&StepStatus::NotStarted)
                    || !is_ready(step, &statuses)
                {
                    continue;
                }
                step_executor.execute_step(definition, step, execution, context, &mut statuses)?;
            }
        }

        Ok(())
    }

    /// Makes sure every step has a record and restarts interrupted steps.
    /// Returns true when the run already made progress before.
    fn initialize(&self, definition: &WorkflowDefinition, execution: &mut WorkflowExecution) -> bool {
        let mut resumed = false;

        for step in &definition.steps {
            match execution.step_execution_mut(&step.id) {
                Some(record) => {
                    if record.status == StepStatus::Running {
                        warn!("Step '{}' was interrupted, restarting it", step.id);
                        record.status = StepStatus::NotStarted;
                        record.end_time = None;
                    }
                    if record.status != StepStatus::NotStarted {
                        resumed = true;
                    }
                }
                None => execution
                    .step_executions
                    .push(StepExecution::new(step.id.clone())),
            }
        }

        resumed
    }

    fn wait_for_resume(
        &self,
        execution: &mut WorkflowExecution,
        context: &WorkflowContext,
    ) -> Result<(), EngineError> {
        execution.status = ExecutionStatus::Paused;
        self.checkpoint(execution)?;
        info!("Execution paused - waiting for resume signal");
        self.emit(execution, None, EventType::WorkflowPaused, Value::Null);

        if context
            .control()
            .wait_while_paused(self.config.pause_poll_interval())
        {
            // Cancelled while paused; the loop picks it up
            return Ok(());
        }

        execution.status = ExecutionStatus::Running;
        self.checkpoint(execution)?;
        info!("Resumed");
        self.emit(execution, None, EventType::WorkflowResumed, Value::Null);
        Ok(())
    }

    fn finish(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut WorkflowExecution,
        context: &WorkflowContext,
        outcome: Result<(), EngineError>,
    ) {
        let status = match outcome {
            Ok(()) if execution.all_steps_settled() => ExecutionStatus::Completed,
            Ok(()) if context.is_cancelled() => ExecutionStatus::Cancelled,
            Ok(()) => {
                let starved = starved_steps(&definition.steps, &execution.status_map());
                if !starved.is_empty() {
                    warn!("Steps blocked by failed dependencies: {}", starved.join(", "));
                }
                ExecutionStatus::Failed
            }
            Err(err @ EngineError::StepFailed { .. }) => {
                error!("Workflow failed: {}", err);
                ExecutionStatus::Failed
            }
            Err(err) => {
                error!("Workflow aborted: {}", err);
                execution.errors.push(WorkflowExecutionError::from_error(
                    err.step_id(),
                    err.kind(),
                    &err,
                ));
                ExecutionStatus::Failed
            }
        };

        execution.status = status;
        execution.end_time = Some(Utc::now());
        if let Err(e) = self.repository.save_execution(execution) {
            error!("Failed to checkpoint final state of {}: {}", execution.id, e);
        }

        let event_type = match status {
            ExecutionStatus::Completed => EventType::WorkflowCompleted,
            ExecutionStatus::Cancelled => EventType::WorkflowCancelled,
            _ => EventType::WorkflowFailed,
        };
        self.emit(
            execution,
            None,
            event_type,
            json!({
                "status": status,
                "duration_ms": execution.duration_ms(),
                "completed_steps": execution.count_steps(StepStatus::Completed),
                "skipped_steps": execution.count_steps(StepStatus::Skipped),
                "failed_steps": execution.count_steps(StepStatus::Failed),
                "errors": execution.errors.len(),
            }),
        );

        let summary = Notification::summary(definition, execution);
        match status {
            ExecutionStatus::Completed => info!("{}", summary),
            _ => warn!("{}", summary),
        }

        if self.config.notifications_enabled {
            if let Some(notifier) = &self.notifier {
                let notification = Notification::for_execution(definition, execution);
                if let Err(e) = notifier.notify(&notification) {
                    warn!("Failed to deliver notification for {}: {}", execution.id, e);
                }
            }
        }

        if self.config.metrics_enabled {
            if let Some(monitor) = &self.monitor {
                monitor.update_metrics(execution);
            }
        }
    }

    fn checkpoint(&self, execution: &WorkflowExecution) -> Result<(), EngineError> {
        self.repository.save_execution(execution).map_err(|e| {
            error!("Checkpoint of {} failed: {}", execution.id, e);
            EngineError::from(e)
        })
    }

    fn emit(
        &self,
        execution: &WorkflowExecution,
        step_id: Option<&str>,
        event_type: EventType,
        payload: Value,
    ) {
        if let Some(monitor) = &self.monitor {
            monitor.record_timeline_event(execution.id, step_id, event_type, payload);
        }
    }
}

/// Context for a run: definition parameters overridden by run parameters.
fn build_context(definition: &WorkflowDefinition, execution: &WorkflowExecution) -> WorkflowContext {
    let mut context = WorkflowContext::new(execution.id);
    context.parameters = definition.parameters.clone();
    context.parameters.extend(
        execution
            .parameters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    context
}
