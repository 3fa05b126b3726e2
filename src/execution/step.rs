//! Individual Step Execution
//!
//! Runs exactly one step of a run:
//! - Condition gate
//! - Processor dispatch
//! - Input assembly from dependency outputs
//! - Output capture
//! - Error policy dispatch (stop, continue, retry, skip, fallback)
//!
//! Every status change is checkpointed through the repository before the
//! matching timeline event is emitted.

use std::collections::HashMap;

use chrono::Utc;
use log::{debug, info, warn};
use serde_json::{json, Value};

use super::error::EngineError;
use super::processor::{ConditionEvaluator, ProcessorError, ProcessorRegistry};
use crate::monitoring::{EventType, WorkflowMonitor};
use crate::storage::WorkflowRepository;
use crate::workflow::{
    ErrorAction, StatusMap, StepExecution, StepStatus, WorkflowContext, WorkflowDefinition,
    WorkflowExecution, WorkflowExecutionError, WorkflowStep,
};

/// Executes single steps on behalf of the workflow executor.
pub struct StepExecutor<'a> {
    registry: &'a ProcessorRegistry,
    repository: &'a dyn WorkflowRepository,
    monitor: Option<&'a dyn WorkflowMonitor>,
    evaluator: Option<&'a dyn ConditionEvaluator>,
}

impl<'a> StepExecutor<'a> {
    pub fn new(registry: &'a ProcessorRegistry, repository: &'a dyn WorkflowRepository) -> Self {
        Self {
            registry,
            repository,
            monitor: None,
            evaluator: None,
        }
    }

    pub fn with_monitor(mut self, monitor: Option<&'a dyn WorkflowMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_condition_evaluator(mut self, evaluator: Option<&'a dyn ConditionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Executes `step` and applies its error policy on failure.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The step settled, or was queued again for retry/fallback
    /// * `Err(EngineError::StepFailed)` - The policy ends the run
    /// * `Err(_)` - A fatal engine error, regardless of policy
    pub fn execute_step(
        &self,
        definition: &WorkflowDefinition,
        step: &WorkflowStep,
        execution: &mut WorkflowExecution,
        context: &mut WorkflowContext,
        statuses: &mut StatusMap,
    ) -> Result<(), EngineError> {
        let step_id = step.id.as_str();

        if !self.conditions_hold(step, context) {
            let now = Utc::now();
            let record = record_mut(execution, step_id)?;
            record.status = StepStatus::Skipped;
            record.start_time = Some(now);
            record.end_time = Some(now);
            statuses.insert(step.id.clone(), StepStatus::Skipped);
            self.checkpoint(execution)?;

            info!("Step '{}' skipped: conditions not met", step.display_name());
            self.emit(
                execution,
                Some(step_id),
                EventType::StepSkipped,
                json!({ "reason": "conditions_not_met" }),
            );
            return Ok(());
        }

        let attempt = {
            let record = record_mut(execution, step_id)?;
            record.status = StepStatus::Running;
            record.start_time = Some(Utc::now());
            record.end_time = None;
            record.retry_count + 1
        };
        statuses.insert(step.id.clone(), StepStatus::Running);
        self.checkpoint(execution)?;

        info!("Starting step: {} (attempt {})", step.display_name(), attempt);
        self.emit(
            execution,
            Some(step_id),
            EventType::StepStarted,
            json!({ "step_type": step.step_type, "attempt": attempt }),
        );

        let Some(processor) = self.registry.get(step.step_type) else {
            let err = EngineError::ProcessorNotRegistered {
                step_id: step.id.clone(),
                step_type: step.step_type,
            };
            let error = WorkflowExecutionError::from_error(Some(step_id), err.kind(), &err);
            record_mut(execution, step_id)?.errors.push(error);
            self.fail_step(execution, step, statuses, json!({ "fatal": true }))?;
            return Err(err);
        };

        let input: HashMap<_, _> = step
            .depends_on
            .iter()
            .filter_map(|dep| context.output(dep).map(|out| (dep.clone(), out.clone())))
            .collect();
        record_mut(execution, step_id)?.input = input;

        let result = if processor.validate_configuration(step) {
            processor.process_step(step, context)
        } else {
            Err(ProcessorError::InvalidConfiguration(format!(
                "configuration of step '{}' rejected by its processor",
                step.id
            )))
        };

        match result {
            Ok(output) => {
                context.step_outputs.insert(step.id.clone(), output.clone());
                let (duration_ms, retry_count) = {
                    let record = record_mut(execution, step_id)?;
                    record.output = Some(output);
                    record.status = StepStatus::Completed;
                    record.end_time = Some(Utc::now());
                    (record.duration_ms(), record.retry_count)
                };
                statuses.insert(step.id.clone(), StepStatus::Completed);
                self.checkpoint(execution)?;

                info!("Step '{}' completed successfully", step.display_name());
                self.emit(
                    execution,
                    Some(step_id),
                    EventType::StepCompleted,
                    json!({ "duration_ms": duration_ms, "retry_count": retry_count }),
                );
                Ok(())
            }
            Err(err) => self.handle_failure(definition, step, execution, context, statuses, err),
        }
    }

    /// Records the failure, then dispatches on the step's error action.
    fn handle_failure(
        &self,
        definition: &WorkflowDefinition,
        step: &WorkflowStep,
        execution: &mut WorkflowExecution,
        context: &WorkflowContext,
        statuses: &mut StatusMap,
        err: ProcessorError,
    ) -> Result<(), EngineError> {
        let step_id = step.id.as_str();

        let error = WorkflowExecutionError::from_error(Some(step_id), err.kind(), &err);
        record_mut(execution, step_id)?.errors.push(error.clone());
        execution.errors.push(error);

        warn!("Step '{}' failed: {}", step.display_name(), err);
        self.emit(
            execution,
            Some(step_id),
            EventType::ErrorOccurred,
            json!({ "error_type": err.kind(), "message": err.to_string() }),
        );

        match step.error_handling.on_error {
            ErrorAction::StopWorkflow => {
                self.fail_step(execution, step, statuses, json!({ "continue_workflow": false }))?;
                Err(EngineError::StepFailed {
                    step_id: step.id.clone(),
                    message: err.to_string(),
                })
            }

            ErrorAction::ContinueWorkflow => {
                self.fail_step(execution, step, statuses, json!({ "continue_workflow": true }))
            }

            ErrorAction::RetryStep => {
                let retries_used = record_mut(execution, step_id)?.retry_count;
                if retries_used < step.retry_count {
                    self.retry_step(execution, step, context, statuses)
                } else {
                    warn!(
                        "Step '{}' exhausted {} retries",
                        step.display_name(),
                        step.retry_count
                    );
                    self.fail_step(
                        execution,
                        step,
                        statuses,
                        json!({ "retries_exhausted": true }),
                    )?;
                    if definition.default_error_action == ErrorAction::StopWorkflow {
                        Err(EngineError::StepFailed {
                            step_id: step.id.clone(),
                            message: err.to_string(),
                        })
                    } else {
                        Ok(())
                    }
                }
            }

            ErrorAction::SkipStep => {
                {
                    let record = record_mut(execution, step_id)?;
                    record.status = StepStatus::Skipped;
                    record.end_time = Some(Utc::now());
                }
                statuses.insert(step.id.clone(), StepStatus::Skipped);
                self.checkpoint(execution)?;

                info!("Step '{}' skipped after failure", step.display_name());
                self.emit(
                    execution,
                    Some(step_id),
                    EventType::StepSkipped,
                    json!({ "reason": "error_policy" }),
                );
                Ok(())
            }

            ErrorAction::ExecuteFallback => self.requeue_fallback(definition, step, execution, statuses),
        }
    }

    fn retry_step(
        &self,
        execution: &mut WorkflowExecution,
        step: &WorkflowStep,
        context: &WorkflowContext,
        statuses: &mut StatusMap,
    ) -> Result<(), EngineError> {
        let step_id = step.id.as_str();

        let retry = {
            let record = record_mut(execution, step_id)?;
            record.retry_count += 1;
            record.retry_count
        };
        info!(
            "Retrying step '{}' ({}/{}) in {} ms",
            step.display_name(),
            retry,
            step.retry_count,
            step.retry_interval_ms
        );
        self.emit(
            execution,
            Some(step_id),
            EventType::StepRetry,
            json!({
                "retry": retry,
                "max_retries": step.retry_count,
                "retry_interval_ms": step.retry_interval_ms,
            }),
        );
        self.checkpoint(execution)?;

        if context.control().sleep(step.retry_interval()) {
            debug!("Back-off of step '{}' interrupted by cancellation", step_id);
        }

        {
            let record = record_mut(execution, step_id)?;
            record.status = StepStatus::NotStarted;
            record.end_time = None;
        }
        statuses.insert(step.id.clone(), StepStatus::NotStarted);
        self.checkpoint(execution)
    }

    /// Marks `step` Failed and resets its fallback step to NotStarted.
    fn requeue_fallback(
        &self,
        definition: &WorkflowDefinition,
        step: &WorkflowStep,
        execution: &mut WorkflowExecution,
        statuses: &mut StatusMap,
    ) -> Result<(), EngineError> {
        let fallback_id = step.error_handling.fallback_step_id.as_deref().unwrap_or_default();
        self.fail_step(
            execution,
            step,
            statuses,
            json!({ "fallback_step_id": fallback_id }),
        )?;

        let Some(fallback_id) = step
            .error_handling
            .fallback_step_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
        else {
            return Err(EngineError::InvalidFallback {
                step_id: step.id.clone(),
            });
        };

        let Some(fallback) = definition.get_step(fallback_id) else {
            return Err(EngineError::FallbackNotFound {
                step_id: step.id.clone(),
                fallback_step_id: fallback_id.to_string(),
            });
        };

        match execution.step_execution_mut(&fallback.id) {
            Some(record) => *record = StepExecution::new(fallback.id.clone()),
            None => execution
                .step_executions
                .push(StepExecution::new(fallback.id.clone())),
        }
        statuses.insert(fallback.id.clone(), StepStatus::NotStarted);
        self.checkpoint(execution)?;

        info!(
            "Step '{}' failed, falling back to '{}'",
            step.display_name(),
            fallback.display_name()
        );
        self.emit(
            execution,
            Some(&fallback.id),
            EventType::StepRequeued,
            json!({ "failed_step_id": step.id }),
        );
        Ok(())
    }

    fn fail_step(
        &self,
        execution: &mut WorkflowExecution,
        step: &WorkflowStep,
        statuses: &mut StatusMap,
        payload: Value,
    ) -> Result<(), EngineError> {
        {
            let record = record_mut(execution, &step.id)?;
            record.status = StepStatus::Failed;
            record.end_time = Some(Utc::now());
        }
        statuses.insert(step.id.clone(), StepStatus::Failed);
        self.checkpoint(execution)?;

        self.emit(execution, Some(&step.id), EventType::StepFailed, payload);
        Ok(())
    }

    /// All conditions must hold. Without an evaluator every condition passes.
    fn conditions_hold(&self, step: &WorkflowStep, context: &WorkflowContext) -> bool {
        if step.conditions.is_empty() {
            return true;
        }

        match self.evaluator {
            Some(evaluator) => step
                .conditions
                .iter()
                .all(|condition| evaluator.evaluate(condition, context)),
            None => {
                warn!(
                    "Step '{}' has conditions but no evaluator is configured; running it",
                    step.id
                );
                true
            }
        }
    }

    fn checkpoint(&self, execution: &WorkflowExecution) -> Result<(), EngineError> {
        self.repository.save_execution(execution)?;
        Ok(())
    }

    fn emit(
        &self,
        execution: &WorkflowExecution,
        step_id: Option<&str>,
        event_type: EventType,
        payload: Value,
    ) {
        if let Some(monitor) = self.monitor {
            monitor.record_timeline_event(execution.id, step_id, event_type, payload);
        }
    }
}

fn record_mut<'e>(
    execution: &'e mut WorkflowExecution,
    step_id: &str,
) -> Result<&'e mut StepExecution, EngineError> {
    execution
        .step_execution_mut(step_id)
        .ok_or_else(|| EngineError::UnknownStep(step_id.to_string()))
}
