//! Definition Validation
//!
//! Structural checks run before a definition is stored or executed:
//! - Step field validation
//! - Reference integrity for `depends_on`
//! - Dependency cycle detection (Kahn's algorithm)
//! - Fallback targets that point at themselves or loop
//!
//! Fallback targets that do not exist are only reported by
//! [`quick_validate`]; the engine treats them as a fatal runtime error.

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, info};

use super::model::{ErrorAction, WorkflowDefinition, WorkflowStep};

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Workflow has no steps")]
    EmptyWorkflow,

    #[error("Workflow has an empty ID")]
    EmptyWorkflowId,

    #[error("Duplicate step ID: '{0}'")]
    DuplicateStepId(String),

    #[error("Step has empty or whitespace-only ID")]
    EmptyStepId,

    #[error("Step '{step}' references unknown step '{reference}'")]
    InvalidReference { step: String, reference: String },

    #[error("Workflow contains cyclic dependencies (steps depend on each other in a loop)")]
    CyclicDependency,

    #[error("Step '{0}' names itself as its fallback")]
    SelfFallback(String),

    #[error("Fallback chain loops: {}", .0.join(" -> "))]
    FallbackCycle(Vec<String>),
}

/// Validates a single step's fields.
fn validate_step(step: &WorkflowStep) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if step.id.trim().is_empty() {
        errors.push(ValidationError::EmptyStepId);
        return errors;
    }

    if step.error_handling.on_error == ErrorAction::ExecuteFallback
        && step.error_handling.fallback_step_id.as_deref() == Some(step.id.as_str())
    {
        errors.push(ValidationError::SelfFallback(step.id.clone()));
    }

    if step.depends_on.is_empty() {
        debug!("Step '{}' is a root step (no dependencies)", step.id);
    }

    errors
}

/// Validates the entire definition structure.
///
/// Performs the following checks:
/// 1. Definition has an ID and at least one step
/// 2. No duplicate step IDs
/// 3. All steps have valid fields
/// 4. All dependencies point to existing steps
/// 5. No cyclic dependencies
/// 6. No looping fallback chains
///
/// Steps keep their declared order; the scheduler walks them as written.
pub fn validate_definition(definition: &WorkflowDefinition) -> Result<(), Vec<ValidationError>> {
    info!(
        "Validating workflow '{}' with {} steps",
        definition.id,
        definition.steps.len()
    );

    if definition.id.trim().is_empty() {
        return Err(vec![ValidationError::EmptyWorkflowId]);
    }

    if definition.steps.is_empty() {
        return Err(vec![ValidationError::EmptyWorkflow]);
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for step in &definition.steps {
        if !seen_ids.insert(step.id.as_str()) {
            return Err(vec![ValidationError::DuplicateStepId(step.id.clone())]);
        }
    }

    let mut all_errors = Vec::new();
    for step in &definition.steps {
        all_errors.extend(validate_step(step));

        for dep in &step.depends_on {
            if !seen_ids.contains(dep.as_str()) {
                all_errors.push(ValidationError::InvalidReference {
                    step: step.id.clone(),
                    reference: dep.clone(),
                });
            }
        }
    }

    if !all_errors.is_empty() {
        return Err(all_errors);
    }

    topological_order(definition).map_err(|e| vec![e])?;

    if let Some(cycle) = find_fallback_cycle(definition) {
        return Err(vec![ValidationError::FallbackCycle(cycle)]);
    }

    info!("Workflow '{}' validated", definition.id);
    Ok(())
}

/// Orders step IDs so dependencies come before dependents (Kahn's algorithm).
///
/// Fails with [`ValidationError::CyclicDependency`] if the graph has a cycle.
pub fn topological_order(definition: &WorkflowDefinition) -> Result<Vec<String>, ValidationError> {
    let mut in_degree: HashMap<&str, usize> = definition
        .steps
        .iter()
        .map(|s| (s.id.as_str(), s.depends_on.len()))
        .collect();

    let mut queue: VecDeque<&str> = definition
        .steps
        .iter()
        .filter(|s| s.depends_on.is_empty())
        .map(|s| s.id.as_str())
        .collect();

    let mut sorted_order: Vec<String> = Vec::new();

    while let Some(current_id) = queue.pop_front() {
        sorted_order.push(current_id.to_string());

        for successor_id in definition.dependents_of(current_id) {
            if let Some(degree) = in_degree.get_mut(successor_id) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(successor_id);
                }
            }
        }
    }

    if sorted_order.len() != definition.steps.len() {
        return Err(ValidationError::CyclicDependency);
    }

    debug!("Topological order: {:?}", sorted_order);
    Ok(sorted_order)
}

/// Follows fallback redirects from every step and returns the first loop.
fn find_fallback_cycle(definition: &WorkflowDefinition) -> Option<Vec<String>> {
    let fallback_of = |id: &str| -> Option<&str> {
        let step = definition.get_step(id)?;
        if step.error_handling.on_error != ErrorAction::ExecuteFallback {
            return None;
        }
        step.error_handling.fallback_step_id.as_deref()
    };

    for step in &definition.steps {
        let mut chain = vec![step.id.as_str()];
        let mut current = step.id.as_str();

        while let Some(next) = fallback_of(current) {
            if chain.contains(&next) {
                chain.push(next);
                return Some(chain.into_iter().map(str::to_string).collect());
            }
            chain.push(next);
            current = next;
        }
    }

    None
}

/// Quick validation that returns a list of error messages.
///
/// Unlike [`validate_definition`] this never stops early and also reports
/// fallback targets the engine will not be able to resolve.
pub fn quick_validate(definition: &WorkflowDefinition) -> Vec<String> {
    let mut errors = Vec::new();

    if definition.steps.is_empty() {
        errors.push("Workflow has no steps".to_string());
        return errors;
    }

    let step_ids: HashSet<_> = definition.steps.iter().map(|s| s.id.as_str()).collect();

    for step in &definition.steps {
        if step.id.trim().is_empty() {
            errors.push("A step has an empty ID".to_string());
        }

        for dep in &step.depends_on {
            if !step_ids.contains(dep.as_str()) {
                errors.push(format!(
                    "Step '{}': references unknown step '{}'",
                    step.id, dep
                ));
            }
        }

        if step.error_handling.on_error == ErrorAction::ExecuteFallback {
            match step.error_handling.fallback_step_id.as_deref() {
                None => errors.push(format!(
                    "Step '{}': execute_fallback without a fallback step",
                    step.id
                )),
                Some(target) if !step_ids.contains(target) => errors.push(format!(
                    "Step '{}': fallback step '{}' does not exist",
                    step.id, target
                )),
                Some(_) => {}
            }
        }
    }

    errors
}
