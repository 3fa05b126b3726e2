//! Dependency Readiness
//!
//! Pure functions over the step graph and a status map. A step is ready when
//! it has no dependencies or every dependency is Completed or Skipped.
//! Skipped counts so a gated branch never starves its downstream; Failed
//! never counts.

use std::collections::HashSet;

use super::model::WorkflowStep;
use super::state::{StatusMap, StepStatus};

/// Returns true if every dependency of `step` is Completed or Skipped.
///
/// A dependency missing from the map is treated as not ready.
pub fn is_ready(step: &WorkflowStep, statuses: &StatusMap) -> bool {
    step.depends_on.iter().all(|dep| {
        statuses
            .get(dep)
            .is_some_and(|status| status.satisfies_dependents())
    })
}

/// Returns the steps still at NotStarted whose dependencies are ready,
/// in definition order.
pub fn ready_steps<'a>(steps: &'a [WorkflowStep], statuses: &StatusMap) -> Vec<&'a WorkflowStep> {
    steps
        .iter()
        .filter(|step| statuses.get(&step.id) == Some(&StepStatus::NotStarted))
        .filter(|step| is_ready(step, statuses))
        .collect()
}

/// Returns NotStarted steps that can never become ready because some
/// dependency has Failed, directly or through another starved step.
pub fn starved_steps<'a>(steps: &'a [WorkflowStep], statuses: &StatusMap) -> Vec<&'a str> {
    let mut starved: HashSet<&str> = HashSet::new();

    loop {
        let before = starved.len();
        for step in steps {
            if statuses.get(&step.id) != Some(&StepStatus::NotStarted)
                || starved.contains(step.id.as_str())
            {
                continue;
            }
            let blocked = step.depends_on.iter().any(|dep| {
                statuses.get(dep) == Some(&StepStatus::Failed) || starved.contains(dep.as_str())
            });
            if blocked {
                starved.insert(step.id.as_str());
            }
        }
        if starved.len() == before {
            break;
        }
    }

    steps
        .iter()
        .map(|step| step.id.as_str())
        .filter(|id| starved.contains(id))
        .collect()
}

/// Returns true if any step is currently Running.
pub fn any_running(statuses: &StatusMap) -> bool {
    statuses.values().any(|status| *status == StepStatus::Running)
}
