//! Workflow Definition Model
//!
//! Core data structures describing a workflow and its steps.
//!
//! # Example YAML Format
//!
//! ```yaml
//! id: nightly_sales
//! name: Nightly sales load
//! version: "1.0"
//! default_error_action: stop_workflow
//! steps:
//!   - id: extract_orders
//!     type: extract
//!     configuration:
//!       source: orders.csv
//!
//!   - id: clean_orders
//!     type: transform
//!     depends_on:
//!       - extract_orders
//!     error_handling:
//!       on_error: retry_step
//!     retry_count: 2
//!     retry_interval_ms: 1000
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of work a step performs. Each kind is served by exactly one processor.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Extract,
    Transform,
    Load,
    Validate,
    Enrich,
    Branch,
    Custom,
}

impl StepType {
    /// Every step type, in declaration order.
    pub const ALL: [StepType; 7] = [
        StepType::Extract,
        StepType::Transform,
        StepType::Load,
        StepType::Validate,
        StepType::Enrich,
        StepType::Branch,
        StepType::Custom,
    ];
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepType::Extract => "extract",
            StepType::Transform => "transform",
            StepType::Load => "load",
            StepType::Validate => "validate",
            StepType::Enrich => "enrich",
            StepType::Branch => "branch",
            StepType::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// What the engine does when a step's processor fails.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAction {
    /// Fail the step and end the whole run
    #[default]
    StopWorkflow,
    /// Fail the step but keep scheduling unrelated steps
    ContinueWorkflow,
    /// Re-queue the step until its retry budget is spent
    RetryStep,
    /// Mark the step skipped so its dependents can proceed
    SkipStep,
    /// Fail the step and re-queue a pre-declared fallback step
    ExecuteFallback,
}

/// Per-step failure policy.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ErrorHandling {
    #[serde(default)]
    pub on_error: ErrorAction,

    /// Step re-queued when `on_error` is `ExecuteFallback`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_step_id: Option<String>,
}

/// A single unit of ETL work inside a workflow definition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowStep {
    /// Unique identifier within the definition
    pub id: String,

    /// Human-readable name (defaults to the id)
    #[serde(default)]
    pub name: String,

    #[serde(rename = "type")]
    pub step_type: StepType,

    /// Opaque settings interpreted only by the step's processor
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub configuration: HashMap<String, Value>,

    /// IDs of steps that must be Completed or Skipped before this step runs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Condition expressions handed to the condition evaluator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,

    #[serde(default)]
    pub error_handling: ErrorHandling,

    /// Maximum number of retries under `RetryStep`
    #[serde(default)]
    pub retry_count: u32,

    /// Back-off between retries, in milliseconds
    #[serde(default)]
    pub retry_interval_ms: u64,
}

impl WorkflowStep {
    /// Creates a step with no dependencies and the default error policy.
    ///
    /// # Example
    ///
    /// ```
    /// use etlrunner::workflow::{ErrorAction, StepType, WorkflowStep};
    ///
    /// let step = WorkflowStep::new("clean", StepType::Transform)
    ///     .depends_on("extract")
    ///     .on_error(ErrorAction::RetryStep)
    ///     .with_retries(2, 500);
    /// assert_eq!(step.retry_count, 2);
    /// ```
    pub fn new(id: impl Into<String>, step_type: StepType) -> Self {
        let id = id.into().trim().to_string();
        Self {
            name: id.clone(),
            id,
            step_type,
            configuration: HashMap::new(),
            depends_on: Vec::new(),
            conditions: Vec::new(),
            error_handling: ErrorHandling::default(),
            retry_count: 0,
            retry_interval_ms: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds a dependency on another step.
    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    /// Sets one configuration entry.
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.conditions.push(condition.into());
        self
    }

    pub fn on_error(mut self, action: ErrorAction) -> Self {
        self.error_handling.on_error = action;
        self
    }

    /// Routes failures to `fallback_step_id`.
    pub fn with_fallback(mut self, fallback_step_id: impl Into<String>) -> Self {
        self.error_handling.on_error = ErrorAction::ExecuteFallback;
        self.error_handling.fallback_step_id = Some(fallback_step_id.into());
        self
    }

    pub fn with_retries(mut self, count: u32, interval_ms: u64) -> Self {
        self.retry_count = count;
        self.retry_interval_ms = interval_ms;
        self
    }

    /// Back-off applied before a retried step re-enters the ready pool.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Name used in logs and notifications.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// A versioned, ordered set of steps.
///
/// A definition is immutable per `(id, version)`; an empty `version` means
/// "not yet assigned" and is filled in by the repository on save.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub version: String,

    pub steps: Vec<WorkflowStep>,

    /// Default run parameters, overridden per execution
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, Value>,

    /// Decides whether an exhausted retry ends the run
    #[serde(default)]
    pub default_error_action: ErrorAction,
}

impl WorkflowDefinition {
    /// Creates an empty, unversioned definition.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            version: String::new(),
            steps: Vec::new(),
            parameters: HashMap::new(),
            default_error_action: ErrorAction::StopWorkflow,
        }
    }

    /// Creates a definition from a list of steps.
    pub fn from_steps(id: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        let id = id.into();
        let mut definition = Self::new(id.clone(), id);
        definition.steps = steps;
        definition
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_default_error_action(mut self, action: ErrorAction) -> Self {
        self.default_error_action = action;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Adds a step to the definition.
    pub fn add_step(&mut self, step: WorkflowStep) -> Result<(), String> {
        if self.steps.iter().any(|s| s.id == step.id) {
            return Err(format!("Step '{}' already exists", step.id));
        }
        self.steps.push(step);
        Ok(())
    }

    /// Gets a step by ID.
    pub fn get_step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Returns steps with no dependencies (entry points).
    pub fn root_steps(&self) -> Vec<&WorkflowStep> {
        self.steps.iter().filter(|s| s.depends_on.is_empty()).collect()
    }

    /// Returns the IDs of steps that list `id` as a dependency.
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.depends_on.iter().any(|d| d == id))
            .map(|s| s.id.as_str())
            .collect()
    }

    /// Returns the set of declared step types.
    pub fn step_types(&self) -> HashSet<StepType> {
        self.steps.iter().map(|s| s.step_type).collect()
    }

    /// Returns the name used in logs and notifications.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_creation() {
        let step = WorkflowStep::new(" load ", StepType::Load)
            .with_config("table", json!("sales"))
            .depends_on("clean")
            .with_retries(3, 250);

        assert_eq!(step.id, "load");
        assert_eq!(step.name, "load");
        assert_eq!(step.configuration.get("table"), Some(&json!("sales")));
        assert_eq!(step.depends_on, vec!["clean"]);
        assert_eq!(step.retry_interval(), Duration::from_millis(250));
        assert_eq!(step.error_handling.on_error, ErrorAction::StopWorkflow);
    }

    #[test]
    fn test_with_fallback_sets_action() {
        let step = WorkflowStep::new("primary", StepType::Extract).with_fallback("backup");
        assert_eq!(step.error_handling.on_error, ErrorAction::ExecuteFallback);
        assert_eq!(step.error_handling.fallback_step_id.as_deref(), Some("backup"));
    }

    #[test]
    fn test_definition_add_step_rejects_duplicates() {
        let mut definition = WorkflowDefinition::new("wf", "Workflow");
        let step = WorkflowStep::new("a", StepType::Extract);

        assert!(definition.add_step(step.clone()).is_ok());
        assert!(definition.add_step(step).is_err());
        assert_eq!(definition.len(), 1);
    }

    #[test]
    fn test_root_steps_and_dependents() {
        let definition = WorkflowDefinition::from_steps(
            "wf",
            vec![
                WorkflowStep::new("a", StepType::Extract),
                WorkflowStep::new("b", StepType::Transform).depends_on("a"),
                WorkflowStep::new("c", StepType::Load).depends_on("a"),
            ],
        );

        assert_eq!(definition.root_steps().len(), 1);
        assert_eq!(definition.dependents_of("a"), vec!["b", "c"]);
        assert!(definition.dependents_of("c").is_empty());
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let definition = WorkflowDefinition::new("wf", "");
        assert_eq!(definition.display_name(), "wf");

        let step = WorkflowStep::new("a", StepType::Custom).with_name("  ");
        assert_eq!(step.display_name(), "a");
    }

    #[test]
    fn test_yaml_parsing_with_defaults() {
        let yaml = r#"
id: sales
steps:
  - id: extract
    type: extract
  - id: enrich
    type: enrich
    depends_on: [extract]
    error_handling:
      on_error: execute_fallback
      fallback_step_id: extract
"#;
        let definition: WorkflowDefinition = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(definition.version, "");
        assert_eq!(definition.default_error_action, ErrorAction::StopWorkflow);
        assert_eq!(definition.steps[1].step_type, StepType::Enrich);
        assert_eq!(
            definition.steps[1].error_handling.on_error,
            ErrorAction::ExecuteFallback
        );
        assert_eq!(definition.steps[0].retry_count, 0);
    }

    #[test]
    fn test_step_type_display() {
        assert_eq!(StepType::Validate.to_string(), "validate");
        assert_eq!(StepType::ALL.len(), 7);
    }
}
