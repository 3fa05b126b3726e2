//! Step Processors
//!
//! A processor is the opaque unit of work behind a step type. The engine
//! never looks inside one: it hands over the step and the run context and
//! gets back a [`StepOutput`] or a [`ProcessorError`].

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use log::info;
use serde_json::Value;

use crate::workflow::{StepOutput, StepType, WorkflowContext, WorkflowDefinition, WorkflowStep};

type BoxError = Box<dyn Error + Send + Sync>;

/// Failure reported by a processor.
///
/// Every variant is a step failure handled by the step's error policy.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("Missing required input '{0}'")]
    MissingInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("{message}")]
    Execution {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Processing was cancelled")]
    Cancelled,
}

impl ProcessorError {
    pub fn execution(message: impl Into<String>) -> Self {
        ProcessorError::Execution {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an underlying error, keeping it as the source.
    pub fn caused_by(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        ProcessorError::Execution {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Stable name recorded as the error type.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessorError::MissingInput(_) => "missing_input",
            ProcessorError::InvalidConfiguration(_) => "invalid_configuration",
            ProcessorError::Execution { .. } => "execution",
            ProcessorError::Cancelled => "cancelled",
        }
    }
}

/// Handler for one step type.
pub trait StepProcessor: Send + Sync {
    fn process_step(
        &self,
        step: &WorkflowStep,
        context: &mut WorkflowContext,
    ) -> Result<StepOutput, ProcessorError>;

    /// Checks the step's configuration before it runs.
    fn validate_configuration(&self, _step: &WorkflowStep) -> bool {
        true
    }
}

impl<F> StepProcessor for F
where
    F: Fn(&WorkflowStep, &mut WorkflowContext) -> Result<StepOutput, ProcessorError> + Send + Sync,
{
    fn process_step(
        &self,
        step: &WorkflowStep,
        context: &mut WorkflowContext,
    ) -> Result<StepOutput, ProcessorError> {
        self(step, context)
    }
}

/// Decides whether a step's conditions hold.
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, condition: &str, context: &WorkflowContext) -> bool;
}

impl<F> ConditionEvaluator for F
where
    F: Fn(&str, &WorkflowContext) -> bool + Send + Sync,
{
    fn evaluate(&self, condition: &str, context: &WorkflowContext) -> bool {
        self(condition, context)
    }
}

/// Startup-time map from step type to its processor.
///
/// # Example
///
/// ```
/// use etlrunner::execution::{DryRunProcessor, ProcessorRegistry};
/// use etlrunner::workflow::StepType;
///
/// let registry = ProcessorRegistry::new()
///     .with(StepType::Extract, DryRunProcessor)
///     .with(StepType::Load, DryRunProcessor);
///
/// assert!(registry.get(StepType::Extract).is_some());
/// assert!(registry.get(StepType::Branch).is_none());
/// ```
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<StepType, Arc<dyn StepProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with [`DryRunProcessor`] behind every step type.
    pub fn dry_run() -> Self {
        let shared: Arc<dyn StepProcessor> = Arc::new(DryRunProcessor);
        let mut registry = Self::new();
        for step_type in StepType::ALL {
            registry.processors.insert(step_type, Arc::clone(&shared));
        }
        registry
    }

    /// Registers `processor` for `step_type`, replacing any previous one.
    pub fn register(&mut self, step_type: StepType, processor: impl StepProcessor + 'static) {
        self.processors.insert(step_type, Arc::new(processor));
    }

    pub fn with(mut self, step_type: StepType, processor: impl StepProcessor + 'static) -> Self {
        self.register(step_type, processor);
        self
    }

    pub fn get(&self, step_type: StepType) -> Option<&dyn StepProcessor> {
        self.processors.get(&step_type).map(|p| p.as_ref())
    }

    pub fn contains(&self, step_type: StepType) -> bool {
        self.processors.contains_key(&step_type)
    }

    /// Reports steps without a processor and steps whose processor rejects
    /// their configuration.
    pub fn validate_definition(&self, definition: &WorkflowDefinition) -> Vec<String> {
        let mut problems = Vec::new();

        for step in &definition.steps {
            match self.get(step.step_type) {
                None => problems.push(format!(
                    "Step '{}': no processor registered for type '{}'",
                    step.id, step.step_type
                )),
                Some(processor) if !processor.validate_configuration(step) => problems.push(
                    format!("Step '{}': configuration rejected by processor", step.id),
                ),
                Some(_) => {}
            }
        }

        problems
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<String> = self.processors.keys().map(|t| t.to_string()).collect();
        types.sort();
        f.debug_struct("ProcessorRegistry")
            .field("types", &types)
            .finish()
    }
}

/// Processor that performs no work.
///
/// Logs the step and hands back its dependencies' records merged, so a
/// definition can be walked end to end without touching any data source.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunProcessor;

impl StepProcessor for DryRunProcessor {
    fn process_step(
        &self,
        step: &WorkflowStep,
        context: &mut WorkflowContext,
    ) -> Result<StepOutput, ProcessorError> {
        info!("[DRY RUN] {} step '{}'", step.step_type, step.display_name());

        let records: Vec<_> = step
            .depends_on
            .iter()
            .filter_map(|dep| context.output(dep))
            .filter_map(StepOutput::records)
            .flatten()
            .cloned()
            .collect();

        if step.step_type == StepType::Branch {
            let selected = step
                .configuration
                .get("default")
                .and_then(Value::as_str)
                .unwrap_or("default")
                .to_string();
            return Ok(StepOutput::Branch { selected });
        }

        if records.is_empty() {
            Ok(StepOutput::Empty)
        } else {
            Ok(StepOutput::Records(records))
        }
    }
}
