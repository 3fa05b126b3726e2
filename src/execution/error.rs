use crate::storage::RepositoryError;
use crate::workflow::{StepType, ValidationError};

/// Signals that unwind the scheduling loop.
///
/// `StepFailed` carries a failure already recorded by the step executor.
/// Every other variant is recorded as a workflow-level error when the run
/// ends. None of them escape [`WorkflowExecutor::run`].
///
/// [`WorkflowExecutor::run`]: super::WorkflowExecutor::run
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Step '{step_id}' failed: {message}")]
    StepFailed { step_id: String, message: String },

    #[error("No processor registered for step type '{step_type}' (step '{step_id}')")]
    ProcessorNotRegistered { step_id: String, step_type: StepType },

    #[error("Fallback step '{fallback_step_id}' for step '{step_id}' does not exist")]
    FallbackNotFound {
        step_id: String,
        fallback_step_id: String,
    },

    #[error("Step '{step_id}' uses ExecuteFallback without naming a fallback step")]
    InvalidFallback { step_id: String },

    #[error("Step '{0}' has no execution record")]
    UnknownStep(String),

    #[error("Invalid workflow definition: {}", describe(.0))]
    InvalidDefinition(Vec<ValidationError>),

    #[error("Checkpoint failed: {0}")]
    Repository(#[from] RepositoryError),
}

fn describe(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl EngineError {
    /// Step the error is attributed to, if any.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            EngineError::StepFailed { step_id, .. }
            | EngineError::ProcessorNotRegistered { step_id, .. }
            | EngineError::FallbackNotFound { step_id, .. }
            | EngineError::InvalidFallback { step_id } => Some(step_id),
            EngineError::UnknownStep(step_id) => Some(step_id),
            EngineError::InvalidDefinition(_) | EngineError::Repository(_) => None,
        }
    }

    /// Stable name recorded as the error type.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::StepFailed { .. } => "step_failed",
            EngineError::ProcessorNotRegistered { .. } => "processor_not_registered",
            EngineError::FallbackNotFound { .. } => "fallback_not_found",
            EngineError::InvalidFallback { .. } => "invalid_fallback",
            EngineError::UnknownStep(_) => "unknown_step",
            EngineError::InvalidDefinition(_) => "invalid_definition",
            EngineError::Repository(_) => "repository",
        }
    }
}
