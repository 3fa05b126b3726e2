//! Workflow Definition Module
//!
//! Data structures for workflow definitions and the records a run produces.
//!
//! # Structure
//!
//! - [`model`]: Definitions and steps
//! - [`state`]: Execution and step execution records
//! - [`context`]: Per-run context and step outputs
//! - [`planner`]: Dependency readiness checks
//! - [`parser`]: YAML loading
//! - [`validator`]: Structural validation

pub mod context;
pub mod model;
pub mod parser;
pub mod planner;
pub mod state;
pub mod validator;

pub use context::{Record, StepOutput, ValidationReport, WorkflowContext};
pub use model::{ErrorAction, ErrorHandling, StepType, WorkflowDefinition, WorkflowStep};
pub use parser::{load_definition, parse_definition, DefinitionError};
pub use planner::{is_ready, ready_steps};
pub use state::{
    ExecutionStatus, StatusMap, StepExecution, StepStatus, TriggerType, WorkflowExecution,
    WorkflowExecutionError,
};
pub use validator::{quick_validate, validate_definition, ValidationError};
