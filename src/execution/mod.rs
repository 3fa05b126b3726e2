//! Workflow Execution Module
//!
//! Drives runs of a workflow definition: dependency-aware scheduling,
//! step-level error policies, checkpointing and pause/cancel control.
//!
//! # Architecture
//!
//! - [`engine`]: Scheduling loop orchestrating a whole run
//! - [`step`]: Execution of a single step and its error policy
//! - [`processor`]: Processor contract and type-keyed registry
//! - [`control`]: Pause, resume and cancel signals

pub mod control;
pub mod engine;
mod error;
pub mod processor;
pub mod step;

#[cfg(test)]
pub(crate) mod testing;

pub use control::ExecutionControl;
pub use engine::WorkflowExecutor;
pub use error::EngineError;
pub use processor::{
    ConditionEvaluator, DryRunProcessor, ProcessorError, ProcessorRegistry, StepProcessor,
};
pub use step::StepExecutor;
