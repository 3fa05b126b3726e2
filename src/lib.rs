//! ETLRunner - Workflow Execution Engine for ETL Pipelines
//!
//! Drives multi-step extract/transform/load pipelines: dependency-aware
//! scheduling, per-step error policies (stop, continue, retry, skip,
//! fallback), checkpointing of every transition, and timeline reporting.
//!
//! # Architecture
//!
//! The library is organized into five modules:
//!
//! - [`workflow`]: Definitions, execution records and YAML loading
//! - [`execution`]: Scheduling loop, step executor and processor registry
//! - [`storage`]: Repository for definitions, executions and metrics
//! - [`monitoring`]: Execution timeline and notifications
//! - [`config`]: Engine configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use etlrunner::execution::{ProcessorRegistry, WorkflowExecutor};
//! use etlrunner::storage::{FileRepository, WorkflowRepository};
//! use etlrunner::workflow::TriggerType;
//! use etlrunner::load_definition;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load and store a definition
//!     let repository = Arc::new(FileRepository::open(".etlrunner")?);
//!     let definition = repository.save_definition(load_definition("orders.yaml")?)?;
//!
//!     // Run it
//!     let executor = WorkflowExecutor::new(ProcessorRegistry::dry_run(), repository);
//!     let execution = executor.execute(&definition, HashMap::new(), TriggerType::Manual);
//!
//!     println!("{}", execution.status);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod execution;
pub mod monitoring;
pub mod storage;
pub mod workflow;

// Re-export commonly used types
pub use config::EngineConfig;
pub use execution::{ProcessorRegistry, StepProcessor, WorkflowExecutor};
pub use storage::{FileRepository, InMemoryRepository, WorkflowRepository};
pub use workflow::model::{WorkflowDefinition, WorkflowStep};
pub use workflow::parser::load_definition;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "ETLRunner";
