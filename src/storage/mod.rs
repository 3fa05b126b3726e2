//! Workflow Repository
//!
//! Durable store for definitions, execution records and the metrics derived
//! from them. Documents are kept whole as JSON blobs next to a few indexed
//! columns, so listing and filtering never parse a full document.
//!
//! # Components
//!
//! - [`WorkflowRepository`]: the contract the executor checkpoints through
//! - [`InMemoryRepository`]: process-local store, used by tests and embedders
//! - [`FileRepository`]: the same catalog written through to a directory
//! - [`metrics`]: per-workflow aggregation over stored executions

mod catalog;
pub mod file;
pub mod memory;
pub mod metrics;
pub mod version;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::{ExecutionStatus, TriggerType, WorkflowDefinition, WorkflowExecution};

pub use file::FileRepository;
pub use memory::InMemoryRepository;
pub use metrics::{ErrorSignature, WorkflowMetrics};

/// Errors raised by repository implementations.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Definition '{id}' version {version} already exists with different content")]
    VersionExists { id: String, version: String },

    #[error("Definition '{id}' version {version} is not newer than the latest version {latest}")]
    StaleVersion {
        id: String,
        version: String,
        latest: String,
    },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Zero-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

impl Page {
    pub const DEFAULT_SIZE: usize = 20;

    /// Creates a page request; a zero size is bumped to one.
    pub fn new(number: usize, size: usize) -> Self {
        Self {
            number,
            size: size.max(1),
        }
    }

    pub fn first(size: usize) -> Self {
        Self::new(0, size)
    }

    pub fn offset(&self) -> usize {
        self.number.saturating_mul(self.size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::first(Self::DEFAULT_SIZE)
    }
}

/// One page of results plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

impl<T> Paged<T> {
    /// Slices `all` according to `page`.
    pub fn from_vec(all: Vec<T>, page: Page) -> Self {
        let total = all.len();
        let items = all.into_iter().skip(page.offset()).take(page.size).collect();
        Self {
            items,
            total,
            page: page.number,
            page_size: page.size,
        }
    }

    /// Returns true if more results follow this page.
    pub fn has_more(&self) -> bool {
        (self.page + 1).saturating_mul(self.page_size) < self.total
    }
}

/// Indexed columns kept for every stored definition version.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DefinitionSummary {
    pub id: String,
    pub version: String,
    pub name: String,
    pub step_count: usize,
    pub saved_at: DateTime<Utc>,
}

impl DefinitionSummary {
    pub(crate) fn of(definition: &WorkflowDefinition) -> Self {
        Self {
            id: definition.id.clone(),
            version: definition.version.clone(),
            name: definition.name.clone(),
            step_count: definition.steps.len(),
            saved_at: Utc::now(),
        }
    }
}

/// Indexed columns kept for every stored execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecutionSummary {
    pub id: Uuid,
    pub workflow_id: String,
    pub workflow_version: String,
    pub status: ExecutionStatus,
    pub trigger_type: TriggerType,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_count: usize,
}

impl ExecutionSummary {
    pub(crate) fn of(execution: &WorkflowExecution) -> Self {
        Self {
            id: execution.id,
            workflow_id: execution.workflow_id.clone(),
            workflow_version: execution.workflow_version.clone(),
            status: execution.status,
            trigger_type: execution.trigger_type,
            start_time: execution.start_time,
            end_time: execution.end_time,
            error_count: execution.errors.len(),
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Durable store for definitions, executions and derived metrics.
///
/// `save_execution` is an upsert by id: checkpointing the same execution
/// repeatedly never creates a second record.
pub trait WorkflowRepository: Send + Sync {
    /// Stores a definition version and returns it as stored.
    ///
    /// An empty `version` is assigned by bumping the latest minor version.
    /// Re-saving an identical `(id, version)` is a no-op; changing its
    /// content is rejected.
    fn save_definition(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<WorkflowDefinition, RepositoryError>;

    /// Fetches a definition; `None` as version means the latest one.
    fn get_definition(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError>;

    /// Latest version of every stored definition.
    fn list_definitions(&self) -> Result<Vec<DefinitionSummary>, RepositoryError>;

    /// All stored versions of a definition, oldest first.
    fn list_versions(&self, id: &str) -> Result<Vec<String>, RepositoryError>;

    /// Deletes one version, or every version when `version` is `None`.
    fn delete_definition(&self, id: &str, version: Option<&str>) -> Result<bool, RepositoryError>;

    fn save_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError>;

    fn get_execution(&self, id: Uuid) -> Result<Option<WorkflowExecution>, RepositoryError>;

    /// Executions of one workflow, newest first.
    fn execution_history(
        &self,
        workflow_id: &str,
        page: Page,
    ) -> Result<Paged<WorkflowExecution>, RepositoryError>;

    fn workflow_metrics(&self, workflow_id: &str) -> Result<WorkflowMetrics, RepositoryError>;

    /// Execution summaries across all workflows, newest first.
    fn execution_summaries(
        &self,
        status: Option<ExecutionStatus>,
        page: Page,
    ) -> Result<Paged<ExecutionSummary>, RepositoryError>;
}
