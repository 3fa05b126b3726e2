//! Process-local repository.

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;
use uuid::Uuid;

use super::catalog::{Catalog, Write};
use super::{
    DefinitionSummary, ExecutionSummary, Page, Paged, RepositoryError, WorkflowMetrics,
    WorkflowRepository,
};
use crate::workflow::{ExecutionStatus, WorkflowDefinition, WorkflowExecution};

/// Repository that keeps every document in memory.
///
/// # Example
///
/// ```
/// use etlrunner::storage::{InMemoryRepository, WorkflowRepository};
/// use etlrunner::workflow::{StepType, WorkflowDefinition, WorkflowStep};
///
/// let repository = InMemoryRepository::new();
/// let definition = WorkflowDefinition::from_steps(
///     "orders",
///     vec![WorkflowStep::new("extract", StepType::Extract)],
/// );
///
/// let stored = repository.save_definition(definition.clone()).unwrap();
/// assert_eq!(stored.version, "1.0");
/// let next = repository.save_definition(definition).unwrap();
/// assert_eq!(next.version, "1.1");
/// ```
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    catalog: Mutex<Catalog>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            catalog: Mutex::new(Catalog::new()),
        }
    }

    /// Number of distinct executions stored.
    pub fn execution_count(&self) -> usize {
        self.catalog().execution_count()
    }

    fn catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WorkflowRepository for InMemoryRepository {
    fn save_definition(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<WorkflowDefinition, RepositoryError> {
        let (stored, write) = self.catalog().insert_definition(definition)?;
        if write == Write::Stored {
            debug!("Stored definition '{}' version {}", stored.id, stored.version);
        }
        Ok(stored)
    }

    fn get_definition(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        self.catalog().definition(id, version)
    }

    fn list_definitions(&self) -> Result<Vec<DefinitionSummary>, RepositoryError> {
        Ok(self.catalog().definition_summaries())
    }

    fn list_versions(&self, id: &str) -> Result<Vec<String>, RepositoryError> {
        Ok(self.catalog().versions(id))
    }

    fn delete_definition(&self, id: &str, version: Option<&str>) -> Result<bool, RepositoryError> {
        Ok(!self.catalog().remove_definition(id, version).is_empty())
    }

    fn save_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        self.catalog().upsert_execution(execution)?;
        Ok(())
    }

    fn get_execution(&self, id: Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        self.catalog().execution(id)
    }

    fn execution_history(
        &self,
        workflow_id: &str,
        page: Page,
    ) -> Result<Paged<WorkflowExecution>, RepositoryError> {
        self.catalog().history(workflow_id, page)
    }

    fn workflow_metrics(&self, workflow_id: &str) -> Result<WorkflowMetrics, RepositoryError> {
        self.catalog().metrics(workflow_id)
    }

    fn execution_summaries(
        &self,
        status: Option<ExecutionStatus>,
        page: Page,
    ) -> Result<Paged<ExecutionSummary>, RepositoryError> {
        Ok(self.catalog().summaries(status, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{StepType, TriggerType, WorkflowStep};
    use chrono::{Duration, Utc};

    fn definition(id: &str) -> WorkflowDefinition {
        WorkflowDefinition::from_steps(id, vec![WorkflowStep::new("extract", StepType::Extract)])
    }

    fn execution_started(workflow: &WorkflowDefinition, minutes_ago: i64) -> WorkflowExecution {
        let mut execution = WorkflowExecution::new(workflow, TriggerType::Scheduled);
        execution.start_time = Some(Utc::now() - Duration::minutes(minutes_ago));
        execution
    }

    #[test]
    fn test_version_auto_increment() {
        let repository = InMemoryRepository::new();

        let first = repository.save_definition(definition("wf")).unwrap();
        let mut changed = definition("wf");
        changed.description = "second".to_string();
        let second = repository.save_definition(changed).unwrap();

        assert_eq!(first.version, "1.0");
        assert_eq!(second.version, "1.1");
        assert_eq!(repository.list_versions("wf").unwrap(), vec!["1.0", "1.1"]);
    }

    #[test]
    fn test_latest_wins_lookup() {
        let repository = InMemoryRepository::new();
        repository
            .save_definition(definition("wf").with_version("1.9"))
            .unwrap();
        let mut newer = definition("wf").with_version("1.10");
        newer.description = "newer".to_string();
        repository.save_definition(newer).unwrap();

        let latest = repository.get_definition("wf", None).unwrap().unwrap();
        assert_eq!(latest.version, "1.10");

        let pinned = repository.get_definition("wf", Some("1.9")).unwrap().unwrap();
        assert_eq!(pinned.description, "");

        assert!(repository.get_definition("wf", Some("7.0")).unwrap().is_none());
        assert!(repository.get_definition("other", None).unwrap().is_none());
    }

    #[test]
    fn test_definition_immutable_per_version() {
        let repository = InMemoryRepository::new();
        repository
            .save_definition(definition("wf").with_version("2.0"))
            .unwrap();

        // Identical content is accepted as a no-op.
        assert!(repository
            .save_definition(definition("wf").with_version("2.0"))
            .is_ok());

        let mut changed = definition("wf").with_version("2.0");
        changed.name = "renamed".to_string();
        assert!(matches!(
            repository.save_definition(changed),
            Err(RepositoryError::VersionExists { .. })
        ));
    }

    #[test]
    fn test_stale_version_rejected() {
        let repository = InMemoryRepository::new();
        repository
            .save_definition(definition("wf").with_version("2.0"))
            .unwrap();

        assert!(matches!(
            repository.save_definition(definition("wf").with_version("1.5")),
            Err(RepositoryError::StaleVersion { .. })
        ));
    }

    #[test]
    fn test_list_and_delete_definitions() {
        let repository = InMemoryRepository::new();
        repository.save_definition(definition("a")).unwrap();
        let mut a2 = definition("a");
        a2.description = "v2".to_string();
        repository.save_definition(a2).unwrap();
        repository.save_definition(definition("b")).unwrap();

        let listed = repository.list_definitions().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "a");
        assert_eq!(listed[0].version, "1.1");

        assert!(repository.delete_definition("a", Some("1.1")).unwrap());
        assert_eq!(
            repository.get_definition("a", None).unwrap().unwrap().version,
            "1.0"
        );

        assert!(repository.delete_definition("a", None).unwrap());
        assert!(!repository.delete_definition("a", None).unwrap());
        assert_eq!(repository.list_definitions().unwrap().len(), 1);
    }

    #[test]
    fn test_checkpoint_is_idempotent() {
        let repository = InMemoryRepository::new();
        let mut execution = execution_started(&definition("wf"), 0);

        repository.save_execution(&execution).unwrap();
        repository.save_execution(&execution).unwrap();
        assert_eq!(repository.execution_count(), 1);

        execution.status = ExecutionStatus::Running;
        repository.save_execution(&execution).unwrap();
        assert_eq!(repository.execution_count(), 1);

        let loaded = repository.get_execution(execution.id).unwrap().unwrap();
        assert_eq!(loaded, execution);
    }

    #[test]
    fn test_history_newest_first_and_paged() {
        let repository = InMemoryRepository::new();
        let wf = definition("wf");
        let other = definition("other");

        let oldest = execution_started(&wf, 30);
        let middle = execution_started(&wf, 20);
        let newest = execution_started(&wf, 10);
        for execution in [&middle, &oldest, &newest, &execution_started(&other, 5)] {
            repository.save_execution(execution).unwrap();
        }

        let first = repository.execution_history("wf", Page::new(0, 2)).unwrap();
        assert_eq!(first.total, 3);
        assert_eq!(first.items[0].id, newest.id);
        assert_eq!(first.items[1].id, middle.id);
        assert!(first.has_more());

        let second = repository.execution_history("wf", Page::new(1, 2)).unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].id, oldest.id);
    }

    #[test]
    fn test_summaries_filter_by_status() {
        let repository = InMemoryRepository::new();
        let wf = definition("wf");

        let mut failed = execution_started(&wf, 5);
        failed.status = ExecutionStatus::Failed;
        let mut completed = execution_started(&wf, 3);
        completed.status = ExecutionStatus::Completed;
        repository.save_execution(&failed).unwrap();
        repository.save_execution(&completed).unwrap();

        let all = repository.execution_summaries(None, Page::default()).unwrap();
        assert_eq!(all.total, 2);

        let only_failed = repository
            .execution_summaries(Some(ExecutionStatus::Failed), Page::default())
            .unwrap();
        assert_eq!(only_failed.total, 1);
        assert_eq!(only_failed.items[0].id, failed.id);
    }

    #[test]
    fn test_metrics_from_stored_runs() {
        let repository = InMemoryRepository::new();
        let wf = definition("wf");

        let mut run = execution_started(&wf, 1);
        run.status = ExecutionStatus::Completed;
        run.end_time = run.start_time.map(|s| s + Duration::milliseconds(500));
        repository.save_execution(&run).unwrap();

        let metrics = repository.workflow_metrics("wf").unwrap();
        assert_eq!(metrics.total_executions, 1);
        assert_eq!(metrics.count(ExecutionStatus::Completed), 1);
        assert_eq!(metrics.avg_duration_ms, Some(500.0));

        let empty = repository.workflow_metrics("nothing").unwrap();
        assert_eq!(empty.total_executions, 0);
    }
}
