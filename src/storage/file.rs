//! Directory-backed repository.
//!
//! Layout under the root directory:
//!
//! ```text
//! definitions/index.json            indexed columns of every version
//! definitions/<id>/<version>.json   definition documents, id and version hex-encoded
//! executions/index.json             indexed columns of every execution
//! executions/<uuid>.json            execution documents
//! ```
//!
//! Every write goes through to disk before returning. Documents are written
//! to a temporary file and renamed into place, and the catalog only takes a
//! change once its document and index are on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use serde::Serialize;
use uuid::Uuid;

use super::catalog::{Catalog, StoredDefinition, StoredExecution};
use super::{
    DefinitionSummary, ExecutionSummary, Page, Paged, RepositoryError, WorkflowMetrics,
    WorkflowRepository,
};
use crate::workflow::{ExecutionStatus, WorkflowDefinition, WorkflowExecution};

const INDEX_FILE: &str = "index.json";

/// Repository persisting JSON documents under a directory.
#[derive(Debug)]
pub struct FileRepository {
    root: PathBuf,
    catalog: Mutex<Catalog>,
}

impl FileRepository {
    /// Opens (or creates) a repository rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let root = root.into();
        fs::create_dir_all(root.join("definitions"))?;
        fs::create_dir_all(root.join("executions"))?;

        let mut catalog = Catalog::new();

        let definitions: Vec<DefinitionSummary> = read_index(&root.join("definitions"))?;
        for summary in definitions {
            let path = definition_path(&root, &summary.id, &summary.version);
            let document = fs::read_to_string(&path)?;
            catalog.restore_definition(StoredDefinition { summary, document });
        }

        let executions: Vec<ExecutionSummary> = read_index(&root.join("executions"))?;
        for summary in executions {
            let path = execution_path(&root, summary.id);
            let document = fs::read_to_string(&path)?;
            catalog.replace_execution(StoredExecution { summary, document });
        }

        info!(
            "Opened repository at {} ({} executions)",
            root.display(),
            catalog.execution_count()
        );

        Ok(Self {
            root,
            catalog: Mutex::new(catalog),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_definition_index(&self, catalog: &Catalog) -> Result<(), RepositoryError> {
        write_json(
            &self.root.join("definitions").join(INDEX_FILE),
            &catalog.definition_summaries_all(),
        )
    }

    fn write_execution_index(&self, catalog: &Catalog) -> Result<(), RepositoryError> {
        write_json(
            &self.root.join("executions").join(INDEX_FILE),
            &catalog.execution_summaries_all(),
        )
    }
}

/// File name component for an id; distinct ids never share a name.
fn encode_name(name: &str) -> String {
    hex::encode(name.as_bytes())
}

fn definition_path(root: &Path, id: &str, version: &str) -> PathBuf {
    root.join("definitions")
        .join(encode_name(id))
        .join(format!("{}.json", encode_name(version)))
}

fn execution_path(root: &Path, id: Uuid) -> PathBuf {
    root.join("executions").join(format!("{}.json", id))
}

fn read_index<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>, RepositoryError> {
    let path = dir.join(INDEX_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&content)?)
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), RepositoryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), RepositoryError> {
    let json = serde_json::to_string_pretty(value)?;
    write_atomic(path, &json)
}

impl WorkflowRepository for FileRepository {
    fn save_definition(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<WorkflowDefinition, RepositoryError> {
        let mut catalog = self.catalog();
        let (stored, staged) = catalog.stage_definition(definition)?;
        let Some(entry) = staged else {
            return Ok(stored);
        };

        let path = definition_path(&self.root, &stored.id, &stored.version);
        write_atomic(&path, &entry.document)?;
        catalog.restore_definition(entry);

        if let Err(e) = self.write_definition_index(&catalog) {
            catalog.remove_definition(&stored.id, Some(stored.version.as_str()));
            if let Err(cleanup) = fs::remove_file(&path) {
                warn!("Could not remove {}: {}", path.display(), cleanup);
            }
            return Err(e);
        }

        debug!("Stored definition '{}' version {}", stored.id, stored.version);
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
        let mut catalog = self.catalog();
        let removed = catalog.remove_definition(id, version);

        for version in &removed {
            let path = definition_path(&self.root, id, version);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }

        if !removed.is_empty() {
            self.write_definition_index(&catalog)?;
        }
        Ok(!removed.is_empty())
    }

    fn save_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let mut catalog = self.catalog();
        let Some(entry) = catalog.stage_execution(execution)? else {
            return Ok(());
        };

        write_atomic(&execution_path(&self.root, execution.id), &entry.document)?;
        let previous = catalog.replace_execution(entry);

        if let Err(e) = self.write_execution_index(&catalog) {
            match previous {
                Some(previous) => {
                    catalog.replace_execution(previous);
                }
                None => {
                    catalog.remove_execution(execution.id);
                }
            }
            return Err(e);
        }
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
    use tempfile::tempdir;

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition::from_steps(
            "nightly/orders",
            vec![WorkflowStep::new("extract", StepType::Extract)],
        )
    }

    #[test]
    fn test_encode_name_is_distinct() {
        assert_eq!(encode_name("1.4"), "312e34");
        assert_ne!(encode_name("etl/orders"), encode_name("etl_orders"));
        assert!(!encode_name("../escape").contains('/'));
    }

    #[test]
    fn test_similar_ids_keep_separate_documents() {
        let dir = tempdir().unwrap();
        {
            let repository = FileRepository::open(dir.path()).unwrap();
            repository
                .save_definition(WorkflowDefinition::from_steps(
                    "etl/orders",
                    vec![WorkflowStep::new("x", StepType::Extract)],
                ))
                .unwrap();
            repository
                .save_definition(WorkflowDefinition::from_steps(
                    "etl_orders",
                    vec![WorkflowStep::new("y", StepType::Extract)],
                ))
                .unwrap();
        }

        let reopened = FileRepository::open(dir.path()).unwrap();
        let slash = reopened.get_definition("etl/orders", None).unwrap().unwrap();
        let underscore = reopened.get_definition("etl_orders", None).unwrap().unwrap();

        assert_eq!(slash.id, "etl/orders");
        assert_eq!(slash.steps[0].id, "x");
        assert_eq!(underscore.id, "etl_orders");
        assert_eq!(underscore.steps[0].id, "y");
    }

    #[test]
    fn test_failed_definition_write_is_retried() {
        let dir = tempdir().unwrap();
        let repository = FileRepository::open(dir.path()).unwrap();

        // A plain file where the definition directory belongs
        let blocker = dir.path().join("definitions").join(encode_name("nightly/orders"));
        fs::write(&blocker, "").unwrap();

        assert!(repository.save_definition(definition()).is_err());
        assert!(repository.list_versions("nightly/orders").unwrap().is_empty());

        fs::remove_file(&blocker).unwrap();
        let stored = repository.save_definition(definition()).unwrap();
        assert_eq!(stored.version, "1.0");
        assert!(definition_path(dir.path(), &stored.id, &stored.version).exists());

        let reopened = FileRepository::open(dir.path()).unwrap();
        assert!(reopened.get_definition("nightly/orders", None).unwrap().is_some());
    }

    #[test]
    fn test_failed_execution_write_is_retried() {
        let dir = tempdir().unwrap();
        let repository = FileRepository::open(dir.path()).unwrap();
        let execution = WorkflowExecution::new(&definition(), TriggerType::Manual);

        // A directory where the temporary document would be written
        let blocker = dir
            .path()
            .join("executions")
            .join(format!("{}.json.tmp", execution.id));
        fs::create_dir(&blocker).unwrap();

        assert!(repository.save_execution(&execution).is_err());
        assert!(repository.get_execution(execution.id).unwrap().is_none());

        fs::remove_dir(&blocker).unwrap();
        repository.save_execution(&execution).unwrap();

        let reopened = FileRepository::open(dir.path()).unwrap();
        assert_eq!(reopened.get_execution(execution.id).unwrap(), Some(execution));
    }

    #[test]
    fn test_open_creates_layout() {
        let dir = tempdir().unwrap();
        let repository = FileRepository::open(dir.path().join("store")).unwrap();

        assert!(repository.root().join("definitions").is_dir());
        assert!(repository.root().join("executions").is_dir());
    }

    #[test]
    fn test_definitions_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let repository = FileRepository::open(dir.path()).unwrap();
            repository.save_definition(definition()).unwrap();
            let mut second = definition();
            second.description = "second".to_string();
            repository.save_definition(second).unwrap();
        }

        let reopened = FileRepository::open(dir.path()).unwrap();
        assert_eq!(
            reopened.list_versions("nightly/orders").unwrap(),
            vec!["1.0", "1.1"]
        );
        let latest = reopened.get_definition("nightly/orders", None).unwrap().unwrap();
        assert_eq!(latest.description, "second");
    }

    #[test]
    fn test_executions_survive_reopen() {
        let dir = tempdir().unwrap();
        let mut execution = WorkflowExecution::new(&definition(), TriggerType::Manual);
        execution.status = ExecutionStatus::Paused;
        {
            let repository = FileRepository::open(dir.path()).unwrap();
            repository.save_execution(&execution).unwrap();
            repository.save_execution(&execution).unwrap();
        }

        assert!(dir
            .path()
            .join("executions")
            .join(format!("{}.json", execution.id))
            .exists());

        let reopened = FileRepository::open(dir.path()).unwrap();
        let loaded = reopened.get_execution(execution.id).unwrap().unwrap();
        assert_eq!(loaded, execution);

        let summaries = reopened.execution_summaries(None, Page::default()).unwrap();
        assert_eq!(summaries.total, 1);
        assert_eq!(summaries.items[0].status, ExecutionStatus::Paused);
    }

    #[test]
    fn test_delete_removes_files() {
        let dir = tempdir().unwrap();
        let repository = FileRepository::open(dir.path()).unwrap();
        let stored = repository.save_definition(definition()).unwrap();
        let path = definition_path(dir.path(), &stored.id, &stored.version);
        assert!(path.exists());

        assert!(repository.delete_definition("nightly/orders", None).unwrap());
        assert!(!path.exists());

        let reopened = FileRepository::open(dir.path()).unwrap();
        assert!(reopened.list_definitions().unwrap().is_empty());
    }
}
