//! In-memory catalog shared by the repository implementations: indexed
//! summaries next to the raw JSON document of each definition version and
//! execution.

use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use super::metrics::{compute_metrics, WorkflowMetrics};
use super::version::{compare_versions, latest_version, next_minor_version};
use super::{DefinitionSummary, ExecutionSummary, Page, Paged, RepositoryError};
use crate::workflow::{ExecutionStatus, WorkflowDefinition, WorkflowExecution};

#[derive(Debug, Clone)]
pub(crate) struct StoredDefinition {
    pub summary: DefinitionSummary,
    pub document: String,
}

#[derive(Debug, Clone)]
pub(crate) struct StoredExecution {
    pub summary: ExecutionSummary,
    pub document: String,
}

/// Outcome of a write, so write-through stores know whether to touch disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Write {
    Unchanged,
    Stored,
}

#[derive(Debug, Default)]
pub(crate) struct Catalog {
    /// Definition id to its versions, unordered
    definitions: BTreeMap<String, Vec<StoredDefinition>>,
    executions: HashMap<Uuid, StoredExecution>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore_definition(&mut self, stored: StoredDefinition) {
        let versions = self
            .definitions
            .entry(stored.summary.id.clone())
            .or_default();
        versions.retain(|v| v.summary.version != stored.summary.version);
        versions.push(stored);
    }

    fn latest_stored(&self, id: &str) -> Option<&StoredDefinition> {
        let versions = self.definitions.get(id)?;
        let latest = latest_version(versions.iter().map(|v| v.summary.version.as_str()))?;
        versions.iter().find(|v| v.summary.version == latest)
    }

    /// Assigns a version if needed and stores the definition.
    pub fn insert_definition(
        &mut self,
        definition: WorkflowDefinition,
    ) -> Result<(WorkflowDefinition, Write), RepositoryError> {
        let (definition, staged) = self.stage_definition(definition)?;
        match staged {
            Some(entry) => {
                self.restore_definition(entry);
                Ok((definition, Write::Stored))
            }
            None => Ok((definition, Write::Unchanged)),
        }
    }

    /// Assigns a version if needed and checks the definition can be stored,
    /// without storing it. `None` means the identical version already exists.
    pub fn stage_definition(
        &self,
        mut definition: WorkflowDefinition,
    ) -> Result<(WorkflowDefinition, Option<StoredDefinition>), RepositoryError> {
        let latest = self.latest_stored(&definition.id).map(|v| v.summary.version.clone());

        if definition.version.trim().is_empty() {
            definition.version = next_minor_version(latest.as_deref());
        }

        let document = serde_json::to_string(&definition)?;

        if let Some(existing) = self.find_definition(&definition.id, &definition.version) {
            if existing.document == document {
                return Ok((definition, None));
            }
            return Err(RepositoryError::VersionExists {
                id: definition.id,
                version: definition.version,
            });
        }

        if let Some(latest) = latest {
            if compare_versions(&definition.version, &latest).is_le() {
                return Err(RepositoryError::StaleVersion {
                    id: definition.id,
                    version: definition.version,
                    latest,
                });
            }
        }

        let entry = StoredDefinition {
            summary: DefinitionSummary::of(&definition),
            document,
        };
        Ok((definition, Some(entry)))
    }

    fn find_definition(&self, id: &str, version: &str) -> Option<&StoredDefinition> {
        self.definitions
            .get(id)?
            .iter()
            .find(|v| v.summary.version == version)
    }

    pub fn definition(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let stored = match version {
            Some(version) => self.find_definition(id, version),
            None => self.latest_stored(id),
        };

        stored
            .map(|s| serde_json::from_str(&s.document))
            .transpose()
            .map_err(RepositoryError::from)
    }

    pub fn definition_summaries(&self) -> Vec<DefinitionSummary> {
        self.definitions
            .keys()
            .filter_map(|id| self.latest_stored(id))
            .map(|s| s.summary.clone())
            .collect()
    }

    /// Summaries of every stored version of every definition.
    pub fn definition_summaries_all(&self) -> Vec<DefinitionSummary> {
        self.definitions
            .values()
            .flatten()
            .map(|s| s.summary.clone())
            .collect()
    }

    pub fn versions(&self, id: &str) -> Vec<String> {
        let mut versions: Vec<String> = self
            .definitions
            .get(id)
            .map(|v| v.iter().map(|s| s.summary.version.clone()).collect())
            .unwrap_or_default();
        versions.sort_by(|a, b| compare_versions(a, b));
        versions
    }

    /// Removes one version or all of them; returns the removed versions.
    pub fn remove_definition(&mut self, id: &str, version: Option<&str>) -> Vec<String> {
        let Some(versions) = self.definitions.get_mut(id) else {
            return Vec::new();
        };

        let removed: Vec<String> = versions
            .iter()
            .filter(|v| version.map_or(true, |wanted| v.summary.version == wanted))
            .map(|v| v.summary.version.clone())
            .collect();

        versions.retain(|v| !removed.contains(&v.summary.version));
        if versions.is_empty() {
            self.definitions.remove(id);
        }
        removed
    }

    /// Upserts an execution by id.
    pub fn upsert_execution(
        &mut self,
        execution: &WorkflowExecution,
    ) -> Result<Write, RepositoryError> {
        match self.stage_execution(execution)? {
            Some(entry) => {
                self.replace_execution(entry);
                Ok(Write::Stored)
            }
            None => Ok(Write::Unchanged),
        }
    }

    /// Serializes an execution; `None` when the stored copy is identical.
    pub fn stage_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<Option<StoredExecution>, RepositoryError> {
        let document = serde_json::to_string(execution)?;

        if let Some(existing) = self.executions.get(&execution.id) {
            if existing.document == document {
                return Ok(None);
            }
        }

        Ok(Some(StoredExecution {
            summary: ExecutionSummary::of(execution),
            document,
        }))
    }

    /// Stores an execution, returning the entry it replaced.
    pub fn replace_execution(&mut self, stored: StoredExecution) -> Option<StoredExecution> {
        self.executions.insert(stored.summary.id, stored)
    }

    pub fn remove_execution(&mut self, id: Uuid) -> Option<StoredExecution> {
        self.executions.remove(&id)
    }

    pub fn execution(&self, id: Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        self.executions
            .get(&id)
            .map(|s| serde_json::from_str(&s.document))
            .transpose()
            .map_err(RepositoryError::from)
    }

    pub fn execution_count(&self) -> usize {
        self.executions.len()
    }

    pub fn execution_summaries_all(&self) -> Vec<ExecutionSummary> {
        self.executions.values().map(|s| s.summary.clone()).collect()
    }

    /// Summaries sorted newest first; runs that never started sort last.
    fn sorted_summaries<'a>(
        &'a self,
        filter: impl Fn(&ExecutionSummary) -> bool,
    ) -> Vec<&'a StoredExecution> {
        let mut matches: Vec<&StoredExecution> = self
            .executions
            .values()
            .filter(|s| filter(&s.summary))
            .collect();
        matches.sort_by(|a, b| {
            b.summary
                .start_time
                .cmp(&a.summary.start_time)
                .then_with(|| a.summary.id.cmp(&b.summary.id))
        });
        matches
    }

    pub fn history(
        &self,
        workflow_id: &str,
        page: Page,
    ) -> Result<Paged<WorkflowExecution>, RepositoryError> {
        let matches = self.sorted_summaries(|s| s.workflow_id == workflow_id);
        let total = matches.len();

        let items = matches
            .into_iter()
            .skip(page.offset())
            .take(page.size)
            .map(|s| serde_json::from_str(&s.document))
            .collect::<Result<Vec<WorkflowExecution>, _>>()?;

        Ok(Paged {
            items,
            total,
            page: page.number,
            page_size: page.size,
        })
    }

    pub fn summaries(&self, status: Option<ExecutionStatus>, page: Page) -> Paged<ExecutionSummary> {
        let matches: Vec<ExecutionSummary> = self
            .sorted_summaries(|s| status.map_or(true, |wanted| s.status == wanted))
            .into_iter()
            .map(|s| s.summary.clone())
            .collect();
        Paged::from_vec(matches, page)
    }

    pub fn metrics(&self, workflow_id: &str) -> Result<WorkflowMetrics, RepositoryError> {
        let executions = self
            .executions
            .values()
            .filter(|s| s.summary.workflow_id == workflow_id)
            .map(|s| serde_json::from_str(&s.document))
            .collect::<Result<Vec<WorkflowExecution>, _>>()?;
        Ok(compute_metrics(workflow_id, &executions))
    }
}
