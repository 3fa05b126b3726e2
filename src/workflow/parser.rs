//! Definition Parser
//!
//! Loads workflow definitions from YAML and validates them before they reach
//! the repository or the executor.

use std::fs;
use std::path::Path;

use log::{debug, info};

use super::model::WorkflowDefinition;
use super::validator::{validate_definition, ValidationError};

/// Errors raised while loading a definition file.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("Failed to read workflow file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse workflow YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid workflow:\n{}", format_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses and validates a definition from YAML text.
///
/// Steps without a name are named after their id.
pub fn parse_definition(yaml: &str) -> Result<WorkflowDefinition, DefinitionError> {
    let mut definition: WorkflowDefinition = serde_yaml::from_str(yaml)?;

    for step in &mut definition.steps {
        step.id = step.id.trim().to_string();
        if step.name.trim().is_empty() {
            step.name = step.id.clone();
        }
    }

    validate_definition(&definition).map_err(DefinitionError::Invalid)?;
    Ok(definition)
}

/// Loads a workflow definition from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use etlrunner::workflow::load_definition;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let definition = load_definition("pipeline.yaml")?;
///     println!("Loaded {} steps", definition.steps.len());
///     Ok(())
/// }
/// ```
pub fn load_definition(path: impl AsRef<Path>) -> Result<WorkflowDefinition, DefinitionError> {
    let path = path.as_ref();
    info!("Loading workflow from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|source| DefinitionError::Io {
        path: path.display().to_string(),
        source,
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    let definition = parse_definition(&yaml_content)?;

    info!(
        "Workflow '{}' loaded: {} steps",
        definition.display_name(),
        definition.steps.len()
    );
    Ok(definition)
}
