//! Scripted processor shared by the execution tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::json;

use super::processor::{ProcessorError, ProcessorRegistry, StepProcessor};
use crate::workflow::{Record, StepOutput, StepType, WorkflowContext, WorkflowStep};

#[derive(Default)]
struct Script {
    calls: Vec<(String, Instant)>,
    /// Failures left per step; `u32::MAX` fails forever
    failures: HashMap<String, u32>,
}

/// Processor whose failures are scripted per step id.
///
/// Each successful call returns one record naming the step.
#[derive(Clone, Default)]
pub(crate) struct ScriptedProcessor {
    script: Arc<Mutex<Script>>,
}

impl ScriptedProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always_fail(self, step_id: &str) -> Self {
        self.fail_times(step_id, u32::MAX)
    }

    pub fn fail_times(self, step_id: &str, times: u32) -> Self {
        self.script
            .lock()
            .unwrap()
            .failures
            .insert(step_id.to_string(), times);
        self
    }

    /// Registry with this processor behind every step type.
    pub fn registry(&self) -> ProcessorRegistry {
        StepType::ALL
            .into_iter()
            .fold(ProcessorRegistry::new(), |registry, step_type| {
                registry.with(step_type, self.clone())
            })
    }

    /// Step ids in call order.
    pub fn calls(&self) -> Vec<String> {
        self.script
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn calls_of(&self, step_id: &str) -> usize {
        self.call_times(step_id).len()
    }

    pub fn call_times(&self, step_id: &str) -> Vec<Instant> {
        self.script
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(id, _)| id == step_id)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn output_for(step_id: &str) -> StepOutput {
        let mut record = Record::new();
        record.insert("step".to_string(), json!(step_id));
        StepOutput::Records(vec![record])
    }
}

impl StepProcessor for ScriptedProcessor {
    fn process_step(
        &self,
        step: &WorkflowStep,
        _context: &mut WorkflowContext,
    ) -> Result<StepOutput, ProcessorError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push((step.id.clone(), Instant::now()));

        if let Some(left) = script.failures.get_mut(&step.id) {
            if *left > 0 {
                if *left != u32::MAX {
                    *left -= 1;
                }
                return Err(ProcessorError::execution(format!("{} failed", step.id)));
            }
        }

        Ok(Self::output_for(&step.id))
    }
}
