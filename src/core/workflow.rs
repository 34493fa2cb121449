//! Workflow definitions.
//!
//! A workflow is an ordered list of named steps. Each step receives the
//! run's current data record and returns new data, a suspension request or
//! a failure. Collaborators reach steps through the `deps` value passed in
//! by the caller, never through globals.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::RunData;

use super::error::{StepError, WorkflowError};

/// Outcome of one step execution
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    /// Data handed to the next step
    NewData(RunData),

    /// Halt the run here until resumed
    Suspend(String),

    /// End the run
    Fail(StepError),
}

/// Everything a step may look at
pub struct StepContext<'a, C> {
    pub run_id: Uuid,

    /// Output of the previous step
    pub data: &'a RunData,

    /// Present only when the run is being resumed at this step
    pub resume_data: Option<&'a Value>,

    /// Injected collaborators
    pub deps: &'a C,
}

impl<C> StepContext<'_, C> {
    pub fn is_resuming(&self) -> bool {
        self.resume_data.is_some()
    }
}

/// A single named step.
///
/// Steps may be re-invoked with the same data and resume data (duplicate
/// resume signals), so their side effects must be idempotent.
#[async_trait]
pub trait Step<C>: Send + Sync
where
    C: Send + Sync,
{
    fn id(&self) -> &str;

    async fn execute(&self, ctx: StepContext<'_, C>) -> StepResult;
}

/// An ordered, validated list of steps
pub struct Workflow<C> {
    id: String,
    steps: Vec<Box<dyn Step<C>>>,
}

impl<C: Send + Sync> Workflow<C> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step
    pub fn then(mut self, step: impl Step<C> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn steps(&self) -> &[Box<dyn Step<C>>] {
        &self.steps
    }

    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id()).collect()
    }

    /// Reject empty workflows and blank or duplicate step ids
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.id.trim().is_empty() {
            return Err(WorkflowError::InvalidDefinition("workflow id is empty".into()));
        }
        if self.steps.is_empty() {
            return Err(WorkflowError::InvalidDefinition(format!(
                "workflow '{}' has no steps",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id().trim().is_empty() {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "workflow '{}' has a step with an empty id",
                    self.id
                )));
            }
            if !seen.insert(step.id()) {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "duplicate step id '{}'",
                    step.id()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Step<()> for Named {
        fn id(&self) -> &str {
            self.0
        }

        async fn execute(&self, ctx: StepContext<'_, ()>) -> StepResult {
            StepResult::NewData(ctx.data.clone())
        }
    }

    #[test]
    fn test_validate() {
        let ok = Workflow::new("wf").then(Named("a")).then(Named("b"));
        assert!(ok.validate().is_ok());
        assert_eq!(ok.step_ids(), vec!["a", "b"]);

        let empty: Workflow<()> = Workflow::new("wf");
        assert!(empty.validate().is_err());

        let dup = Workflow::new("wf").then(Named("a")).then(Named("a"));
        assert!(matches!(
            dup.validate(),
            Err(WorkflowError::InvalidDefinition(msg)) if msg.contains("duplicate")
        ));

        let blank = Workflow::new("wf").then(Named(" "));
        assert!(blank.validate().is_err());
    }
}
