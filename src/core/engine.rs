//! Workflow execution engine.
//!
//! Drives a run through its steps in order. A suspending step parks the run
//! in the registry; resuming takes it back out and re-invokes that same step
//! with the resume data. Steps are never retried.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{RunData, RunStatus, WorkflowRun};

use super::error::{StepError, WorkflowError};
use super::registry::RunRegistry;
use super::workflow::{StepContext, StepResult, Workflow};

/// Final state of one `start` or `resume` call
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: WorkflowRun,

    /// The step error that ended the run, if any
    pub error: Option<StepError>,
}

impl RunOutcome {
    pub fn status(&self) -> &RunStatus {
        &self.run.status
    }
}

/// Executes runs of a single workflow
pub struct WorkflowEngine<C> {
    workflow: Workflow<C>,
    registry: Arc<dyn RunRegistry>,
}

impl<C: Send + Sync> WorkflowEngine<C> {
    /// Validate the workflow and build an engine around it
    pub fn new(workflow: Workflow<C>, registry: Arc<dyn RunRegistry>) -> Result<Self, WorkflowError> {
        workflow.validate()?;
        Ok(Self { workflow, registry })
    }

    pub fn workflow(&self) -> &Workflow<C> {
        &self.workflow
    }

    pub fn registry(&self) -> &Arc<dyn RunRegistry> {
        &self.registry
    }

    /// Start a new run over `data`
    #[instrument(skip(self, data, deps), fields(workflow = %self.workflow.id()))]
    pub async fn start(&self, data: RunData, deps: &C) -> RunOutcome {
        let run = WorkflowRun::new(self.workflow.id(), data);
        info!(run_id = %run.id, "Starting run");
        self.drive(run, None, deps).await
    }

    /// Continue a suspended run from the step that suspended it
    #[instrument(skip(self, resume_data, deps), fields(workflow = %self.workflow.id()))]
    pub async fn resume(
        &self,
        run_id: Uuid,
        resume_data: Value,
        deps: &C,
    ) -> Result<RunOutcome, WorkflowError> {
        let run = self
            .registry
            .take(&run_id)
            .ok_or(WorkflowError::RunNotFound(run_id))?;

        if !run.is_suspended() {
            return Err(WorkflowError::NotResumable {
                id: run_id,
                status: run.status.label().to_string(),
            });
        }

        info!(step_index = run.step_index, "Resuming run");
        Ok(self.drive(run, Some(resume_data), deps).await)
    }

    async fn drive(&self, mut run: WorkflowRun, mut resume_data: Option<Value>, deps: &C) -> RunOutcome {
        run.transition(RunStatus::Running);

        while let Some(step) = self.workflow.steps().get(run.step_index) {
            debug!(run_id = %run.id, step = step.id(), "Executing step");

            let ctx = StepContext {
                run_id: run.id,
                data: &run.data,
                resume_data: resume_data.as_ref(),
                deps,
            };

            match step.execute(ctx).await {
                StepResult::NewData(data) => {
                    run.data = data;
                    run.step_index += 1;
                    resume_data = None;
                }
                StepResult::Suspend(reason) => {
                    info!(run_id = %run.id, step = step.id(), %reason, "Run suspended");
                    run.suspend(reason);
                    let snapshot = run.clone();
                    for evicted in self.registry.insert(run) {
                        warn!(run_id = %evicted, "Suspended run evicted");
                    }
                    return RunOutcome {
                        run: snapshot,
                        error: None,
                    };
                }
                StepResult::Fail(error) => {
                    let status = match error {
                        StepError::Cancelled => RunStatus::Cancelled,
                        _ => RunStatus::Failed {
                            error: error.to_string(),
                        },
                    };
                    if error.is_sentinel() {
                        info!(run_id = %run.id, step = step.id(), %error, "Run ended");
                    } else {
                        warn!(run_id = %run.id, step = step.id(), %error, "Step failed");
                    }
                    run.transition(status);
                    return RunOutcome {
                        run,
                        error: Some(error),
                    };
                }
            }
        }

        run.transition(RunStatus::Completed);
        info!(run_id = %run.id, "Run completed");
        RunOutcome { run, error: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Step;
    use crate::core::registry::InMemoryRunRegistry;
    use async_trait::async_trait;
    use serde_json::json;

    /// Appends its id to `trail`, suspending on first visit when `gate` is set
    struct Mark {
        id: &'static str,
        gate: bool,
    }

    #[async_trait]
    impl Step<()> for Mark {
        fn id(&self) -> &str {
            self.id
        }

        async fn execute(&self, ctx: StepContext<'_, ()>) -> StepResult {
            if self.gate && !ctx.is_resuming() {
                return StepResult::Suspend(format!("{} waiting", self.id));
            }
            let mut data = ctx.data.clone();
            let trail = data
                .entry("trail")
                .or_insert_with(|| json!([]));
            if let Some(items) = trail.as_array_mut() {
                items.push(json!(self.id));
            }
            StepResult::NewData(data)
        }
    }

    fn engine(steps: Vec<Mark>) -> WorkflowEngine<()> {
        let workflow = steps.into_iter().fold(Workflow::new("test"), Workflow::then);
        WorkflowEngine::new(workflow, Arc::new(InMemoryRunRegistry::default())).unwrap()
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let engine = engine(vec![
            Mark { id: "a", gate: false },
            Mark { id: "b", gate: false },
        ]);

        let outcome = engine.start(RunData::new(), &()).await;

        assert_eq!(outcome.run.status, RunStatus::Completed);
        assert_eq!(outcome.run.data["trail"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn test_resume_reinvokes_suspending_step() {
        let engine = engine(vec![
            Mark { id: "a", gate: false },
            Mark { id: "gate", gate: true },
            Mark { id: "c", gate: false },
        ]);

        let suspended = engine.start(RunData::new(), &()).await;
        assert!(suspended.run.is_suspended());
        assert_eq!(suspended.run.step_index, 1);
        assert_eq!(suspended.run.suspend_reason.as_deref(), Some("gate waiting"));

        let outcome = engine
            .resume(suspended.run.id, json!({"approved": true}), &())
            .await
            .unwrap();
        assert_eq!(outcome.run.status, RunStatus::Completed);
        assert_eq!(outcome.run.data["trail"], json!(["a", "gate", "c"]));
        assert!(engine.registry().is_empty());
    }

    #[tokio::test]
    async fn test_resume_unknown_run() {
        let engine = engine(vec![Mark { id: "a", gate: false }]);
        let id = Uuid::new_v4();

        let err = engine.resume(id, json!({}), &()).await.unwrap_err();
        assert_eq!(err, WorkflowError::RunNotFound(id));
    }

    #[test]
    fn test_invalid_workflow_rejected() {
        let result = WorkflowEngine::new(
            Workflow::<()>::new("empty"),
            Arc::new(InMemoryRunRegistry::default()),
        );
        assert!(result.is_err());
    }
}
