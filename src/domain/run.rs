//! Workflow run state.
//!
//! A run is a single execution of a workflow definition. It carries the
//! evolving data record threaded through the steps and the index of the step
//! to execute next (or to re-invoke, when suspended).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Data record threaded through the steps of a run
pub type RunData = Map<String, Value>;

/// A workflow execution run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Unique identifier for this run (also the resume token)
    pub id: Uuid,

    /// Id of the workflow definition being executed
    pub definition_id: String,

    /// Index of the current step
    pub step_index: usize,

    /// Evolving data record
    pub data: RunData,

    /// Current state of the run
    pub status: RunStatus,

    /// Why the run is suspended (if it is)
    pub suspend_reason: Option<String>,

    /// When the run was created
    pub created_at: DateTime<Utc>,

    /// When the run last changed state
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    /// Create a new run for a workflow definition
    pub fn new(definition_id: impl Into<String>, data: RunData) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            definition_id: definition_id.into(),
            step_index: 0,
            data,
            status: RunStatus::Created,
            suspend_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move the run into a new state
    pub fn transition(&mut self, status: RunStatus) {
        if !matches!(status, RunStatus::Suspended) {
            self.suspend_reason = None;
        }
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Halt the run at the current step
    pub fn suspend(&mut self, reason: String) {
        self.transition(RunStatus::Suspended);
        self.suspend_reason = Some(reason);
    }

    /// Check if the run is waiting for an external signal
    pub fn is_suspended(&self) -> bool {
        matches!(self.status, RunStatus::Suspended)
    }
}

/// State of a workflow run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunStatus {
    /// Accepted, no step executed yet
    Created,

    /// Currently executing
    Running,

    /// Paused awaiting an external signal (can be resumed)
    Suspended,

    /// Completed successfully
    Completed,

    /// Failed with error
    Failed { error: String },

    /// Cancelled by the user
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed { .. } | Self::Cancelled
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Created
    }
}
