//! Workflow state definitions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Overall status of a workflow run, and of each executed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Run has not recorded any step yet.
    Processing,
    Success,
    /// Nothing to do. Not an error and never retried.
    Stop,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Processing => "processing",
            WorkflowStatus::Success => "success",
            WorkflowStatus::Stop => "stop",
            WorkflowStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(WorkflowStatus::Processing),
            "success" => Some(WorkflowStatus::Success),
            "stop" => Some(WorkflowStatus::Stop),
            "failed" => Some(WorkflowStatus::Failed),
            _ => None,
        }
    }

    /// Check if this status ends a run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowStatus::Processing)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded for one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: WorkflowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result returned by a step to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Step completed; `data` is merged into the shared workflow data.
    Success {
        message: Option<String>,
        data: Option<Map<String, Value>>,
    },
    /// Nothing left to do; halts the run without marking a failure.
    Stop { message: Option<String> },
    /// Step did not complete; halts the run.
    Failed {
        message: Option<String>,
        retryable: bool,
    },
}

impl StepOutcome {
    /// Success without message or data.
    pub fn ok() -> Self {
        StepOutcome::Success {
            message: None,
            data: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        StepOutcome::Success {
            message: Some(message.into()),
            data: None,
        }
    }

    /// Success carrying data for the following steps.
    ///
    /// Non-object values are ignored when merged.
    pub fn success_with(message: impl Into<String>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => Some(map),
            _ => None,
        };
        StepOutcome::Success {
            message: Some(message.into()),
            data,
        }
    }

    pub fn stop(message: impl Into<String>) -> Self {
        StepOutcome::Stop {
            message: Some(message.into()),
        }
    }

    /// Retryable failure.
    pub fn failed(message: impl Into<String>) -> Self {
        StepOutcome::Failed {
            message: Some(message.into()),
            retryable: true,
        }
    }

    /// Failure that no retry can fix (missing entity, invalid input).
    pub fn fatal(message: impl Into<String>) -> Self {
        StepOutcome::Failed {
            message: Some(message.into()),
            retryable: false,
        }
    }

    pub fn status(&self) -> WorkflowStatus {
        match self {
            StepOutcome::Success { .. } => WorkflowStatus::Success,
            StepOutcome::Stop { .. } => WorkflowStatus::Stop,
            StepOutcome::Failed { .. } => WorkflowStatus::Failed,
        }
    }

    /// Only a success lets the run move on to the next step.
    pub fn is_continue(&self) -> bool {
        matches!(self, StepOutcome::Success { .. })
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            StepOutcome::Success { message, .. }
            | StepOutcome::Stop { message }
            | StepOutcome::Failed { message, .. } => message.as_deref(),
        }
    }
}

/// Mutable record threaded through a single run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub data: Map<String, Value>,
    pub step_records: Vec<StepRecord>,
    pub status: WorkflowStatus,
    pub current_step: Option<String>,
    pub failed_step: Option<String>,
    pub retry: bool,
}

impl WorkflowState {
    pub fn new(
        workflow_id: impl Into<String>,
        data: Map<String, Value>,
        failed_step: Option<String>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            data,
            step_records: Vec::new(),
            status: WorkflowStatus::Processing,
            current_step: None,
            failed_step,
            retry: true,
        }
    }

    pub fn get_data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.data.get(key).and_then(Value::as_i64)
    }

    pub fn step_record(&self, name: &str) -> Option<&StepRecord> {
        self.step_records.iter().find(|r| r.name == name)
    }

    /// Message of the last recorded step, if any.
    pub fn last_message(&self) -> Option<&str> {
        self.step_records.last().and_then(|r| r.message.as_deref())
    }

    /// Apply a step outcome to the current step.
    ///
    /// Records status and message, merges data on success only, and keeps
    /// track of the failing step.
    pub(crate) fn apply(&mut self, outcome: StepOutcome) {
        let Some(step_name) = self.current_step.clone() else {
            return;
        };
        let status = outcome.status();
        let message = outcome.message().map(str::to_string);

        match outcome {
            StepOutcome::Success {
                data: Some(data), ..
            } => {
                for (key, value) in data {
                    self.data.insert(key, value);
                }
            }
            StepOutcome::Failed { retryable, .. } => {
                self.failed_step = Some(step_name.clone());
                if !retryable {
                    self.retry = false;
                }
            }
            _ => {}
        }

        match self.step_records.iter_mut().find(|r| r.name == step_name) {
            Some(record) => {
                record.status = status;
                record.message = message;
            }
            None => self.step_records.push(StepRecord {
                name: step_name,
                status,
                message,
            }),
        }
    }
}
