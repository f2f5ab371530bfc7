//! Retryable workflow engine.
//!
//! A workflow is an ordered list of named steps run against shared data. A
//! run halts on the first failed or stopped step, and a later run can resume
//! from the step that failed.

mod state;
mod state_machine;

pub use state::{StepOutcome, StepRecord, WorkflowState, WorkflowStatus};
pub use state_machine::{StateMachine, StepRunner};

/// Generate a unique workflow id (`wkf_` followed by a v4 uuid).
pub fn new_workflow_id() -> String {
    format!("wkf_{}", uuid::Uuid::new_v4().simple())
}
