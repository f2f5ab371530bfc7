//! Step-based state machine with resume-from-failed-step.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::state::{StepOutcome, WorkflowState, WorkflowStatus};

/// Executes the steps of one workflow kind.
///
/// `Step` is a small identifier (usually a fieldless enum) paired with a name
/// in the step list handed to [`StateMachine::new`].
#[async_trait]
pub trait StepRunner: Send + Sync {
    type Step: Copy + Send + Sync;

    /// Run one step against the current state and report its outcome.
    async fn run_step(&self, step: Self::Step, state: &WorkflowState) -> StepOutcome;
}

/// Ordered list of named steps, run against a [`WorkflowState`].
pub struct StateMachine<S> {
    steps: Vec<(&'static str, S)>,
    state: WorkflowState,
}

impl<S: Copy + Send + Sync> StateMachine<S> {
    pub fn new(
        steps: Vec<(&'static str, S)>,
        workflow_id: impl Into<String>,
        data: Map<String, Value>,
        failed_step: Option<String>,
    ) -> Self {
        Self {
            steps,
            state: WorkflowState::new(workflow_id, data, failed_step),
        }
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn into_state(self) -> WorkflowState {
        self.state
    }

    pub fn status(&self) -> WorkflowStatus {
        self.state.status
    }

    /// Steps to run: from the previously failed step (inclusive) when it is
    /// still part of the list, the whole list otherwise.
    fn steps_to_process(&self) -> &[(&'static str, S)] {
        let start = self
            .state
            .failed_step
            .as_deref()
            .and_then(|failed| self.steps.iter().position(|(name, _)| *name == failed))
            .unwrap_or(0);
        &self.steps[start..]
    }

    /// Run steps in order until one fails or stops.
    pub async fn process_steps<R>(&mut self, runner: &R) -> WorkflowStatus
    where
        R: StepRunner<Step = S> + ?Sized,
    {
        let steps: Vec<(&'static str, S)> = self.steps_to_process().to_vec();
        if steps.len() < self.steps.len() {
            debug!(
                workflow_id = %self.state.workflow_id,
                "Resuming workflow at step {}",
                steps.first().map(|(name, _)| *name).unwrap_or_default()
            );
        }

        for (name, step) in steps {
            self.state.current_step = Some(name.to_string());
            let outcome = runner.run_step(step, &self.state).await;
            let proceed = outcome.is_continue();
            debug!(
                workflow_id = %self.state.workflow_id,
                step = name,
                status = %outcome.status(),
                "Step finished"
            );
            self.state.apply(outcome);
            if !proceed {
                break;
            }
        }

        self.state.status = self
            .state
            .step_records
            .last()
            .map(|record| record.status)
            .unwrap_or(WorkflowStatus::Processing);

        info!(
            workflow_id = %self.state.workflow_id,
            status = %self.state.status,
            steps = %serde_json::to_string(&self.state.step_records).unwrap_or_default(),
            "Workflow execution finished"
        );
        self.state.status
    }
}
