//! Dispatcher
//!
//! Fans one stimulus out to every enabled workflow whose trigger matches
//! and whose conditions pass, launching executions concurrently under a
//! bounded permit. One workflow's failure never affects another's
//! execution.

use crate::conditions;
use crate::execution::{ExecutionManager, WorkflowExecution, WorkflowSource};
use crate::triggers::{self, Stimulus};
use crate::workflow::Workflow;
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Dry-run result for a workflow against a stimulus. Both checks are
/// evaluated independently so a definition can be debugged in one pass.
#[derive(Debug, Clone, Serialize)]
pub struct TestOutcome {
    pub would_trigger: bool,
    pub conditions_met: bool,
}

impl TestOutcome {
    pub fn would_execute(&self) -> bool {
        self.would_trigger && self.conditions_met
    }
}

/// Routes stimuli to matching workflows and launches their executions.
pub struct Dispatcher {
    workflows: Arc<dyn WorkflowSource>,
    manager: Arc<ExecutionManager>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(workflows: Arc<dyn WorkflowSource>, manager: Arc<ExecutionManager>) -> Self {
        Self {
            workflows,
            manager,
            permits: Arc::new(Semaphore::new(16)),
        }
    }

    /// Cap on concurrently running executions launched by this dispatcher.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    /// Fan the stimulus out to all enabled workflows of its trigger type.
    /// Each candidate is matched, evaluated, and run on its own spawned
    /// task so no workflow delays another. Returns the finalized executions
    /// that were launched; workflows whose executions error internally are
    /// logged and skipped.
    pub async fn dispatch(&self, stimulus: Stimulus) -> Result<Vec<WorkflowExecution>> {
        let candidates = self
            .workflows
            .list_enabled(stimulus.trigger_type())
            .await?;

        debug!(
            trigger_type = %stimulus.trigger_type(),
            candidates = candidates.len(),
            "Dispatching stimulus"
        );

        let context = stimulus.to_context();
        let mut tasks: JoinSet<Option<WorkflowExecution>> = JoinSet::new();

        for workflow in candidates {
            let manager = self.manager.clone();
            let permits = self.permits.clone();
            let stimulus = stimulus.clone();
            let context = context.clone();
            tasks.spawn(async move {
                // Closed semaphores never occur here; treat failure as skip.
                let _permit = permits.acquire_owned().await.ok()?;
                if !triggers::matches(&workflow.trigger, &stimulus) {
                    return None;
                }
                if !conditions::evaluate(workflow.conditions.as_ref(), &context) {
                    debug!(workflow_id = %workflow.id, "Trigger matched but conditions did not");
                    return None;
                }
                match manager.start(&workflow, context).await {
                    Ok(execution) => Some(execution),
                    Err(e) => {
                        error!(
                            workflow_id = %workflow.id,
                            error = %e,
                            "Workflow execution errored during dispatch"
                        );
                        None
                    }
                }
            });
        }

        let mut started = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(execution)) => started.push(execution),
                Ok(None) => {}
                Err(e) => error!(error = %e, "Dispatch task panicked"),
            }
        }

        if !started.is_empty() {
            info!(count = started.len(), "Dispatched stimulus to workflows");
        }

        Ok(started)
    }

    /// Run the stimulus against a single workflow. Returns `None` when the
    /// trigger does not match or the conditions fail.
    pub async fn execute_for(
        &self,
        workflow: &Workflow,
        stimulus: Stimulus,
    ) -> Result<Option<WorkflowExecution>> {
        if !triggers::matches(&workflow.trigger, &stimulus) {
            return Ok(None);
        }

        let context = stimulus.to_context();
        if !conditions::evaluate(workflow.conditions.as_ref(), &context) {
            return Ok(None);
        }

        let execution = self.manager.start(workflow, context).await?;
        Ok(Some(execution))
    }

    /// Dry-run a workflow definition against a stimulus without executing
    /// any action.
    pub fn test(&self, workflow: &Workflow, stimulus: &Stimulus) -> TestOutcome {
        let would_trigger = triggers::matches(&workflow.trigger, stimulus);
        let context = stimulus.to_context();
        let conditions_met = conditions::evaluate(workflow.conditions.as_ref(), &context);

        TestOutcome {
            would_trigger,
            conditions_met,
        }
    }
}
