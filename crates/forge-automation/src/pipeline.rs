//! Action pipeline
//!
//! Runs a workflow's actions strictly in order, one at a time. Actions
//! with ordering dependencies (a status change that a later notification's
//! template references) rely on this. Failures are recorded and the
//! pipeline keeps going by default; cancellation is cooperative and only
//! takes effect between actions.

use crate::actions::{ActionExecutorRegistry, ActionResult};
use crate::context::TriggerContext;
use crate::templates;
use crate::workflow::WorkflowAction;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cooperative cancellation token shared between the execution manager and
/// a running pipeline. Checked only at action boundaries; an in-flight
/// action is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// What a failed action does to the rest of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Record the failure and keep attempting the remaining actions.
    ContinueOnFailure,
    /// Stop after the first failed action.
    HaltOnFailure,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::ContinueOnFailure
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Every action succeeded.
    Completed,
    /// At least one action failed.
    Failed,
    /// Cancellation stopped the pipeline before all actions ran.
    Cancelled,
}

/// Sequential executor of one workflow's actions for one execution.
pub struct ActionPipeline {
    registry: Arc<ActionExecutorRegistry>,
    action_timeout: Duration,
    failure_policy: FailurePolicy,
}

impl ActionPipeline {
    pub fn new(registry: Arc<ActionExecutorRegistry>) -> Self {
        Self {
            registry,
            action_timeout: Duration::from_secs(30),
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Run the actions in ascending order against the context, appending
    /// each action's output to the context for later actions' templates.
    pub async fn run(
        &self,
        actions: &[WorkflowAction],
        context: &mut TriggerContext,
        cancel: &CancelFlag,
    ) -> (PipelineOutcome, Vec<ActionResult>) {
        let mut ordered: Vec<&WorkflowAction> = actions.iter().collect();
        ordered.sort_by_key(|a| a.order);

        let mut results = Vec::with_capacity(ordered.len());
        let mut any_failed = false;
        let mut cancelled = false;

        for action in ordered {
            if cancel.is_set() {
                cancelled = true;
                break;
            }

            let resolved = templates::resolve_config(&action.config, context);

            let result = match self.registry.resolve(&action.action_type).await {
                Some(executor) => {
                    match tokio::time::timeout(self.action_timeout, executor.execute(resolved))
                        .await
                    {
                        Ok(Ok(output)) => ActionResult::ok(&action.action_type, action.order, output),
                        Ok(Err(e)) => {
                            ActionResult::failed(&action.action_type, action.order, e.to_string())
                        }
                        Err(_) => ActionResult::failed(
                            &action.action_type,
                            action.order,
                            format!("timed out after {}s", self.action_timeout.as_secs()),
                        ),
                    }
                }
                None => ActionResult::failed(
                    &action.action_type,
                    action.order,
                    format!("no executor registered for action type '{}'", action.action_type),
                ),
            };

            if result.success {
                if let Some(output) = &result.result {
                    context.record_action_output(action.order, output.clone());
                }
                debug!(
                    action_type = %action.action_type,
                    order = action.order,
                    "Action completed"
                );
            } else {
                any_failed = true;
                warn!(
                    action_type = %action.action_type,
                    order = action.order,
                    error = result.error.as_deref().unwrap_or(""),
                    "Action failed"
                );
            }

            let failed = !result.success;
            results.push(result);

            if failed && self.failure_policy == FailurePolicy::HaltOnFailure {
                break;
            }
        }

        let outcome = if cancelled {
            PipelineOutcome::Cancelled
        } else if any_failed {
            PipelineOutcome::Failed
        } else {
            PipelineOutcome::Completed
        };

        (outcome, results)
    }
}
