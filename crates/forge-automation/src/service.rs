//! Automation service facade
//!
//! The single entry point a host (HTTP layer, CLI, embedded caller) uses
//! for workflow CRUD, dry-runs, manual execution, execution control, and
//! the template library. Definitions are validated here, before they are
//! persisted; dispatch assumes stored workflows are valid.

use crate::dispatch::{Dispatcher, TestOutcome};
use crate::execution::{ExecutionManager, WorkflowExecution, WorkflowStore};
use crate::library::TemplateLibrary;
use crate::triggers::Stimulus;
use crate::workflow::{TriggerType, Workflow};
use crate::{AutomationError, Result};
use chrono::Utc;
use forge_core::{AppError, ExecutionId, WorkflowId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub struct AutomationService {
    workflows: Arc<dyn WorkflowStore>,
    manager: Arc<ExecutionManager>,
    dispatcher: Arc<Dispatcher>,
    library: Arc<TemplateLibrary>,
}

impl AutomationService {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        manager: Arc<ExecutionManager>,
        dispatcher: Arc<Dispatcher>,
        library: Arc<TemplateLibrary>,
    ) -> Self {
        Self {
            workflows,
            manager,
            dispatcher,
            library,
        }
    }

    pub async fn create_workflow(&self, workflow: Workflow) -> Result<Workflow> {
        workflow.validate()?;
        self.workflows.save(&workflow).await?;
        info!(workflow_id = %workflow.id, name = %workflow.name, "Workflow created");
        Ok(workflow)
    }

    pub async fn update_workflow(&self, mut workflow: Workflow) -> Result<Workflow> {
        let existing = self
            .workflows
            .get(workflow.id)
            .await?
            .ok_or(AutomationError::WorkflowNotFound(workflow.id))?;

        workflow.validate()?;
        // Run bookkeeping is owned by the engine, not the caller.
        workflow.run_count = existing.run_count;
        workflow.last_run_at = existing.last_run_at;
        workflow.created_at = existing.created_at;
        workflow.updated_at = Utc::now();

        self.workflows.save(&workflow).await?;
        info!(workflow_id = %workflow.id, "Workflow updated");
        Ok(workflow)
    }

    pub async fn delete_workflow(&self, id: WorkflowId) -> Result<()> {
        self.workflows
            .get(id)
            .await?
            .ok_or(AutomationError::WorkflowNotFound(id))?;
        self.workflows.delete(id).await?;
        info!(workflow_id = %id, "Workflow deleted");
        Ok(())
    }

    pub async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow> {
        self.workflows
            .get(id)
            .await?
            .ok_or(AutomationError::WorkflowNotFound(id))
    }

    pub async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        self.workflows.list().await
    }

    pub async fn set_enabled(&self, id: WorkflowId, enabled: bool) -> Result<Workflow> {
        let mut workflow = self.get_workflow(id).await?;
        workflow.is_enabled = enabled;
        workflow.validate()?;
        workflow.updated_at = Utc::now();
        self.workflows.save(&workflow).await?;
        info!(workflow_id = %id, enabled, "Workflow enablement changed");
        Ok(workflow)
    }

    /// Dry-run a stored workflow against a stimulus without executing
    /// actions.
    pub async fn test_workflow(&self, id: WorkflowId, stimulus: &Stimulus) -> Result<TestOutcome> {
        let workflow = self.get_workflow(id).await?;
        Ok(self.dispatcher.test(&workflow, stimulus))
    }

    /// Execute a MANUAL workflow on demand. Returns `None` when the
    /// workflow's conditions reject the payload.
    pub async fn execute_workflow(
        &self,
        id: WorkflowId,
        payload: Value,
        role: Option<String>,
    ) -> Result<Option<WorkflowExecution>> {
        let workflow = self.get_workflow(id).await?;

        if workflow.trigger.trigger_type() != TriggerType::Manual {
            return Err(AppError::validation(format!(
                "workflow '{}' has a {} trigger and cannot be run manually",
                workflow.name,
                workflow.trigger.trigger_type()
            ))
            .into());
        }
        if !workflow.is_enabled {
            return Err(AppError::validation(format!(
                "workflow '{}' is disabled",
                workflow.name
            ))
            .into());
        }

        let stimulus = Stimulus::Manual {
            role: role.clone(),
            payload,
        };
        if !crate::triggers::matches(&workflow.trigger, &stimulus) {
            return Err(AppError::unauthorized(format!(
                "role {:?} is not allowed to run workflow '{}'",
                role, workflow.name
            ))
            .into());
        }

        self.dispatcher.execute_for(&workflow, stimulus).await
    }

    /// Feed an external stimulus (event, signal observation) into the
    /// engine and fan it out to matching workflows.
    ///
    /// Schedule occurrences must come from the `ScheduleRunner`, which
    /// claims each occurrence in its `OccurrenceLedger` before dispatch;
    /// stimuli fed here are not deduplicated.
    pub async fn ingest(&self, stimulus: Stimulus) -> Result<Vec<WorkflowExecution>> {
        self.dispatcher.dispatch(stimulus).await
    }

    pub async fn get_execution(&self, id: ExecutionId) -> Result<WorkflowExecution> {
        self.manager.get(id).await
    }

    pub async fn list_executions(&self, workflow_id: WorkflowId) -> Result<Vec<WorkflowExecution>> {
        self.manager.list(workflow_id).await
    }

    pub async fn cancel_execution(&self, id: ExecutionId) -> Result<WorkflowExecution> {
        self.manager.cancel(id).await
    }

    pub async fn retry_execution(&self, id: ExecutionId) -> Result<WorkflowExecution> {
        self.manager.retry(id).await
    }

    pub fn templates(&self) -> &TemplateLibrary {
        &self.library
    }

    /// Instantiate a template and persist the resulting workflow. It is
    /// created disabled; enable it explicitly once reviewed.
    pub async fn create_from_template(
        &self,
        template_id: &str,
        params: &HashMap<String, Value>,
    ) -> Result<Workflow> {
        let workflow = self.library.apply(template_id, params).await?;
        self.workflows.save(&workflow).await?;
        info!(
            workflow_id = %workflow.id,
            template_id = %template_id,
            "Workflow created from template"
        );
        Ok(workflow)
    }
}
