//! Execution state machine and stores
//!
//! A `WorkflowExecution` is one concrete run attempt of a workflow:
//! PENDING → RUNNING → {COMPLETED, FAILED, CANCELLED}. Terminal records
//! are never mutated; a retry creates a new record linked to the original
//! through `retry_of`. Persistence is behind the `ExecutionStore` and
//! `WorkflowSource` traits; in-memory implementations are provided.

use crate::actions::ActionResult;
use crate::context::TriggerContext;
use crate::pipeline::{ActionPipeline, CancelFlag, PipelineOutcome};
use crate::workflow::{TriggerType, Workflow};
use crate::{AutomationError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forge_core::{ExecutionId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One run attempt of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub tenant_id: Option<String>,
    pub status: ExecutionStatus,
    /// Context snapshot taken at dispatch time.
    pub trigger_data: Value,
    /// Per-action results, append-only, in pipeline order.
    pub actions_executed: Vec<ActionResult>,
    pub error: Option<String>,
    /// Set when this execution is a retry of a failed one.
    pub retry_of: Option<ExecutionId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    pub fn new(workflow: &Workflow, trigger_data: Value) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id: workflow.id,
            tenant_id: workflow.tenant_id.clone(),
            status: ExecutionStatus::Pending,
            trigger_data,
            actions_executed: Vec::new(),
            error: None,
            retry_of: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Execution persistence contract.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create(&self, execution: &WorkflowExecution) -> Result<()>;
    async fn update(&self, execution: &WorkflowExecution) -> Result<()>;
    async fn get(&self, id: ExecutionId) -> Result<Option<WorkflowExecution>>;
    async fn list(&self, workflow_id: WorkflowId) -> Result<Vec<WorkflowExecution>>;
    async fn append_action_result(&self, id: ExecutionId, result: &ActionResult) -> Result<()>;
    /// Atomically transition status if it currently matches one of
    /// `expected`. Returns whether the transition happened.
    async fn compare_and_set_status(
        &self,
        id: ExecutionId,
        expected: &[ExecutionStatus],
        next: ExecutionStatus,
    ) -> Result<bool>;
}

/// Read access to workflow records, as the dispatcher and manager need it.
#[async_trait]
pub trait WorkflowSource: Send + Sync {
    async fn list_enabled(&self, trigger_type: TriggerType) -> Result<Vec<Workflow>>;
    async fn get(&self, id: WorkflowId) -> Result<Option<Workflow>>;
    /// Bump `run_count` and set `last_run_at` after an execution finishes.
    async fn record_run(&self, id: WorkflowId, at: DateTime<Utc>) -> Result<()>;
}

/// Full workflow persistence, for the service facade.
#[async_trait]
pub trait WorkflowStore: WorkflowSource {
    async fn save(&self, workflow: &Workflow) -> Result<()>;
    async fn delete(&self, id: WorkflowId) -> Result<()>;
    async fn list(&self) -> Result<Vec<Workflow>>;
}

/// In-memory execution store.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<ExecutionId, WorkflowExecution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create(&self, execution: &WorkflowExecution) -> Result<()> {
        let mut executions = self.executions.write().await;
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update(&self, execution: &WorkflowExecution) -> Result<()> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution.id) {
            executions.insert(execution.id, execution.clone());
            Ok(())
        } else {
            Err(AutomationError::ExecutionNotFound(execution.id))
        }
    }

    async fn get(&self, id: ExecutionId) -> Result<Option<WorkflowExecution>> {
        let executions = self.executions.read().await;
        Ok(executions.get(&id).cloned())
    }

    async fn list(&self, workflow_id: WorkflowId) -> Result<Vec<WorkflowExecution>> {
        let executions = self.executions.read().await;
        let mut matching: Vec<_> = executions
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.created_at);
        Ok(matching)
    }

    async fn append_action_result(&self, id: ExecutionId, result: &ActionResult) -> Result<()> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(&id)
            .ok_or(AutomationError::ExecutionNotFound(id))?;
        execution.actions_executed.push(result.clone());
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        id: ExecutionId,
        expected: &[ExecutionStatus],
        next: ExecutionStatus,
    ) -> Result<bool> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(&id)
            .ok_or(AutomationError::ExecutionNotFound(id))?;
        if expected.contains(&execution.status) {
            execution.status = next;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// In-memory workflow store.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowSource for InMemoryWorkflowStore {
    async fn list_enabled(&self, trigger_type: TriggerType) -> Result<Vec<Workflow>> {
        let workflows = self.workflows.read().await;
        Ok(workflows
            .values()
            .filter(|w| w.is_enabled && w.trigger.trigger_type() == trigger_type)
            .cloned()
            .collect())
    }

    async fn get(&self, id: WorkflowId) -> Result<Option<Workflow>> {
        let workflows = self.workflows.read().await;
        Ok(workflows.get(&id).cloned())
    }

    async fn record_run(&self, id: WorkflowId, at: DateTime<Utc>) -> Result<()> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(&id)
            .ok_or(AutomationError::WorkflowNotFound(id))?;
        workflow.run_count += 1;
        workflow.last_run_at = Some(at);
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn save(&self, workflow: &Workflow) -> Result<()> {
        let mut workflows = self.workflows.write().await;
        workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn delete(&self, id: WorkflowId) -> Result<()> {
        let mut workflows = self.workflows.write().await;
        workflows.remove(&id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Workflow>> {
        let workflows = self.workflows.read().await;
        let mut all: Vec<_> = workflows.values().cloned().collect();
        all.sort_by_key(|w| w.created_at);
        Ok(all)
    }
}

/// Owns the execution lifecycle: start, cancel, retry.
///
/// Executions are independent; concurrent executions of the same workflow
/// are permitted.
pub struct ExecutionManager {
    store: Arc<dyn ExecutionStore>,
    workflows: Arc<dyn WorkflowSource>,
    pipeline: ActionPipeline,
    cancel_flags: RwLock<HashMap<ExecutionId, CancelFlag>>,
}

impl ExecutionManager {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        workflows: Arc<dyn WorkflowSource>,
        pipeline: ActionPipeline,
    ) -> Self {
        Self {
            store,
            workflows,
            pipeline,
            cancel_flags: RwLock::new(HashMap::new()),
        }
    }

    /// Create a new execution for the workflow and run it to a terminal
    /// state. Returns the finalized execution record.
    pub async fn start(
        &self,
        workflow: &Workflow,
        context: TriggerContext,
    ) -> Result<WorkflowExecution> {
        let execution = WorkflowExecution::new(workflow, context.as_value());
        self.store.create(&execution).await?;
        self.launch(workflow, execution, context).await
    }

    /// Request cancellation. Legal only from PENDING or RUNNING.
    /// Cancellation is cooperative: an in-flight action finishes; the next
    /// one does not start.
    pub async fn cancel(&self, id: ExecutionId) -> Result<WorkflowExecution> {
        let execution = self
            .store
            .get(id)
            .await?
            .ok_or(AutomationError::ExecutionNotFound(id))?;

        if execution.status.is_terminal() {
            return Err(AutomationError::NotCancellable {
                id,
                status: execution.status,
            });
        }

        let flag = self.cancel_flags.read().await.get(&id).cloned();
        match flag {
            Some(flag) => flag.set(),
            None => {
                // No live task for this record (e.g. loaded from a stale
                // store): transition it directly.
                self.store
                    .compare_and_set_status(
                        id,
                        &[ExecutionStatus::Pending, ExecutionStatus::Running],
                        ExecutionStatus::Cancelled,
                    )
                    .await?;
            }
        }

        info!(execution_id = %id, "Execution cancel requested");

        self.store
            .get(id)
            .await?
            .ok_or(AutomationError::ExecutionNotFound(id))
    }

    /// Retry a FAILED execution by creating a new execution record with the
    /// original trigger data. The original record is not mutated.
    pub async fn retry(&self, id: ExecutionId) -> Result<WorkflowExecution> {
        let original = self
            .store
            .get(id)
            .await?
            .ok_or(AutomationError::ExecutionNotFound(id))?;

        if original.status != ExecutionStatus::Failed {
            return Err(AutomationError::NotRetryable {
                id,
                status: original.status,
            });
        }

        let workflow = self
            .workflows
            .get(original.workflow_id)
            .await?
            .ok_or(AutomationError::WorkflowNotFound(original.workflow_id))?;

        let context = TriggerContext::from_value(original.trigger_data.clone());
        let mut execution = WorkflowExecution::new(&workflow, original.trigger_data.clone());
        execution.retry_of = Some(original.id);
        self.store.create(&execution).await?;

        info!(
            execution_id = %execution.id,
            retry_of = %original.id,
            workflow_id = %workflow.id,
            "Retrying failed execution"
        );

        self.launch(&workflow, execution, context).await
    }

    pub async fn get(&self, id: ExecutionId) -> Result<WorkflowExecution> {
        self.store
            .get(id)
            .await?
            .ok_or(AutomationError::ExecutionNotFound(id))
    }

    pub async fn list(&self, workflow_id: WorkflowId) -> Result<Vec<WorkflowExecution>> {
        self.store.list(workflow_id).await
    }

    async fn launch(
        &self,
        workflow: &Workflow,
        execution: WorkflowExecution,
        context: TriggerContext,
    ) -> Result<WorkflowExecution> {
        let cancel = CancelFlag::new();
        let id = execution.id;
        self.cancel_flags.write().await.insert(id, cancel.clone());

        let outcome = self
            .run_to_completion(workflow, execution, context, &cancel)
            .await;

        self.cancel_flags.write().await.remove(&id);
        outcome
    }

    async fn run_to_completion(
        &self,
        workflow: &Workflow,
        mut execution: WorkflowExecution,
        mut context: TriggerContext,
        cancel: &CancelFlag,
    ) -> Result<WorkflowExecution> {
        let transitioned = self
            .store
            .compare_and_set_status(execution.id, &[ExecutionStatus::Pending], ExecutionStatus::Running)
            .await?;

        if !transitioned {
            // Cancelled before it started.
            return self
                .store
                .get(execution.id)
                .await?
                .ok_or(AutomationError::ExecutionNotFound(execution.id));
        }

        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(Utc::now());
        self.store.update(&execution).await?;

        info!(
            workflow_id = %workflow.id,
            execution_id = %execution.id,
            action_count = workflow.actions.len(),
            "Execution started"
        );

        let (outcome, results) = self
            .pipeline
            .run(&workflow.actions, &mut context, cancel)
            .await;

        for result in &results {
            self.store.append_action_result(execution.id, result).await?;
        }

        let failed_count = results.iter().filter(|r| !r.success).count();
        execution.actions_executed = results;
        execution.status = match outcome {
            PipelineOutcome::Completed => ExecutionStatus::Completed,
            PipelineOutcome::Failed => ExecutionStatus::Failed,
            PipelineOutcome::Cancelled => ExecutionStatus::Cancelled,
        };
        if outcome == PipelineOutcome::Failed {
            execution.error = Some(format!(
                "{} of {} actions failed",
                failed_count,
                execution.actions_executed.len()
            ));
        }
        execution.completed_at = Some(Utc::now());
        self.store.update(&execution).await?;

        self.workflows
            .record_run(workflow.id, execution.completed_at.unwrap_or_else(Utc::now))
            .await?;

        info!(
            workflow_id = %workflow.id,
            execution_id = %execution.id,
            status = %execution.status,
            "Execution finished"
        );

        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionExecutor, ActionExecutorRegistry};
    use crate::workflow::{TriggerConfig, WorkflowAction};
    use serde_json::{json, Value};
    use std::time::Duration;

    struct OkExecutor;

    #[async_trait]
    impl ActionExecutor for OkExecutor {
        async fn execute(&self, _config: Value) -> Result<Value> {
            Ok(json!({"done": true}))
        }
    }

    struct FailExecutor;

    #[async_trait]
    impl ActionExecutor for FailExecutor {
        async fn execute(&self, _config: Value) -> Result<Value> {
            Err(AutomationError::ActionFailed("nope".to_string()))
        }
    }

    struct SlowExecutor;

    #[async_trait]
    impl ActionExecutor for SlowExecutor {
        async fn execute(&self, _config: Value) -> Result<Value> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Value::Null)
        }
    }

    async fn setup() -> (Arc<InMemoryWorkflowStore>, Arc<ExecutionManager>) {
        let registry = Arc::new(ActionExecutorRegistry::new());
        registry.register("ok", Arc::new(OkExecutor)).await;
        registry.register("fail", Arc::new(FailExecutor)).await;
        registry.register("slow", Arc::new(SlowExecutor)).await;

        let workflows = Arc::new(InMemoryWorkflowStore::new());
        let manager = Arc::new(ExecutionManager::new(
            Arc::new(InMemoryExecutionStore::new()),
            workflows.clone(),
            ActionPipeline::new(registry),
        ));
        (workflows, manager)
    }

    fn manual_workflow(actions: &[(&str, u32)]) -> Workflow {
        let mut workflow = Workflow::new(
            "test",
            TriggerConfig::Manual {
                allowed_roles: Vec::new(),
            },
        );
        for (ty, order) in actions {
            workflow = workflow.add_action(WorkflowAction::new(ty, *order, json!({})));
        }
        workflow.enabled()
    }

    #[tokio::test]
    async fn test_start_runs_to_completed() {
        let (workflows, manager) = setup().await;
        let workflow = manual_workflow(&[("ok", 1), ("ok", 2)]);
        workflows.save(&workflow).await.unwrap();

        let execution = manager
            .start(&workflow, TriggerContext::new())
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.actions_executed.len(), 2);
        assert!(execution.started_at.is_some());
        assert!(execution.completed_at.is_some());

        let updated = workflows.get(workflow.id).await.unwrap().unwrap();
        assert_eq!(updated.run_count, 1);
        assert!(updated.last_run_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_action_marks_execution_failed() {
        let (workflows, manager) = setup().await;
        let workflow = manual_workflow(&[("ok", 1), ("fail", 2), ("ok", 3)]);
        workflows.save(&workflow).await.unwrap();

        let execution = manager
            .start(&workflow, TriggerContext::new())
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.actions_executed.len(), 3);
        assert_eq!(execution.error.as_deref(), Some("1 of 3 actions failed"));
    }

    #[tokio::test]
    async fn test_retry_failed_execution_creates_new_record() {
        let (workflows, manager) = setup().await;
        let workflow = manual_workflow(&[("fail", 1)]);
        workflows.save(&workflow).await.unwrap();

        let failed = manager
            .start(&workflow, TriggerContext::new())
            .await
            .unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);

        let retried = manager.retry(failed.id).await.unwrap();
        assert_ne!(retried.id, failed.id);
        assert_eq!(retried.retry_of, Some(failed.id));
        assert_eq!(retried.status, ExecutionStatus::Failed);
        assert_eq!(retried.trigger_data, failed.trigger_data);

        // Original record untouched.
        let original = manager.get(failed.id).await.unwrap();
        assert_eq!(original.status, ExecutionStatus::Failed);
        assert!(original.retry_of.is_none());
    }

    #[tokio::test]
    async fn test_retry_completed_execution_is_rejected() {
        let (workflows, manager) = setup().await;
        let workflow = manual_workflow(&[("ok", 1)]);
        workflows.save(&workflow).await.unwrap();

        let completed = manager
            .start(&workflow, TriggerContext::new())
            .await
            .unwrap();

        let err = manager.retry(completed.id).await.unwrap_err();
        assert!(matches!(
            err,
            AutomationError::NotRetryable {
                status: ExecutionStatus::Completed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cancel_running_execution_stops_before_next_action() {
        let (workflows, manager) = setup().await;
        let workflow = manual_workflow(&[("slow", 1), ("slow", 2), ("slow", 3)]);
        workflows.save(&workflow).await.unwrap();

        let task = {
            let manager = manager.clone();
            let workflow = workflow.clone();
            tokio::spawn(async move { manager.start(&workflow, TriggerContext::new()).await })
        };

        // Let the first action begin, then cancel.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let executions = manager.list(workflow.id).await.unwrap();
        let running = &executions[0];
        manager.cancel(running.id).await.unwrap();

        let finished = task.await.unwrap().unwrap();
        assert_eq!(finished.status, ExecutionStatus::Cancelled);
        // The in-flight action completed; nothing after it started.
        assert_eq!(finished.actions_executed.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_terminal_execution_is_rejected() {
        let (workflows, manager) = setup().await;
        let workflow = manual_workflow(&[("ok", 1)]);
        workflows.save(&workflow).await.unwrap();

        let completed = manager
            .start(&workflow, TriggerContext::new())
            .await
            .unwrap();

        let err = manager.cancel(completed.id).await.unwrap_err();
        assert!(matches!(
            err,
            AutomationError::NotCancellable {
                status: ExecutionStatus::Completed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cancel_orphaned_pending_record() {
        let (workflows, _) = setup().await;
        let workflow = manual_workflow(&[("ok", 1)]);
        workflows.save(&workflow).await.unwrap();

        // A pending record with no live task, as after a crash.
        let store = InMemoryExecutionStore::new();
        let orphan = WorkflowExecution::new(&workflow, json!({}));
        let registry = Arc::new(ActionExecutorRegistry::new());
        let manager = ExecutionManager::new(
            Arc::new(store),
            workflows.clone(),
            ActionPipeline::new(registry),
        );
        manager.store.create(&orphan).await.unwrap();

        let cancelled = manager.cancel(orphan.id).await.unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_compare_and_set_status() {
        let store = InMemoryExecutionStore::new();
        let workflow = manual_workflow(&[("ok", 1)]);
        let execution = WorkflowExecution::new(&workflow, json!({}));
        store.create(&execution).await.unwrap();

        assert!(store
            .compare_and_set_status(
                execution.id,
                &[ExecutionStatus::Pending],
                ExecutionStatus::Running
            )
            .await
            .unwrap());

        // Second attempt from the same expected state loses.
        assert!(!store
            .compare_and_set_status(
                execution.id,
                &[ExecutionStatus::Pending],
                ExecutionStatus::Running
            )
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_executions_of_one_workflow() {
        let (workflows, manager) = setup().await;
        let workflow = manual_workflow(&[("slow", 1)]);
        workflows.save(&workflow).await.unwrap();

        let a = {
            let manager = manager.clone();
            let workflow = workflow.clone();
            tokio::spawn(async move { manager.start(&workflow, TriggerContext::new()).await })
        };
        let b = {
            let manager = manager.clone();
            let workflow = workflow.clone();
            tokio::spawn(async move { manager.start(&workflow, TriggerContext::new()).await })
        };

        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        assert_eq!(a.status, ExecutionStatus::Completed);
        assert_eq!(b.status, ExecutionStatus::Completed);
        assert_ne!(a.id, b.id);

        let updated = workflows.get(workflow.id).await.unwrap().unwrap();
        assert_eq!(updated.run_count, 2);
    }
}
