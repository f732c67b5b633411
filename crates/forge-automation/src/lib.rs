//! Workflow automation core for Forge
//!
//! This crate provides the rules engine behind workflow automation:
//! - Trigger matching over events, metric signals, cron schedules, and manual calls
//! - Edge-triggered signal semantics (transitions fire, steady states do not)
//! - Pure condition evaluation over a trigger context
//! - `{{path}}` template interpolation in action configuration
//! - Sequential action pipelines with per-action timeouts and cooperative cancellation
//! - A retryable/cancellable execution state machine
//! - Concurrent fan-out dispatch with per-workflow failure isolation
//! - A workflow template library

pub mod actions;
pub mod conditions;
pub mod context;
pub mod dispatch;
pub mod execution;
pub mod library;
pub mod pipeline;
pub mod schedule;
pub mod service;
pub mod templates;
pub mod triggers;
pub mod workflow;

pub use actions::{ActionExecutor, ActionExecutorRegistry, ActionResult};
pub use conditions::{Combinator, ConditionOperator, ConditionRule, ConditionSet};
pub use context::TriggerContext;
pub use dispatch::{Dispatcher, TestOutcome};
pub use execution::{
    ExecutionManager, ExecutionStatus, ExecutionStore, InMemoryExecutionStore,
    InMemoryWorkflowStore, WorkflowExecution, WorkflowSource, WorkflowStore,
};
pub use library::{TemplateLibrary, TemplateParameter, WorkflowTemplate};
pub use pipeline::{ActionPipeline, CancelFlag, FailurePolicy, PipelineOutcome};
pub use schedule::{Clock, CronSchedule, OccurrenceLedger, ScheduleRunner, SystemClock};
pub use service::AutomationService;
pub use triggers::{SignalSample, Stimulus};
pub use workflow::{
    FieldFilter, HealthState, SignalCondition, TriggerConfig, TriggerType, Workflow,
    WorkflowAction,
};

use forge_core::{ExecutionId, WorkflowId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("Invalid trigger configuration: {0}")]
    InvalidTriggerConfig(String),

    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("Execution {id} cannot be cancelled from status {status}")]
    NotCancellable {
        id: ExecutionId,
        status: execution::ExecutionStatus,
    },

    #[error("Execution {id} cannot be retried from status {status}")]
    NotRetryable {
        id: ExecutionId,
        status: execution::ExecutionStatus,
    },

    #[error("Action failed: {0}")]
    ActionFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] forge_core::AppError),
}

pub type Result<T> = std::result::Result<T, AutomationError>;
