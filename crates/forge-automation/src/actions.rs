//! Action executors
//!
//! Action effects (notifications, webhooks, record mutation, …) are
//! supplied externally as capabilities and resolved by type tag through
//! the registry; the pipeline never branches on action type itself.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Capability contract an action type implements.
///
/// `config` arrives with templates already resolved. Errors are recorded
/// on the action's result; they never abort the execution.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, config: Value) -> Result<Value>;
}

/// Outcome of one action within one execution. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_type: String,
    /// The workflow action's order at time of execution.
    pub order: u32,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl ActionResult {
    pub fn ok(action_type: &str, order: u32, result: Value) -> Self {
        Self {
            action_type: action_type.to_string(),
            order,
            success: true,
            result: Some(result),
            error: None,
            executed_at: Utc::now(),
        }
    }

    pub fn failed(action_type: &str, order: u32, error: String) -> Self {
        Self {
            action_type: action_type.to_string(),
            order,
            success: false,
            result: None,
            error: Some(error),
            executed_at: Utc::now(),
        }
    }
}

/// Maps an action type tag to its registered executor.
#[derive(Default)]
pub struct ActionExecutorRegistry {
    executors: RwLock<HashMap<String, Arc<dyn ActionExecutor>>>,
}

impl ActionExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, action_type: &str, executor: Arc<dyn ActionExecutor>) {
        let mut executors = self.executors.write().await;
        executors.insert(action_type.to_string(), executor);
        debug!(action_type = %action_type, "Registered action executor");
    }

    pub async fn resolve(&self, action_type: &str) -> Option<Arc<dyn ActionExecutor>> {
        let executors = self.executors.read().await;
        executors.get(action_type).cloned()
    }

    pub async fn registered_types(&self) -> Vec<String> {
        let executors = self.executors.read().await;
        executors.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AutomationError;
    use serde_json::json;

    struct EchoExecutor;

    #[async_trait]
    impl ActionExecutor for EchoExecutor {
        async fn execute(&self, config: Value) -> Result<Value> {
            Ok(config)
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl ActionExecutor for FailingExecutor {
        async fn execute(&self, _config: Value) -> Result<Value> {
            Err(AutomationError::ActionFailed("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = ActionExecutorRegistry::new();
        registry.register("echo", Arc::new(EchoExecutor)).await;

        let executor = registry.resolve("echo").await.unwrap();
        let out = executor.execute(json!({"msg": "hi"})).await.unwrap();
        assert_eq!(out, json!({"msg": "hi"}));

        assert!(registry.resolve("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_executor_errors_are_values() {
        let registry = ActionExecutorRegistry::new();
        registry.register("fail", Arc::new(FailingExecutor)).await;

        let executor = registry.resolve("fail").await.unwrap();
        let err = executor.execute(json!({})).await.unwrap_err();
        assert!(matches!(err, AutomationError::ActionFailed(_)));
    }
}
