//! Workflow template library
//!
//! Reusable, parameterized workflow definitions. Applying a template
//! substitutes `{{param}}` placeholders and yields a fresh, disabled
//! workflow the caller reviews and enables explicitly.

use crate::conditions::ConditionSet;
use crate::context::TriggerContext;
use crate::templates;
use crate::workflow::{TriggerConfig, Workflow, WorkflowAction};
use crate::{AutomationError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// One fillable slot in a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateParameter {
    pub key: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

impl TemplateParameter {
    pub fn required(key: &str, description: &str) -> Self {
        Self {
            key: key.to_string(),
            description: description.to_string(),
            required: true,
            default: None,
        }
    }

    pub fn optional(key: &str, description: &str, default: Value) -> Self {
        Self {
            key: key.to_string(),
            description: description.to_string(),
            required: false,
            default: Some(default),
        }
    }
}

/// The shape a resolved template definition must deserialize into.
#[derive(Debug, Deserialize)]
struct ResolvedDefinition {
    name: String,
    trigger: TriggerConfig,
    #[serde(default)]
    conditions: Option<ConditionSet>,
    #[serde(default)]
    actions: Vec<WorkflowAction>,
}

/// A parameterized workflow definition.
///
/// `definition` is a JSON object with `name`, `trigger`, optional
/// `conditions`, and `actions`, whose string values may carry `{{param}}`
/// placeholders keyed by the declared parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub parameters: Vec<TemplateParameter>,
    pub definition: Value,
}

impl WorkflowTemplate {
    /// Resolve placeholders against the given parameter values. Required
    /// parameters must be present; optional ones fall back to defaults.
    fn resolve(&self, params: &HashMap<String, Value>) -> Result<Value> {
        for key in params.keys() {
            if !self.parameters.iter().any(|p| &p.key == key) {
                return Err(AutomationError::InvalidDefinition(format!(
                    "unknown template parameter '{}'",
                    key
                )));
            }
        }

        let mut context = TriggerContext::new();
        for parameter in &self.parameters {
            match params.get(&parameter.key).or(parameter.default.as_ref()) {
                Some(value) => context.insert(&parameter.key, value.clone()),
                None if parameter.required => {
                    return Err(AutomationError::InvalidDefinition(format!(
                        "missing required template parameter '{}'",
                        parameter.key
                    )));
                }
                None => {}
            }
        }

        Ok(templates::resolve_config(&self.definition, &context))
    }

    /// Instantiate a workflow from this template. The result has a fresh id,
    /// is disabled, and has been validated.
    pub fn apply(&self, params: &HashMap<String, Value>) -> Result<Workflow> {
        let resolved: ResolvedDefinition = serde_json::from_value(self.resolve(params)?)?;

        let mut workflow = Workflow::new(&resolved.name, resolved.trigger);
        workflow.conditions = resolved.conditions;
        workflow.actions = resolved.actions;
        workflow.validate()?;

        debug!(template_id = %self.id, workflow_name = %workflow.name, "Applied workflow template");
        Ok(workflow)
    }
}

/// In-memory catalog of workflow templates.
#[derive(Default)]
pub struct TemplateLibrary {
    templates: RwLock<HashMap<String, WorkflowTemplate>>,
}

impl TemplateLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, template: WorkflowTemplate) {
        let mut templates = self.templates.write().await;
        templates.insert(template.id.clone(), template);
    }

    pub async fn list(&self) -> Vec<WorkflowTemplate> {
        let templates = self.templates.read().await;
        let mut all: Vec<_> = templates.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub async fn get(&self, id: &str) -> Option<WorkflowTemplate> {
        let templates = self.templates.read().await;
        templates.get(id).cloned()
    }

    /// The resolved definition without instantiating a workflow, for
    /// review before applying.
    pub async fn preview(&self, id: &str, params: &HashMap<String, Value>) -> Result<Value> {
        let template = self.get(id).await.ok_or_else(|| {
            AutomationError::InvalidDefinition(format!("unknown template '{}'", id))
        })?;
        template.resolve(params)
    }

    pub async fn apply(&self, id: &str, params: &HashMap<String, Value>) -> Result<Workflow> {
        let template = self.get(id).await.ok_or_else(|| {
            AutomationError::InvalidDefinition(format!("unknown template '{}'", id))
        })?;
        template.apply(params)
    }
}
