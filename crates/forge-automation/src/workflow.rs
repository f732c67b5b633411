//! Workflow definitions and trigger configuration
//!
//! A workflow couples one trigger configuration with optional conditions and
//! an ordered list of actions. Validation happens here, before a workflow is
//! saved or enabled; dispatch assumes pre-validated workflows.

use crate::conditions::{ConditionOperator, ConditionSet};
use crate::schedule::CronSchedule;
use crate::{AutomationError, Result};
use chrono::{DateTime, Utc};
use forge_core::WorkflowId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of stimulus a workflow reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Event,
    Signal,
    Schedule,
    Manual,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerType::Event => write!(f, "event"),
            TriggerType::Signal => write!(f, "signal"),
            TriggerType::Schedule => write!(f, "schedule"),
            TriggerType::Manual => write!(f, "manual"),
        }
    }
}

/// Health classification reported by a metric signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Warning,
    Critical,
    Unknown,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Warning => write!(f, "warning"),
            HealthState::Critical => write!(f, "critical"),
            HealthState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Field-level equality filter for EVENT triggers, using the same
/// path-lookup machinery as condition evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

impl FieldFilter {
    pub fn new(field: &str, value: Value) -> Self {
        Self {
            field: field.to_string(),
            value,
        }
    }
}

/// Edge condition for SIGNAL triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalCondition {
    /// Fires when health transitions into the target state.
    HealthBecomes { target: HealthState },
    /// Fires when the value crosses the threshold in either direction.
    CrossesThreshold { threshold: f64 },
}

/// Trigger configuration, variant keyed by trigger type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    Event {
        event_kinds: Vec<String>,
        entity_kinds: Vec<String>,
        /// Every filter must hold; empty means unfiltered.
        #[serde(default)]
        filters: Vec<FieldFilter>,
    },
    Signal {
        signal_id: String,
        condition: SignalCondition,
    },
    Schedule {
        cron: String,
        timezone: String,
    },
    Manual {
        /// Empty allow-list means unrestricted.
        #[serde(default)]
        allowed_roles: Vec<String>,
    },
}

impl TriggerConfig {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerConfig::Event { .. } => TriggerType::Event,
            TriggerConfig::Signal { .. } => TriggerType::Signal,
            TriggerConfig::Schedule { .. } => TriggerType::Schedule,
            TriggerConfig::Manual { .. } => TriggerType::Manual,
        }
    }

    /// Validate the configuration. Raised at save/enable time, never
    /// during dispatch.
    pub fn validate(&self) -> Result<()> {
        match self {
            TriggerConfig::Event {
                event_kinds,
                entity_kinds,
                filters,
            } => {
                if event_kinds.is_empty() {
                    return Err(AutomationError::InvalidTriggerConfig(
                        "event trigger requires at least one event kind".to_string(),
                    ));
                }
                if entity_kinds.is_empty() {
                    return Err(AutomationError::InvalidTriggerConfig(
                        "event trigger requires at least one entity kind".to_string(),
                    ));
                }
                for filter in filters {
                    if filter.field.is_empty() {
                        return Err(AutomationError::InvalidTriggerConfig(
                            "event filter has an empty field path".to_string(),
                        ));
                    }
                }
                Ok(())
            }
            TriggerConfig::Signal { signal_id, .. } => {
                if signal_id.is_empty() {
                    return Err(AutomationError::InvalidTriggerConfig(
                        "signal trigger requires a signal id".to_string(),
                    ));
                }
                Ok(())
            }
            TriggerConfig::Schedule { cron, timezone } => {
                CronSchedule::parse(cron, timezone)?;
                Ok(())
            }
            TriggerConfig::Manual { .. } => Ok(()),
        }
    }
}

/// One configured action within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowAction {
    /// Action type tag, resolved through the executor registry.
    pub action_type: String,
    /// Position in the pipeline, 1-based.
    pub order: u32,
    /// Configuration passed to the executor after template resolution.
    pub config: Value,
}

impl WorkflowAction {
    pub fn new(action_type: &str, order: u32, config: Value) -> Self {
        Self {
            action_type: action_type.to_string(),
            order,
            config,
        }
    }
}

/// A workflow: trigger, conditions, and an ordered action pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub tenant_id: Option<String>,
    pub name: String,
    pub is_enabled: bool,
    pub trigger: TriggerConfig,
    pub conditions: Option<ConditionSet>,
    pub actions: Vec<WorkflowAction>,
    pub run_count: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(name: &str, trigger: TriggerConfig) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            tenant_id: None,
            name: name.to_string(),
            is_enabled: false,
            trigger,
            conditions: None,
            actions: Vec::new(),
            run_count: 0,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_tenant(mut self, tenant_id: &str) -> Self {
        self.tenant_id = Some(tenant_id.to_string());
        self
    }

    pub fn with_conditions(mut self, conditions: ConditionSet) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn add_action(mut self, action: WorkflowAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn enabled(mut self) -> Self {
        self.is_enabled = true;
        self
    }

    /// Actions sorted by their configured order.
    pub fn actions_in_order(&self) -> Vec<&WorkflowAction> {
        let mut ordered: Vec<&WorkflowAction> = self.actions.iter().collect();
        ordered.sort_by_key(|a| a.order);
        ordered
    }

    /// Validate the definition: trigger config, action ordering, and
    /// condition rule shapes.
    pub fn validate(&self) -> Result<()> {
        self.trigger.validate()?;

        if self.is_enabled && self.actions.is_empty() {
            return Err(AutomationError::InvalidDefinition(
                "an enabled workflow requires at least one action".to_string(),
            ));
        }

        // Orders must be unique, contiguous, ascending 1..=N.
        let mut orders: Vec<u32> = self.actions.iter().map(|a| a.order).collect();
        orders.sort_unstable();
        for (index, order) in orders.iter().enumerate() {
            let expected = (index + 1) as u32;
            if *order != expected {
                return Err(AutomationError::InvalidDefinition(format!(
                    "action orders must be contiguous from 1; expected {} but found {}",
                    expected, order
                )));
            }
        }

        for action in &self.actions {
            if action.action_type.is_empty() {
                return Err(AutomationError::InvalidDefinition(
                    "action has an empty action type".to_string(),
                ));
            }
        }

        if let Some(conditions) = &self.conditions {
            for rule in &conditions.rules {
                match rule.operator {
                    ConditionOperator::In | ConditionOperator::NotIn => {
                        if !rule.value.is_array() {
                            return Err(AutomationError::InvalidDefinition(format!(
                                "rule on '{}' requires an array value",
                                rule.field
                            )));
                        }
                    }
                    ConditionOperator::OlderThan | ConditionOperator::NewerThan => {
                        let valid = rule
                            .value
                            .as_str()
                            .and_then(crate::conditions::parse_duration)
                            .is_some();
                        if !valid {
                            return Err(AutomationError::InvalidDefinition(format!(
                                "rule on '{}' requires a duration value like \"24h\" or \"7d\"",
                                rule.field
                            )));
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::ConditionRule;
    use serde_json::json;

    fn event_trigger() -> TriggerConfig {
        TriggerConfig::Event {
            event_kinds: vec!["updated".to_string()],
            entity_kinds: vec!["item".to_string()],
            filters: Vec::new(),
        }
    }

    #[test]
    fn test_validate_contiguous_orders() {
        let workflow = Workflow::new("wf", event_trigger())
            .add_action(WorkflowAction::new("notify", 1, json!({})))
            .add_action(WorkflowAction::new("assign", 2, json!({})));
        assert!(workflow.validate().is_ok());

        let gapped = Workflow::new("wf", event_trigger())
            .add_action(WorkflowAction::new("notify", 1, json!({})))
            .add_action(WorkflowAction::new("assign", 3, json!({})));
        assert!(gapped.validate().is_err());

        let duplicate = Workflow::new("wf", event_trigger())
            .add_action(WorkflowAction::new("notify", 1, json!({})))
            .add_action(WorkflowAction::new("assign", 1, json!({})));
        assert!(duplicate.validate().is_err());
    }

    #[test]
    fn test_enabled_requires_actions() {
        let empty = Workflow::new("wf", event_trigger());
        assert!(empty.validate().is_ok());

        let enabled_empty = Workflow::new("wf", event_trigger()).enabled();
        assert!(enabled_empty.validate().is_err());
    }

    #[test]
    fn test_event_trigger_requires_kinds() {
        let trigger = TriggerConfig::Event {
            event_kinds: Vec::new(),
            entity_kinds: vec!["item".to_string()],
            filters: Vec::new(),
        };
        assert!(matches!(
            trigger.validate(),
            Err(AutomationError::InvalidTriggerConfig(_))
        ));
    }

    #[test]
    fn test_schedule_trigger_validates_cron() {
        let bad_cron = TriggerConfig::Schedule {
            cron: "not a cron".to_string(),
            timezone: "UTC".to_string(),
        };
        assert!(bad_cron.validate().is_err());

        let bad_tz = TriggerConfig::Schedule {
            cron: "0 9 * * *".to_string(),
            timezone: "Mars/Olympus".to_string(),
        };
        assert!(bad_tz.validate().is_err());

        let good = TriggerConfig::Schedule {
            cron: "*/15 9-17 * * 1-5".to_string(),
            timezone: "Europe/Berlin".to_string(),
        };
        assert!(good.validate().is_ok());
    }

    #[test]
    fn test_condition_shape_validation() {
        let bad_in = Workflow::new("wf", event_trigger())
            .with_conditions(ConditionSet::all(vec![ConditionRule::new(
                "entity.status",
                ConditionOperator::In,
                json!("blocked"),
            )]))
            .add_action(WorkflowAction::new("notify", 1, json!({})));
        assert!(bad_in.validate().is_err());

        let bad_age = Workflow::new("wf", event_trigger())
            .with_conditions(ConditionSet::all(vec![ConditionRule::new(
                "entity.created_at",
                ConditionOperator::OlderThan,
                json!(24),
            )]))
            .add_action(WorkflowAction::new("notify", 1, json!({})));
        assert!(bad_age.validate().is_err());
    }

    #[test]
    fn test_trigger_config_serde_tagging() {
        let trigger = TriggerConfig::Signal {
            signal_id: "cpu".to_string(),
            condition: SignalCondition::HealthBecomes {
                target: HealthState::Critical,
            },
        };

        let value = serde_json::to_value(&trigger).unwrap();
        assert_eq!(value["type"], "signal");
        assert_eq!(value["condition"]["kind"], "health_becomes");
        assert_eq!(value["condition"]["target"], "critical");

        let back: TriggerConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back.trigger_type(), TriggerType::Signal);
    }

    #[test]
    fn test_actions_in_order() {
        let workflow = Workflow::new("wf", event_trigger())
            .add_action(WorkflowAction::new("assign", 2, json!({})))
            .add_action(WorkflowAction::new("notify", 1, json!({})));

        let ordered = workflow.actions_in_order();
        assert_eq!(ordered[0].action_type, "notify");
        assert_eq!(ordered[1].action_type, "assign");
    }
}
