//! Trigger matching
//!
//! Decides, for one incoming stimulus and one workflow's trigger
//! configuration, whether the workflow is a candidate. Matching is pure;
//! signal triggers are edge-triggered so a state that merely stays at its
//! target never re-fires.

use crate::context::TriggerContext;
use crate::schedule::CronSchedule;
use crate::workflow::{HealthState, SignalCondition, TriggerConfig, TriggerType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One observation of a metric signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalSample {
    pub health: HealthState,
    pub value: f64,
}

impl SignalSample {
    pub fn new(health: HealthState, value: f64) -> Self {
        Self { health, value }
    }
}

/// An incoming occurrence evaluated against trigger configurations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Stimulus {
    Event {
        event_kind: String,
        entity_kind: String,
        /// Context payload, typically `{"entity": {...}, ...}`.
        payload: Value,
    },
    Signal {
        signal_id: String,
        previous: SignalSample,
        current: SignalSample,
    },
    Schedule {
        occurrence: DateTime<Utc>,
    },
    Manual {
        role: Option<String>,
        #[serde(default)]
        payload: Value,
    },
}

impl Stimulus {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Stimulus::Event { .. } => TriggerType::Event,
            Stimulus::Signal { .. } => TriggerType::Signal,
            Stimulus::Schedule { .. } => TriggerType::Schedule,
            Stimulus::Manual { .. } => TriggerType::Manual,
        }
    }

    /// Build the trigger context for this stimulus: event metadata plus the
    /// payload's top-level keys, or the signal/schedule snapshot.
    pub fn to_context(&self) -> TriggerContext {
        let mut context = TriggerContext::new();

        match self {
            Stimulus::Event {
                event_kind,
                entity_kind,
                payload,
            } => {
                context.insert(
                    "event",
                    json!({
                        "kind": event_kind,
                        "entity_kind": entity_kind,
                    }),
                );
                context.merge_object(payload);
            }
            Stimulus::Signal {
                signal_id,
                previous,
                current,
            } => {
                context.insert(
                    "signal",
                    json!({
                        "id": signal_id,
                        "previous": {
                            "health": previous.health.to_string(),
                            "value": previous.value,
                        },
                        "current": {
                            "health": current.health.to_string(),
                            "value": current.value,
                        },
                    }),
                );
            }
            Stimulus::Schedule { occurrence } => {
                context.insert(
                    "schedule",
                    json!({ "occurrence": occurrence.to_rfc3339() }),
                );
            }
            Stimulus::Manual { role, payload } => {
                context.insert("manual", json!({ "role": role }));
                context.merge_object(payload);
            }
        }

        context
    }
}

/// Does this trigger configuration match this stimulus?
pub fn matches(trigger: &TriggerConfig, stimulus: &Stimulus) -> bool {
    match (trigger, stimulus) {
        (
            TriggerConfig::Event {
                event_kinds,
                entity_kinds,
                filters,
            },
            Stimulus::Event {
                event_kind,
                entity_kind,
                ..
            },
        ) => {
            if !event_kinds.contains(event_kind) || !entity_kinds.contains(entity_kind) {
                return false;
            }
            if filters.is_empty() {
                return true;
            }
            let context = stimulus.to_context();
            filters.iter().all(|filter| {
                context
                    .lookup(&filter.field)
                    .map(|v| *v == filter.value)
                    .unwrap_or(false)
            })
        }
        (
            TriggerConfig::Signal {
                signal_id,
                condition,
            },
            Stimulus::Signal {
                signal_id: observed_id,
                previous,
                current,
            },
        ) => {
            if signal_id != observed_id {
                return false;
            }
            match condition {
                // Edge only: the transition into the target state fires,
                // staying at the target does not.
                SignalCondition::HealthBecomes { target } => {
                    previous.health != *target && current.health == *target
                }
                SignalCondition::CrossesThreshold { threshold } => {
                    (previous.value < *threshold) != (current.value < *threshold)
                }
            }
        }
        (TriggerConfig::Schedule { cron, timezone }, Stimulus::Schedule { occurrence }) => {
            CronSchedule::parse(cron, timezone)
                .map(|schedule| schedule.matches(*occurrence))
                .unwrap_or(false)
        }
        (TriggerConfig::Manual { allowed_roles }, Stimulus::Manual { role, .. }) => {
            allowed_roles.is_empty()
                || role
                    .as_ref()
                    .map(|r| allowed_roles.contains(r))
                    .unwrap_or(false)
        }
        _ => false,
    }
}
