//! Trigger context: the data a dispatch is evaluated against
//!
//! The context is the union of event metadata, entity snapshot, signal
//! snapshot, and free-form metadata for one dispatch. It is append-only:
//! actions may add output for later actions to reference, but nothing is
//! ever removed or overwritten once recorded.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved top-level key under which action outputs are recorded.
pub const ACTION_OUTPUT_PREFIX: &str = "actions";

/// Append-only accumulator of context data for one dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerContext {
    data: Map<String, Value>,
}

impl TriggerContext {
    pub fn new() -> Self {
        Self { data: Map::new() }
    }

    /// Build a context from a JSON value. Non-object values are stored
    /// under a `data` key so path lookup still has something to find.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self { data: map },
            Value::Null => Self::new(),
            other => {
                let mut data = Map::new();
                data.insert("data".to_string(), other);
                Self { data }
            }
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Merge the top-level keys of a JSON object into the context.
    pub fn merge_object(&mut self, value: &Value) {
        if let Value::Object(map) = value {
            for (key, val) in map {
                self.data.insert(key.clone(), val.clone());
            }
        }
    }

    /// Look up a value by dot path, e.g. `entity.status` or `items.0.id`.
    /// A missing path yields `None`, never an error.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.data.get(first)?;

        for part in parts {
            if let Ok(index) = part.parse::<usize>() {
                current = current.get(index)?;
            } else {
                current = current.get(part)?;
            }
        }

        Some(current)
    }

    /// Record a completed action's output under `actions.<order>.result`,
    /// making it available to later actions' templates.
    pub fn record_action_output(&mut self, order: u32, result: Value) {
        let outputs = self
            .data
            .entry(ACTION_OUTPUT_PREFIX.to_string())
            .or_insert_with(|| Value::Object(Map::new()));

        if let Value::Object(map) = outputs {
            let mut entry = Map::new();
            entry.insert("result".to_string(), result);
            map.insert(order.to_string(), Value::Object(entry));
        }
    }

    /// Snapshot the context as a JSON value (used for `trigger_data`).
    pub fn as_value(&self) -> Value {
        Value::Object(self.data.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
