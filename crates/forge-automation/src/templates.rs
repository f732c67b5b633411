//! Template interpolation
//!
//! Resolves `{{path.expr}}` placeholders in action configuration against a
//! trigger context. Absent paths resolve to the empty string; resolution
//! never fails.

use crate::context::TriggerContext;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}").unwrap());

/// Replace every `{{path}}` token in `template` with the stringified
/// context lookup. Missing paths become the empty string.
pub fn resolve(template: &str, context: &TriggerContext) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            context.lookup(&caps[1]).map(stringify).unwrap_or_default()
        })
        .into_owned()
}

/// Resolve templates in every string leaf of a configuration tree.
/// Non-string values pass through untouched.
pub fn resolve_config(config: &Value, context: &TriggerContext) -> Value {
    match config {
        Value::String(s) => Value::String(resolve(s, context)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_config(item, context))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, val)| (key.clone(), resolve_config(val, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        composite => serde_json::to_string(composite).unwrap_or_default(),
    }
}
