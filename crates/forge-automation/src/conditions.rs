//! Condition evaluation
//!
//! Pure, side-effect-free predicate evaluation over a trigger context.
//! A malformed rule (wrong value shape, unparseable date or duration)
//! evaluates to `false` so a broken condition fails safe as "no match"
//! instead of crashing dispatch for other workflows.

use crate::context::TriggerContext;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the rules of a condition set combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Contains,
    GreaterThan,
    LessThan,
    OlderThan,
    NewerThan,
    IsNull,
    IsNotNull,
}

/// A single rule: `field <operator> value`, with `field` resolved by
/// dot-path lookup into the trigger context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionRule {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

impl ConditionRule {
    pub fn new(field: &str, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
        }
    }
}

/// A flat list of rules under a single combinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionSet {
    pub combinator: Combinator,
    pub rules: Vec<ConditionRule>,
}

impl ConditionSet {
    pub fn all(rules: Vec<ConditionRule>) -> Self {
        Self {
            combinator: Combinator::And,
            rules,
        }
    }

    pub fn any(rules: Vec<ConditionRule>) -> Self {
        Self {
            combinator: Combinator::Or,
            rules,
        }
    }
}

/// Evaluate a workflow's conditions against a trigger context.
///
/// No conditions and an empty rule list are both vacuously true, under
/// either combinator.
pub fn evaluate(conditions: Option<&ConditionSet>, context: &TriggerContext) -> bool {
    let Some(set) = conditions else {
        return true;
    };

    if set.rules.is_empty() {
        return true;
    }

    match set.combinator {
        Combinator::And => set.rules.iter().all(|rule| rule_matches(rule, context)),
        Combinator::Or => set.rules.iter().any(|rule| rule_matches(rule, context)),
    }
}

fn rule_matches(rule: &ConditionRule, context: &TriggerContext) -> bool {
    let field = context.lookup(&rule.field);

    match rule.operator {
        ConditionOperator::Equals => field.map(|v| *v == rule.value).unwrap_or(false),
        ConditionOperator::NotEquals => field.map(|v| *v != rule.value).unwrap_or(true),
        ConditionOperator::In => match (field, rule.value.as_array()) {
            (Some(v), Some(set)) => set.contains(v),
            _ => false,
        },
        ConditionOperator::NotIn => match (field, rule.value.as_array()) {
            (Some(v), Some(set)) => !set.contains(v),
            // An absent field is never a member of any set.
            (None, Some(_)) => true,
            _ => false,
        },
        ConditionOperator::Contains => match field {
            Some(Value::String(s)) => rule
                .value
                .as_str()
                .map(|needle| s.contains(needle))
                .unwrap_or(false),
            Some(Value::Array(items)) => items.contains(&rule.value),
            _ => false,
        },
        ConditionOperator::GreaterThan => match (field.and_then(as_number), as_number(&rule.value))
        {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        ConditionOperator::LessThan => match (field.and_then(as_number), as_number(&rule.value)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        ConditionOperator::OlderThan => match (field.and_then(parse_instant), rule_duration(rule))
        {
            (Some(instant), Some(duration)) => Utc::now() - instant > duration,
            _ => false,
        },
        ConditionOperator::NewerThan => match (field.and_then(parse_instant), rule_duration(rule))
        {
            (Some(instant), Some(duration)) => Utc::now() - instant < duration,
            _ => false,
        },
        ConditionOperator::IsNull => matches!(field, None | Some(Value::Null)),
        ConditionOperator::IsNotNull => matches!(field, Some(v) if !v.is_null()),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn rule_duration(rule: &ConditionRule) -> Option<Duration> {
    rule.value.as_str().and_then(parse_duration)
}

/// Parse a duration of the `"<n>h"` or `"<n>d"` form.
pub(crate) fn parse_duration(spec: &str) -> Option<Duration> {
    let spec = spec.trim();
    let (amount, make) = if let Some(n) = spec.strip_suffix('h') {
        (n, Duration::hours as fn(i64) -> Duration)
    } else if let Some(n) = spec.strip_suffix('d') {
        (n, Duration::days as fn(i64) -> Duration)
    } else {
        return None;
    };

    let amount: i64 = amount.parse().ok()?;
    if amount < 0 {
        return None;
    }
    Some(make(amount))
}

/// Parse a field value as an instant: RFC 3339 string or epoch milliseconds.
pub(crate) fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| DateTime::from_timestamp_millis(millis)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> TriggerContext {
        TriggerContext::from_value(value)
    }

    #[test]
    fn test_no_conditions_always_matches() {
        assert!(evaluate(None, &ctx(json!({}))));
        assert!(evaluate(None, &ctx(json!({"entity": {"status": "x"}}))));
    }

    #[test]
    fn test_empty_rule_list_is_vacuously_true() {
        let and = ConditionSet::all(vec![]);
        let or = ConditionSet::any(vec![]);
        assert!(evaluate(Some(&and), &ctx(json!({}))));
        assert!(evaluate(Some(&or), &ctx(json!({}))));
    }

    #[test]
    fn test_equals() {
        let set = ConditionSet::all(vec![ConditionRule::new(
            "entity.status",
            ConditionOperator::Equals,
            json!("blocked"),
        )]);

        assert!(evaluate(Some(&set), &ctx(json!({"entity": {"status": "blocked"}}))));
        assert!(!evaluate(Some(&set), &ctx(json!({"entity": {"status": "done"}}))));
        assert!(!evaluate(Some(&set), &ctx(json!({"entity": {}}))));
    }

    #[test]
    fn test_not_equals_with_absent_field() {
        let set = ConditionSet::all(vec![ConditionRule::new(
            "entity.status",
            ConditionOperator::NotEquals,
            json!("blocked"),
        )]);

        assert!(evaluate(Some(&set), &ctx(json!({"entity": {"status": "done"}}))));
        assert!(evaluate(Some(&set), &ctx(json!({}))));
        assert!(!evaluate(Some(&set), &ctx(json!({"entity": {"status": "blocked"}}))));
    }

    #[test]
    fn test_membership() {
        let rule = |op| {
            ConditionSet::all(vec![ConditionRule::new(
                "entity.priority",
                op,
                json!(["high", "urgent"]),
            )])
        };

        let high = ctx(json!({"entity": {"priority": "high"}}));
        let low = ctx(json!({"entity": {"priority": "low"}}));
        let absent = ctx(json!({}));

        assert!(evaluate(Some(&rule(ConditionOperator::In)), &high));
        assert!(!evaluate(Some(&rule(ConditionOperator::In)), &low));
        assert!(!evaluate(Some(&rule(ConditionOperator::In)), &absent));

        assert!(!evaluate(Some(&rule(ConditionOperator::NotIn)), &high));
        assert!(evaluate(Some(&rule(ConditionOperator::NotIn)), &low));
        assert!(evaluate(Some(&rule(ConditionOperator::NotIn)), &absent));
    }

    #[test]
    fn test_membership_requires_array_value() {
        let set = ConditionSet::all(vec![ConditionRule::new(
            "entity.priority",
            ConditionOperator::In,
            json!("high"),
        )]);
        assert!(!evaluate(Some(&set), &ctx(json!({"entity": {"priority": "high"}}))));
    }

    #[test]
    fn test_contains_string_and_array() {
        let substring = ConditionSet::all(vec![ConditionRule::new(
            "entity.title",
            ConditionOperator::Contains,
            json!("urgent"),
        )]);
        assert!(evaluate(
            Some(&substring),
            &ctx(json!({"entity": {"title": "this is urgent: fix"}}))
        ));
        assert!(!evaluate(
            Some(&substring),
            &ctx(json!({"entity": {"title": "routine"}}))
        ));

        let element = ConditionSet::all(vec![ConditionRule::new(
            "entity.tags",
            ConditionOperator::Contains,
            json!("infra"),
        )]);
        assert!(evaluate(
            Some(&element),
            &ctx(json!({"entity": {"tags": ["infra", "ops"]}}))
        ));
    }

    #[test]
    fn test_numeric_comparison() {
        let set = ConditionSet::all(vec![ConditionRule::new(
            "entity.size",
            ConditionOperator::GreaterThan,
            json!(10),
        )]);

        assert!(evaluate(Some(&set), &ctx(json!({"entity": {"size": 11}}))));
        assert!(!evaluate(Some(&set), &ctx(json!({"entity": {"size": 10}}))));
        // Non-numeric operand makes the rule false, not an error.
        assert!(!evaluate(Some(&set), &ctx(json!({"entity": {"size": "big"}}))));
    }

    #[test]
    fn test_older_than() {
        let set = ConditionSet::all(vec![ConditionRule::new(
            "entity.created_at",
            ConditionOperator::OlderThan,
            json!("24h"),
        )]);

        let thirty_hours_ago = (Utc::now() - Duration::hours(30)).to_rfc3339();
        let ten_hours_ago = (Utc::now() - Duration::hours(10)).to_rfc3339();

        assert!(evaluate(
            Some(&set),
            &ctx(json!({"entity": {"created_at": thirty_hours_ago}}))
        ));
        assert!(!evaluate(
            Some(&set),
            &ctx(json!({"entity": {"created_at": ten_hours_ago}}))
        ));
        // Malformed date fails safe.
        assert!(!evaluate(
            Some(&set),
            &ctx(json!({"entity": {"created_at": "not-a-date"}}))
        ));
    }

    #[test]
    fn test_newer_than_with_epoch_millis() {
        let set = ConditionSet::all(vec![ConditionRule::new(
            "entity.updated_at",
            ConditionOperator::NewerThan,
            json!("2d"),
        )]);

        let yesterday = (Utc::now() - Duration::days(1)).timestamp_millis();
        assert!(evaluate(
            Some(&set),
            &ctx(json!({"entity": {"updated_at": yesterday}}))
        ));
    }

    #[test]
    fn test_malformed_duration_fails_safe() {
        let set = ConditionSet::all(vec![ConditionRule::new(
            "entity.created_at",
            ConditionOperator::OlderThan,
            json!("soon"),
        )]);
        let past = (Utc::now() - Duration::days(5)).to_rfc3339();
        assert!(!evaluate(Some(&set), &ctx(json!({"entity": {"created_at": past}}))));
    }

    #[test]
    fn test_null_checks() {
        let is_null = ConditionSet::all(vec![ConditionRule::new(
            "entity.assignee",
            ConditionOperator::IsNull,
            Value::Null,
        )]);

        assert!(evaluate(Some(&is_null), &ctx(json!({"entity": {}}))));
        assert!(evaluate(Some(&is_null), &ctx(json!({"entity": {"assignee": null}}))));
        assert!(!evaluate(Some(&is_null), &ctx(json!({"entity": {"assignee": "mia"}}))));

        let is_not_null = ConditionSet::all(vec![ConditionRule::new(
            "entity.assignee",
            ConditionOperator::IsNotNull,
            Value::Null,
        )]);
        assert!(evaluate(Some(&is_not_null), &ctx(json!({"entity": {"assignee": "mia"}}))));
        assert!(!evaluate(Some(&is_not_null), &ctx(json!({"entity": {}}))));
    }

    #[test]
    fn test_or_combinator() {
        let set = ConditionSet::any(vec![
            ConditionRule::new("entity.status", ConditionOperator::Equals, json!("blocked")),
            ConditionRule::new("entity.status", ConditionOperator::Equals, json!("stale")),
        ]);

        assert!(evaluate(Some(&set), &ctx(json!({"entity": {"status": "stale"}}))));
        assert!(!evaluate(Some(&set), &ctx(json!({"entity": {"status": "done"}}))));
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("24h"), Some(Duration::hours(24)));
        assert_eq!(parse_duration("7d"), Some(Duration::days(7)));
        assert_eq!(parse_duration("30m"), None);
        assert_eq!(parse_duration("h"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("-1d"), None);
    }
}
