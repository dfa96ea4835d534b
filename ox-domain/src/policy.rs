//! Sponsor policy rules and pure evaluation.
//!
//! A policy is an ordered rule list; each rule has predicates over dotted
//! field paths of a `{agent, env}` context document and an action. The first
//! rule whose predicates all hold wins.

use crate::value_objects::ThrottleProfile;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One rule: all predicates must match for the action to apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub predicates: Vec<Predicate>,
    pub action: PolicyAction,
}

/// Predicate over a dotted path into the evaluation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Predicate {
    pub path: String,
    pub op: PredicateOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
}

/// Action taken when a rule matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyAction {
    AllocateDelta { amount: Decimal },
    SetProvider { provider: String },
    SetProfile { profile: ThrottleProfile },
    Redeploy { target: String },
}

/// Outcome of evaluating a rule list against one context.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleMatch {
    /// 0-based index of the first matching rule, with its action.
    Matched { rule_index: usize, action: PolicyAction },
    NoMatch,
}

/// Evaluate rules in order; first full predicate match wins.
pub fn evaluate_rules(rules: &[PolicyRule], context: &Value) -> RuleMatch {
    for (idx, rule) in rules.iter().enumerate() {
        if rule.predicates.iter().all(|p| evaluate_predicate(p, context)) {
            return RuleMatch::Matched {
                rule_index: idx,
                action: rule.action.clone(),
            };
        }
    }
    RuleMatch::NoMatch
}

fn evaluate_predicate(predicate: &Predicate, context: &Value) -> bool {
    let actual = match lookup_path(context, &predicate.path) {
        Some(v) => v,
        None => return false,
    };

    match predicate.op {
        PredicateOp::Eq => json_eq(actual, &predicate.value),
        PredicateOp::Neq => !json_eq(actual, &predicate.value),
        PredicateOp::Gt | PredicateOp::Gte | PredicateOp::Lt | PredicateOp::Lte => {
            let (a, b) = match (actual.as_f64(), predicate.value.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return false,
            };
            match predicate.op {
                PredicateOp::Gt => a > b,
                PredicateOp::Gte => a >= b,
                PredicateOp::Lt => a < b,
                PredicateOp::Lte => a <= b,
                _ => unreachable!(),
            }
        }
        PredicateOp::In => predicate
            .value
            .as_array()
            .map(|set| set.iter().any(|v| json_eq(actual, v)))
            .unwrap_or(false),
        PredicateOp::NotIn => predicate
            .value
            .as_array()
            .map(|set| !set.iter().any(|v| json_eq(actual, v)))
            .unwrap_or(false),
    }
}

/// Numeric-aware equality: 10 == 10.0, everything else is structural.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Walk a dotted path through nested objects.
fn lookup_path<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "agent": {
                "status": "active",
                "balance": 12,
                "provider": "none",
                "profile": "normal"
            },
            "env": {
                "cognition_availability": "degraded",
                "throttle_factor": 2.5
            }
        })
    }

    #[test]
    fn test_first_match_wins() {
        let rules: Vec<PolicyRule> = serde_json::from_value(json!([
            {
                "predicates": [{"path": "agent.balance", "op": "lt", "value": 10}],
                "action": {"type": "allocate_delta", "amount": "50"}
            },
            {
                "predicates": [{"path": "agent.balance", "op": "lt", "value": 100}],
                "action": {"type": "set_profile", "profile": "conservative"}
            }
        ]))
        .unwrap();

        match evaluate_rules(&rules, &ctx()) {
            RuleMatch::Matched { rule_index, action } => {
                assert_eq!(rule_index, 1);
                assert_eq!(
                    action,
                    PolicyAction::SetProfile { profile: ThrottleProfile::Conservative }
                );
            }
            RuleMatch::NoMatch => panic!("expected a match"),
        }
    }

    #[test]
    fn test_all_predicates_must_hold() {
        let rules: Vec<PolicyRule> = serde_json::from_value(json!([
            {
                "predicates": [
                    {"path": "agent.status", "op": "eq", "value": "active"},
                    {"path": "env.cognition_availability", "op": "eq", "value": "full"}
                ],
                "action": {"type": "redeploy", "target": "world-2"}
            }
        ]))
        .unwrap();

        assert_eq!(evaluate_rules(&rules, &ctx()), RuleMatch::NoMatch);
    }

    #[test]
    fn test_in_and_not_in() {
        let rules: Vec<PolicyRule> = serde_json::from_value(json!([
            {
                "predicates": [
                    {"path": "agent.profile", "op": "in", "value": ["normal", "aggressive"]},
                    {"path": "agent.provider", "op": "not_in", "value": ["premium"]}
                ],
                "action": {"type": "set_provider", "provider": "baseline"}
            }
        ]))
        .unwrap();

        assert!(matches!(
            evaluate_rules(&rules, &ctx()),
            RuleMatch::Matched { rule_index: 0, .. }
        ));
    }

    #[test]
    fn test_missing_path_never_matches() {
        let rules: Vec<PolicyRule> = serde_json::from_value(json!([
            {
                "predicates": [{"path": "agent.nonexistent", "op": "neq", "value": 1}],
                "action": {"type": "redeploy", "target": "w"}
            }
        ]))
        .unwrap();

        assert_eq!(evaluate_rules(&rules, &ctx()), RuleMatch::NoMatch);
    }

    #[test]
    fn test_numeric_comparison_across_types() {
        let rules: Vec<PolicyRule> = serde_json::from_value(json!([
            {
                "predicates": [{"path": "env.throttle_factor", "op": "gte", "value": 2}],
                "action": {"type": "set_profile", "profile": "paused"}
            }
        ]))
        .unwrap();

        assert!(matches!(evaluate_rules(&rules, &ctx()), RuleMatch::Matched { .. }));
    }
}
