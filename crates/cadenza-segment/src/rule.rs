// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The segment rule tree: a closed typed sum over the JSON DSL.
//!
//! Grammar:
//! - Leaf: `{"attribute": ..., "operator": ..., "value": ...}`
//! - Composite: `{"logic": "AND"|"OR", "conditions": [node, ...]}`
//!
//! Unknown operators, logic tags, and value shapes are rejected at parse
//! time, never at evaluation.

use cadenza_core::types::{ConsentState, Recipient};
use cadenza_core::CadenzaError;
use regex::Regex;
use serde_json::Value;

/// The reserved attribute addressing the consent column instead of the bag.
pub const CONSENT_ATTRIBUTE: &str = "consent_state";

/// Leaf comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Exists,
    Gt,
    Lt,
    Gte,
    Lte,
    Matches,
}

impl Operator {
    fn parse(s: &str) -> Option<Operator> {
        Some(match s {
            "equals" => Operator::Equals,
            "not_equals" => Operator::NotEquals,
            "in" => Operator::In,
            "not_in" => Operator::NotIn,
            "exists" => Operator::Exists,
            "gt" => Operator::Gt,
            "lt" => Operator::Lt,
            "gte" => Operator::Gte,
            "lte" => Operator::Lte,
            "matches" => Operator::Matches,
            _ => return None,
        })
    }
}

/// One leaf condition over a recipient attribute (or the consent column).
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub attribute: String,
    pub operator: Operator,
    pub value: Value,
}

/// The closed rule tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Leaf(Condition),
    All(Vec<Rule>),
    Any(Vec<Rule>),
}

impl Rule {
    /// A rule matching every recipient (used when a campaign has no segment).
    pub fn match_all() -> Rule {
        Rule::All(Vec::new())
    }

    /// Parses and validates a JSON rule tree.
    pub fn parse(value: &Value) -> Result<Rule, CadenzaError> {
        let obj = value
            .as_object()
            .ok_or_else(|| CadenzaError::Validation("rule node must be an object".into()))?;

        if let Some(logic) = obj.get("logic") {
            let conditions = obj
                .get("conditions")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    CadenzaError::Validation("composite node requires a conditions array".into())
                })?;
            let children = conditions
                .iter()
                .map(Rule::parse)
                .collect::<Result<Vec<_>, _>>()?;
            return match logic.as_str() {
                Some("AND") => Ok(Rule::All(children)),
                Some("OR") => Ok(Rule::Any(children)),
                other => Err(CadenzaError::Validation(format!(
                    "unknown logic tag {other:?}, expected \"AND\" or \"OR\""
                ))),
            };
        }

        let attribute = obj
            .get("attribute")
            .and_then(Value::as_str)
            .ok_or_else(|| CadenzaError::Validation("leaf node requires an attribute".into()))?;
        let operator_raw = obj
            .get("operator")
            .and_then(Value::as_str)
            .ok_or_else(|| CadenzaError::Validation("leaf node requires an operator".into()))?;
        let operator = Operator::parse(operator_raw).ok_or_else(|| {
            CadenzaError::Validation(format!("unknown operator \"{operator_raw}\""))
        })?;
        let value = obj.get("value").cloned().unwrap_or(Value::Null);

        validate_value_shape(operator, &value)?;
        Ok(Rule::Leaf(Condition {
            attribute: attribute.to_string(),
            operator,
            value,
        }))
    }

    /// Evaluates this rule against one recipient in memory.
    pub fn matches(&self, recipient: &Recipient) -> bool {
        match self {
            Rule::Leaf(condition) => condition.matches(recipient),
            Rule::All(children) => children.iter().all(|r| r.matches(recipient)),
            Rule::Any(children) => children.iter().any(|r| r.matches(recipient)),
        }
    }
}

fn validate_value_shape(operator: Operator, value: &Value) -> Result<(), CadenzaError> {
    match operator {
        Operator::In | Operator::NotIn => {
            if !value.is_array() {
                return Err(CadenzaError::Validation(format!(
                    "operator {operator:?} requires an array value"
                )));
            }
        }
        Operator::Matches => {
            let pattern = value.as_str().ok_or_else(|| {
                CadenzaError::Validation("matches requires a string pattern".into())
            })?;
            anchored(pattern)
                .map_err(|e| CadenzaError::Validation(format!("invalid matches pattern: {e}")))?;
        }
        Operator::Exists => {}
        Operator::Gt | Operator::Lt | Operator::Gte | Operator::Lte => {
            if as_number(value).is_none() {
                return Err(CadenzaError::Validation(format!(
                    "operator {operator:?} requires a numeric value"
                )));
            }
        }
        Operator::Equals | Operator::NotEquals => {
            if !(value.is_string() || value.is_number() || value.is_boolean()) {
                return Err(CadenzaError::Validation(format!(
                    "operator {operator:?} requires a scalar value"
                )));
            }
        }
    }
    Ok(())
}

impl Condition {
    /// In-memory evaluation over the recipient's attribute bag, or the
    /// consent column for the reserved attribute.
    ///
    /// A missing attribute fails every operator, matching the SQL NULL
    /// semantics of the pushed-down fragments.
    pub fn matches(&self, recipient: &Recipient) -> bool {
        let consent_value;
        let actual = if self.attribute == CONSENT_ATTRIBUTE {
            consent_value = Value::String(recipient.consent_state.to_string());
            Some(&consent_value)
        } else {
            recipient.attributes.get(&self.attribute)
        };
        let Some(actual) = actual else {
            return false;
        };
        if actual.is_null() {
            return false;
        }

        match self.operator {
            Operator::Exists => true,
            Operator::Equals => loose_eq(actual, &self.value),
            Operator::NotEquals => !loose_eq(actual, &self.value),
            Operator::In => self
                .value
                .as_array()
                .is_some_and(|arr| arr.iter().any(|v| loose_eq(actual, v))),
            Operator::NotIn => self
                .value
                .as_array()
                .is_some_and(|arr| !arr.iter().any(|v| loose_eq(actual, v))),
            Operator::Gt => numeric_cmp(actual, &self.value).is_some_and(|o| o.is_gt()),
            Operator::Lt => numeric_cmp(actual, &self.value).is_some_and(|o| o.is_lt()),
            Operator::Gte => numeric_cmp(actual, &self.value).is_some_and(|o| o.is_ge()),
            Operator::Lte => numeric_cmp(actual, &self.value).is_some_and(|o| o.is_le()),
            Operator::Matches => {
                let Some(pattern) = self.value.as_str() else {
                    return false;
                };
                let Ok(re) = anchored(pattern) else {
                    return false;
                };
                scalar_text(actual).is_some_and(|s| re.is_match(&s))
            }
        }
    }
}

/// Scalar comparison: numbers numerically, everything else by text.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x == y;
    }
    match (scalar_text(a), scalar_text(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Comparison operators require both sides to parse as numbers; numeric
/// strings are accepted.
fn numeric_cmp(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    let x = as_number(a)?;
    let y = as_number(b)?;
    x.partial_cmp(&y)
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Compiles `pattern` as an anchored regular expression.
fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

/// A leaf asserting the recipient is opted in; implicitly AND-ed at the
/// root of every evaluation.
pub fn opt_in_condition() -> Condition {
    Condition {
        attribute: CONSENT_ATTRIBUTE.to_string(),
        operator: Operator::Equals,
        value: Value::String(ConsentState::OptIn.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_core::types::AttributeMap;
    use chrono::Utc;
    use serde_json::json;

    fn recipient(pairs: &[(&str, Value)], consent: ConsentState) -> Recipient {
        let attributes: AttributeMap = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Recipient {
            phone: "+14155550001".into(),
            attributes,
            consent_state: consent,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn parses_nested_composites() {
        let rule = Rule::parse(&json!({
            "logic": "AND",
            "conditions": [
                {"attribute": "city", "operator": "equals", "value": "Austin"},
                {"logic": "OR", "conditions": [
                    {"attribute": "plan", "operator": "in", "value": ["pro", "team"]},
                    {"attribute": "age", "operator": "gte", "value": 21},
                ]},
            ],
        }))
        .unwrap();
        match rule {
            Rule::All(children) => assert_eq!(children.len(), 2),
            other => panic!("expected All, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_tags() {
        assert!(Rule::parse(&json!({"logic": "XOR", "conditions": []})).is_err());
        assert!(Rule::parse(&json!({"attribute": "a", "operator": "almost", "value": 1})).is_err());
        assert!(Rule::parse(&json!({"conditions": []})).is_err());
        assert!(Rule::parse(&json!(42)).is_err());
    }

    #[test]
    fn rejects_bad_value_shapes() {
        assert!(Rule::parse(&json!({"attribute": "a", "operator": "in", "value": "x"})).is_err());
        assert!(Rule::parse(&json!({"attribute": "a", "operator": "gt", "value": "abc"})).is_err());
        assert!(
            Rule::parse(&json!({"attribute": "a", "operator": "matches", "value": "("})).is_err()
        );
        assert!(
            Rule::parse(&json!({"attribute": "a", "operator": "equals", "value": [1]})).is_err()
        );
    }

    #[test]
    fn equals_compares_loosely() {
        let r = recipient(&[("age", json!(30)), ("city", json!("Austin"))], ConsentState::OptIn);
        let age_eq = Condition {
            attribute: "age".into(),
            operator: Operator::Equals,
            value: json!("30"),
        };
        assert!(age_eq.matches(&r));
        let city_eq = Condition {
            attribute: "city".into(),
            operator: Operator::Equals,
            value: json!("Boston"),
        };
        assert!(!city_eq.matches(&r));
    }

    #[test]
    fn missing_attribute_fails_every_operator() {
        let r = recipient(&[], ConsentState::OptIn);
        for (operator, value) in [
            (Operator::Equals, json!("x")),
            (Operator::NotEquals, json!("x")),
            (Operator::In, json!(["x"])),
            (Operator::NotIn, json!(["x"])),
            (Operator::Exists, Value::Null),
            (Operator::Gt, json!(1)),
            (Operator::Matches, json!(".*")),
        ] {
            let c = Condition {
                attribute: "ghost".into(),
                operator,
                value,
            };
            assert!(!c.matches(&r), "{operator:?} matched a missing attribute");
        }
    }

    #[test]
    fn numeric_comparisons_require_numbers() {
        let r = recipient(&[("age", json!("41")), ("name", json!("Ada"))], ConsentState::OptIn);
        let gt = Condition {
            attribute: "age".into(),
            operator: Operator::Gt,
            value: json!(40),
        };
        assert!(gt.matches(&r));
        let bad = Condition {
            attribute: "name".into(),
            operator: Operator::Gt,
            value: json!(40),
        };
        assert!(!bad.matches(&r));
    }

    #[test]
    fn matches_is_anchored() {
        let r = recipient(&[("city", json!("Austin"))], ConsentState::OptIn);
        let partial = Condition {
            attribute: "city".into(),
            operator: Operator::Matches,
            value: json!("Aus"),
        };
        assert!(!partial.matches(&r));
        let full = Condition {
            attribute: "city".into(),
            operator: Operator::Matches,
            value: json!("Aus.*"),
        };
        assert!(full.matches(&r));
    }

    #[test]
    fn consent_attribute_reads_column() {
        let r = recipient(&[], ConsentState::Stop);
        assert!(!opt_in_condition().matches(&r));
        let stop = Condition {
            attribute: CONSENT_ATTRIBUTE.into(),
            operator: Operator::Equals,
            value: json!("STOP"),
        };
        assert!(stop.matches(&r));
    }
}
