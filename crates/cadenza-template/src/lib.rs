// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic `{name}` placeholder substitution with strict
//! variable-presence checks.
//!
//! Placeholders are single-brace, alphanumeric plus underscore. Every
//! declared variable (and every placeholder in the content) must resolve to
//! a non-empty value or rendering fails with the full missing list. No
//! escaping is performed; structural content validation happens separately
//! at dispatch time.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("placeholder regex"));

/// Maximum rendered content length accepted at dispatch.
pub const MAX_CONTENT_LEN: usize = 4096;

/// Rendering failed because variables were missing or empty.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("missing template variables: {}", missing.join(", "))]
pub struct MissingVariables {
    pub missing: Vec<String>,
}

/// Structural validation failure for rendered content.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct InvalidContent(pub String);

/// All placeholder names appearing in `content`, in order, deduplicated.
pub fn extract_placeholders(content: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in PLACEHOLDER_RE.captures_iter(content) {
        let name = cap[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Renders `content`, substituting every placeholder from `attrs`.
///
/// `declared` is the template's variable list; each declared variable and
/// each placeholder must have a non-empty attribute value. Empty strings,
/// nulls, and empty collections count as missing.
pub fn render(
    content: &str,
    declared: &[String],
    attrs: &serde_json::Map<String, Value>,
) -> Result<String, MissingVariables> {
    let mut required = extract_placeholders(content);
    for var in declared {
        if !required.contains(var) {
            required.push(var.clone());
        }
    }

    let missing: Vec<String> = required
        .iter()
        .filter(|name| attribute_text(attrs.get(name.as_str())).is_none())
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(MissingVariables { missing });
    }

    let rendered = PLACEHOLDER_RE.replace_all(content, |caps: &regex::Captures<'_>| {
        // Presence was verified above; fall back to the raw token defensively.
        attribute_text(attrs.get(&caps[1])).unwrap_or_else(|| caps[0].to_string())
    });
    Ok(rendered.into_owned())
}

/// Structural checks applied to rendered content right before dispatch:
/// non-empty, bounded length, and no residual placeholder token.
pub fn validate_content(content: &str) -> Result<(), InvalidContent> {
    if content.trim().is_empty() {
        return Err(InvalidContent("rendered content is empty".into()));
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(InvalidContent(format!(
            "rendered content exceeds {MAX_CONTENT_LEN} characters"
        )));
    }
    if let Some(cap) = PLACEHOLDER_RE.captures(content) {
        return Err(InvalidContent(format!(
            "rendered content contains unsubstituted placeholder {{{}}}",
            &cap[1]
        )));
    }
    Ok(())
}

/// The textual form of an attribute value, or `None` when it counts as
/// missing for rendering purposes.
fn attribute_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, Value)]) -> serde_json::Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn substitutes_all_placeholders() {
        let out = render(
            "Hi {name}, the {item} is ready in {city}.",
            &["name".into(), "item".into(), "city".into()],
            &attrs(&[
                ("name", json!("Ada")),
                ("item", json!("order")),
                ("city", json!("Austin")),
            ]),
        )
        .unwrap();
        assert_eq!(out, "Hi Ada, the order is ready in Austin.");
    }

    #[test]
    fn numbers_and_bools_render() {
        let out = render(
            "Count: {count}, active: {active}",
            &[],
            &attrs(&[("count", json!(3)), ("active", json!(true))]),
        )
        .unwrap();
        assert_eq!(out, "Count: 3, active: true");
    }

    #[test]
    fn missing_variable_fails_with_full_list() {
        let err = render(
            "Hi {name} from {city}",
            &["name".into(), "city".into()],
            &attrs(&[("name", json!("Ada"))]),
        )
        .unwrap_err();
        assert_eq!(err.missing, vec!["city".to_string()]);
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let err = render("Hi {name}", &["name".into()], &attrs(&[("name", json!(""))]))
            .unwrap_err();
        assert_eq!(err.missing, vec!["name".to_string()]);
    }

    #[test]
    fn null_and_collections_count_as_missing() {
        for value in [json!(null), json!([1, 2]), json!({"a": 1})] {
            let err = render("Hi {v}", &[], &attrs(&[("v", value)])).unwrap_err();
            assert_eq!(err.missing, vec!["v".to_string()]);
        }
    }

    #[test]
    fn declared_variable_absent_from_content_still_required() {
        let err = render("no placeholders", &["name".into()], &attrs(&[])).unwrap_err();
        assert_eq!(err.missing, vec!["name".to_string()]);
    }

    #[test]
    fn extract_finds_unique_names_in_order() {
        assert_eq!(
            extract_placeholders("{a} {b_2} {a} text {c}"),
            vec!["a", "b_2", "c"]
        );
        assert!(extract_placeholders("no tokens, {not-valid}").is_empty());
    }

    #[test]
    fn content_validation_bounds() {
        assert!(validate_content("hello").is_ok());
        assert!(validate_content("").is_err());
        assert!(validate_content("   ").is_err());
        assert!(validate_content(&"x".repeat(MAX_CONTENT_LEN)).is_ok());
        assert!(validate_content(&"x".repeat(MAX_CONTENT_LEN + 1)).is_err());
        assert!(validate_content("residual {token}").is_err());
    }
}
