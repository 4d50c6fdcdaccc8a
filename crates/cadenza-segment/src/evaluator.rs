// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Segment evaluation against the recipient store.
//!
//! The evaluator implicitly ANDs `consent_state = OPT_IN` at the root, then
//! splits the root-level conjuncts in two: predicates the store can evaluate
//! (consent column; string-equality and existence over the JSON bag via
//! `json_extract`) are pushed down as SQL, and the residual tree is applied
//! in memory page by page.
//!
//! Output is deduplicated and stable-ordered by phone ascending (the
//! recipient primary key), with an opaque cursor for resumable paging.

use cadenza_core::types::Recipient;
use cadenza_core::CadenzaError;
use cadenza_storage::{RecipientFilter, SqlValue, Store};
use serde_json::Value;

use crate::rule::{opt_in_condition, Condition, Operator, Rule, CONSENT_ATTRIBUTE};

/// One page of evaluation output.
#[derive(Debug, Clone)]
pub struct EvalPage {
    /// Matching recipients, phone ascending.
    pub recipients: Vec<Recipient>,
    /// Cursor for the next page; `None` when the stream is drained.
    pub next_cursor: Option<String>,
}

/// Evaluates rule trees into bounded recipient streams.
#[derive(Clone)]
pub struct SegmentEvaluator {
    store: Store,
    scan_size: usize,
}

impl SegmentEvaluator {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            scan_size: 200,
        }
    }

    /// Overrides the underlying store scan size (tests).
    pub fn with_scan_size(mut self, scan_size: usize) -> Self {
        self.scan_size = scan_size.max(1);
        self
    }

    /// Produces the next page of at most `limit` matching recipients
    /// strictly after `cursor`.
    ///
    /// The cursor tracks the underlying scan position, not the last match,
    /// so resumption never re-examines committed rows.
    pub async fn page(
        &self,
        rule: &Rule,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<EvalPage, CadenzaError> {
        let (filter, residual) = split_pushdown(rule);

        let mut matched = Vec::new();
        let mut scan_cursor = cursor.map(str::to_string);

        loop {
            let page = self
                .store
                .list_recipients_page(filter.clone(), scan_cursor.clone(), self.scan_size)
                .await?;
            let drained = page.len() < self.scan_size;
            let mut last_scanned = scan_cursor;

            for recipient in page {
                last_scanned = Some(recipient.phone.clone());
                let keep = match &residual {
                    Some(residual_rule) => residual_rule.matches(&recipient),
                    None => true,
                };
                if keep {
                    matched.push(recipient);
                }
                if matched.len() == limit {
                    return Ok(EvalPage {
                        recipients: matched,
                        next_cursor: last_scanned,
                    });
                }
            }

            scan_cursor = last_scanned;
            if drained {
                return Ok(EvalPage {
                    recipients: matched,
                    next_cursor: None,
                });
            }
        }
    }

    /// Drains the full stream (small segments, tests).
    pub async fn collect_all(&self, rule: &Rule) -> Result<Vec<Recipient>, CadenzaError> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.page(rule, cursor.as_deref(), self.scan_size).await?;
            out.extend(page.recipients);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(out),
            }
        }
    }
}

/// Splits a rule into a pushed-down SQL filter and an in-memory residual.
///
/// The implicit opt-in conjunct is always part of the filter. Only
/// root-level AND conjuncts are candidates; an OR (or any unsupported leaf)
/// stays in the residual unchanged.
fn split_pushdown(rule: &Rule) -> (RecipientFilter, Option<Rule>) {
    let mut filter = RecipientFilter::default();
    push_condition(&mut filter, &opt_in_condition());

    let conjuncts: Vec<&Rule> = match rule {
        Rule::All(children) => children.iter().collect(),
        other => vec![other],
    };

    let mut residual = Vec::new();
    for conjunct in conjuncts {
        match conjunct {
            Rule::Leaf(condition) if pushable(condition) => {
                push_condition(&mut filter, condition);
            }
            other => residual.push(other.clone()),
        }
    }

    let residual = match residual.len() {
        0 => None,
        1 => Some(residual.into_iter().next().expect("len checked")),
        _ => Some(Rule::All(residual)),
    };
    (filter, residual)
}

/// Whether the store can evaluate this condition exactly.
///
/// Numeric equality stays in memory: `CAST(... AS TEXT)` would compare
/// `30` and `30.0` differently from the numeric in-memory path.
fn pushable(condition: &Condition) -> bool {
    match condition.operator {
        Operator::Exists => condition.attribute != CONSENT_ATTRIBUTE,
        Operator::Equals => {
            condition.attribute == CONSENT_ATTRIBUTE || condition.value.is_string()
        }
        _ => false,
    }
}

fn push_condition(filter: &mut RecipientFilter, condition: &Condition) {
    if condition.attribute == CONSENT_ATTRIBUTE {
        filter.clauses.push("consent_state = ?".to_string());
        let text = match &condition.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        filter.params.push(SqlValue::Text(text));
        return;
    }

    let path = format!("$.{}", condition.attribute);
    match condition.operator {
        Operator::Exists => {
            filter
                .clauses
                .push("json_extract(attributes, ?) IS NOT NULL".to_string());
            filter.params.push(SqlValue::Text(path));
        }
        Operator::Equals => {
            filter
                .clauses
                .push("CAST(json_extract(attributes, ?) AS TEXT) = ?".to_string());
            filter.params.push(SqlValue::Text(path));
            if let Value::String(s) = &condition.value {
                filter.params.push(SqlValue::Text(s.clone()));
            }
        }
        _ => unreachable!("pushable() gates the operators"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_core::types::{AttributeMap, ConsentState};
    use chrono::Utc;
    use serde_json::json;
    use tempfile::tempdir;

    async fn seeded_store() -> (Store, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("seg.db").to_str().unwrap())
            .await
            .unwrap();
        let now = Utc::now();

        let rows: &[(&str, ConsentState, &[(&str, Value)])] = &[
            ("+14155550001", ConsentState::OptIn, &[("city", json!("Austin")), ("age", json!(30))]),
            ("+14155550002", ConsentState::OptIn, &[("city", json!("Boston")), ("age", json!(45))]),
            ("+14155550003", ConsentState::OptOut, &[("city", json!("Austin"))]),
            ("+14155550004", ConsentState::Stop, &[("city", json!("Austin"))]),
            ("+14155550005", ConsentState::OptIn, &[("city", json!("Austin")), ("age", json!(19))]),
            ("+14155550006", ConsentState::OptIn, &[]),
        ];
        for (phone, consent, pairs) in rows {
            let attrs: AttributeMap = pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect();
            store.upsert_recipient(phone, attrs, *consent, now).await.unwrap();
        }
        (store, dir)
    }

    fn phones(recipients: &[Recipient]) -> Vec<&str> {
        recipients.iter().map(|r| r.phone.as_str()).collect()
    }

    #[tokio::test]
    async fn consent_filter_is_implicit() {
        let (store, _dir) = seeded_store().await;
        let evaluator = SegmentEvaluator::new(store);

        // A bare equals rule never returns opted-out or stopped recipients.
        let rule = Rule::parse(&json!({
            "attribute": "city", "operator": "equals", "value": "Austin"
        }))
        .unwrap();
        let out = evaluator.collect_all(&rule).await.unwrap();
        assert_eq!(phones(&out), vec!["+14155550001", "+14155550005"]);
    }

    #[tokio::test]
    async fn pure_consent_rule_returns_all_opted_in() {
        let (store, _dir) = seeded_store().await;
        let evaluator = SegmentEvaluator::new(store);

        let rule = Rule::parse(&json!({
            "attribute": "consent_state", "operator": "equals", "value": "OPT_IN"
        }))
        .unwrap();
        let out = evaluator.collect_all(&rule).await.unwrap();
        assert_eq!(
            phones(&out),
            vec!["+14155550001", "+14155550002", "+14155550005", "+14155550006"]
        );
    }

    #[tokio::test]
    async fn residual_numeric_predicate_applies_in_memory() {
        let (store, _dir) = seeded_store().await;
        let evaluator = SegmentEvaluator::new(store).with_scan_size(2);

        let rule = Rule::parse(&json!({
            "logic": "AND",
            "conditions": [
                {"attribute": "city", "operator": "equals", "value": "Austin"},
                {"attribute": "age", "operator": "gte", "value": 21},
            ],
        }))
        .unwrap();
        let out = evaluator.collect_all(&rule).await.unwrap();
        assert_eq!(phones(&out), vec!["+14155550001"]);
    }

    #[tokio::test]
    async fn or_rules_stay_in_memory() {
        let (store, _dir) = seeded_store().await;
        let evaluator = SegmentEvaluator::new(store).with_scan_size(2);

        let rule = Rule::parse(&json!({
            "logic": "OR",
            "conditions": [
                {"attribute": "age", "operator": "gt", "value": 40},
                {"attribute": "city", "operator": "matches", "value": "Aus.*"},
            ],
        }))
        .unwrap();
        let out = evaluator.collect_all(&rule).await.unwrap();
        assert_eq!(phones(&out), vec!["+14155550001", "+14155550002", "+14155550005"]);
    }

    #[tokio::test]
    async fn paging_is_resumable_and_duplicate_free() {
        let (store, _dir) = seeded_store().await;
        let evaluator = SegmentEvaluator::new(store).with_scan_size(2);
        let rule = Rule::match_all();

        let mut collected = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = evaluator.page(&rule, cursor.as_deref(), 1).await.unwrap();
            collected.extend(page.recipients.into_iter().map(|r| r.phone));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(
            collected,
            vec!["+14155550001", "+14155550002", "+14155550005", "+14155550006"]
        );
    }

    #[tokio::test]
    async fn exists_pushdown_matches_memory_semantics() {
        let (store, _dir) = seeded_store().await;
        let evaluator = SegmentEvaluator::new(store);

        let rule = Rule::parse(&json!({
            "attribute": "age", "operator": "exists"
        }))
        .unwrap();
        let out = evaluator.collect_all(&rule).await.unwrap();
        assert_eq!(
            phones(&out),
            vec!["+14155550001", "+14155550002", "+14155550005"]
        );
    }
}
