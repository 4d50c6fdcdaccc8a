// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic provider double.
//!
//! Outcomes are injected per `(to, body)` key and consumed in FIFO order;
//! unmatched sends succeed with a generated unique sid. Every call is
//! recorded for assertions on suppression and pacing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use cadenza_core::{ProviderClient, ProviderError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// A scripted outcome for one send.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Succeed with a generated sid.
    Success,
    /// Succeed with the given sid.
    SuccessWithSid(String),
    Transient { code: i64 },
    Permanent { code: i64 },
}

/// One recorded provider call.
#[derive(Debug, Clone)]
pub struct ProviderCall {
    pub to: String,
    pub body: String,
    pub at: DateTime<Utc>,
    /// The sid on success, `None` on scripted failure.
    pub sid: Option<String>,
}

/// Provider double with `(to, body)`-keyed scripted outcomes.
#[derive(Default)]
pub struct MockProvider {
    scripts: DashMap<(String, String), VecDeque<MockOutcome>>,
    calls: Mutex<Vec<ProviderCall>>,
    counter: AtomicU64,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts outcomes for sends matching `(to, body)` exactly.
    pub fn inject(&self, to: &str, body: &str, outcomes: Vec<MockOutcome>) {
        self.scripts
            .entry((to.to_string(), body.to_string()))
            .or_default()
            .extend(outcomes);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls made for one recipient.
    pub fn calls_to(&self, to: &str) -> Vec<ProviderCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.to == to)
            .cloned()
            .collect()
    }

    fn next_sid(&self) -> String {
        format!("SMmock{:08}", self.counter.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    async fn send(&self, to: &str, body: &str) -> Result<String, ProviderError> {
        let scripted = self
            .scripts
            .get_mut(&(to.to_string(), body.to_string()))
            .and_then(|mut q| q.pop_front());

        let result = match scripted.unwrap_or(MockOutcome::Success) {
            MockOutcome::Success => Ok(self.next_sid()),
            MockOutcome::SuccessWithSid(sid) => Ok(sid),
            MockOutcome::Transient { code } => {
                Err(ProviderError::transient(code, "scripted transient failure"))
            }
            MockOutcome::Permanent { code } => {
                Err(ProviderError::permanent(code, "scripted permanent failure"))
            }
        };

        self.calls.lock().unwrap().push(ProviderCall {
            to: to.to_string(),
            body: body.to_string(),
            at: Utc::now(),
            sid: result.as_ref().ok().cloned(),
        });
        result
    }
}
