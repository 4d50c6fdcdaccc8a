// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic doubles shared by the crate's tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cadenza_core::{Clock, ProviderClient, ProviderError, Scheduler};
use chrono::{DateTime, Utc};

/// A pinnable clock.
pub(crate) struct MockClock(Mutex<DateTime<Utc>>);

impl MockClock {
    pub(crate) fn at(t: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(t)))
    }

    pub(crate) fn set(&self, t: DateTime<Utc>) {
        *self.0.lock().unwrap() = t;
    }
}

impl Clock for MockClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Records requested delays instead of sleeping.
#[derive(Default)]
pub(crate) struct ManualScheduler {
    delays: Mutex<Vec<(String, Duration)>>,
}

impl ManualScheduler {
    pub(crate) fn take(&self) -> Vec<(String, Duration)> {
        std::mem::take(&mut self.delays.lock().unwrap())
    }
}

impl Scheduler for ManualScheduler {
    fn delay(&self, message_id: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .push((message_id.to_string(), delay));
    }
}

/// Pops scripted outcomes in order; defaults to unique-sid success once the
/// script is exhausted.
pub(crate) struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub(crate) fn new(script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn send(&self, _to: &str, _body: &str) -> Result<String, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("SMtest{n:06}")))
    }
}
