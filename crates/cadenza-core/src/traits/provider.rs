// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound delivery capability.
//!
//! The concrete adapter talks to the message provider's REST API; tests
//! substitute a deterministic double keyed by `(to, body)`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Retryability class of a provider fault.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProviderErrorKind {
    /// Rate limit, queue overflow, timeout, provider 5xx. Retried with backoff.
    Transient,
    /// Invalid recipient, blocked content, not-a-mobile. Fails immediately.
    Permanent,
}

/// A classified provider fault.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("provider error {code} ({kind}): {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    /// Provider-assigned numeric error code; 0 for transport-level faults.
    pub code: i64,
    pub message: String,
}

impl ProviderError {
    pub fn transient(code: i64, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            code,
            message: message.into(),
        }
    }

    pub fn permanent(code: i64, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Permanent,
            code,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ProviderErrorKind::Transient
    }
}

/// Abstract outbound delivery capability.
#[async_trait]
pub trait ProviderClient: Send + Sync + 'static {
    /// Dispatches one message and returns the provider-assigned sid.
    ///
    /// The sid is non-empty and unique across the provider; it is the
    /// correlation key for later status callbacks.
    async fn send(&self, to: &str, body: &str) -> Result<String, ProviderError>;
}
