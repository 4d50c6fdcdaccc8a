// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Cadenza messaging engine.

use std::time::Duration;

use thiserror::Error;

use crate::types::ConsentState;

/// The primary error type used across all Cadenza crates.
///
/// Variants mirror the failure taxonomy of the delivery pipeline: boundary
/// validation, compliance blocks (consent, quiet hours, rate limit, content),
/// provider faults split by retryability, and storage faults.
#[derive(Debug, Error)]
pub enum CadenzaError {
    /// Configuration errors (invalid TOML, missing required fields).
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed input at a system boundary. Surfaced to the caller, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Storage backend errors (connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Recipient is not eligible to receive messages.
    #[error("recipient not eligible: consent state is {state}")]
    ConsentBlocked { state: ConsentState },

    /// Dispatch attempted inside the recipient's quiet window.
    #[error("inside quiet hours, next allowed at {resume_at}")]
    QuietHours {
        resume_at: chrono::DateTime<chrono::Utc>,
    },

    /// Campaign rate limit is full for the current window.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Rendered content failed structural validation.
    #[error("content invalid: {0}")]
    ContentInvalid(String),

    /// Provider-reported fault. `transient` errors are retried with backoff,
    /// `permanent` errors fail the message immediately.
    #[error(transparent)]
    Provider(#[from] crate::traits::provider::ProviderError),

    /// Operation exceeded its deadline.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CadenzaError {
    /// Convenience constructor for storage errors from any boxed source.
    pub fn storage<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CadenzaError::Storage {
            source: Box::new(source),
        }
    }
}
