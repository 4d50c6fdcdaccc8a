// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP adapter for the outbound message provider.
//!
//! Posts form-encoded message requests with basic auth and a per-request
//! deadline, and classifies failures into the transient/permanent taxonomy
//! the orchestrator's retry policy is built on.

use std::time::Duration;

use async_trait::async_trait;
use cadenza_config::model::ProviderConfig;
use cadenza_core::{CadenzaError, ProviderClient, ProviderError};
use serde::Deserialize;
use tracing::{debug, warn};

/// Provider error codes classified as permanent: invalid recipient,
/// recipient has replied STOP at the carrier, landline/not-a-mobile, and
/// carrier-blocked content.
const PERMANENT_CODES: [i64; 4] = [21211, 21610, 21614, 30006];

/// Provider error codes classified as transient: API concurrency limit and
/// message queue overflow.
const TRANSIENT_CODES: [i64; 3] = [20429, 21611, 30001];

/// REST client for the provider's message API.
pub struct HttpProviderClient {
    http: reqwest::Client,
    account_sid: String,
    auth_token: String,
    sender_id: String,
    base_url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

impl HttpProviderClient {
    /// Builds the client from configuration. Credentials and the sender id
    /// are required.
    pub fn new(config: &ProviderConfig) -> Result<Self, CadenzaError> {
        let account_sid = config
            .account_sid
            .clone()
            .ok_or_else(|| CadenzaError::Config("provider.account_sid is required".into()))?;
        let auth_token = config
            .auth_token
            .clone()
            .ok_or_else(|| CadenzaError::Config("provider.auth_token is required".into()))?;
        let sender_id = config
            .sender_id
            .clone()
            .ok_or_else(|| CadenzaError::Config("provider.sender_id is required".into()))?;

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| CadenzaError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            account_sid,
            auth_token,
            sender_id,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        )
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn send(&self, to: &str, body: &str) -> Result<String, ProviderError> {
        let form = [("To", to), ("From", self.sender_id.as_str()), ("Body", body)];

        let response = self
            .http
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .timeout(self.timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                // Deadline expiry and transport faults are transient.
                warn!(to, error = %e, "provider request failed before a response");
                ProviderError::transient(0, format!("provider request failed: {e}"))
            })?;

        let status = response.status();
        if status.is_success() {
            let parsed: SendResponse = response.json().await.map_err(|e| {
                ProviderError::transient(0, format!("malformed provider response: {e}"))
            })?;
            debug!(to, sid = parsed.sid.as_str(), "message accepted by provider");
            return Ok(parsed.sid);
        }

        let error_body: ApiErrorBody = response
            .json()
            .await
            .unwrap_or(ApiErrorBody {
                code: None,
                message: None,
            });
        Err(classify(status, error_body))
    }
}

/// Maps an HTTP status and provider error body onto the failure taxonomy.
///
/// Provider-reported codes win over the HTTP status; otherwise 429 and 5xx
/// are transient and remaining 4xx are permanent.
fn classify(status: reqwest::StatusCode, body: ApiErrorBody) -> ProviderError {
    let message = body
        .message
        .unwrap_or_else(|| format!("provider returned HTTP {status}"));

    if let Some(code) = body.code {
        if PERMANENT_CODES.contains(&code) {
            return ProviderError::permanent(code, message);
        }
        if TRANSIENT_CODES.contains(&code) {
            return ProviderError::transient(code, message);
        }
    }

    let code = body.code.unwrap_or(i64::from(status.as_u16()));
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProviderError::transient(code, message)
    } else {
        ProviderError::permanent(code, message)
    }
}
