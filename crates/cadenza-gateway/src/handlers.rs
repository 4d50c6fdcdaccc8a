// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the webhook and campaign-trigger endpoints.
//!
//! Webhook handlers return 200 with an empty body once raw capture has
//! landed, even for payloads that fail normalization, so the provider never
//! retries because of a consumer-side fault.

use std::collections::HashMap;

use axum::extract::{Form, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cadenza_core::CadenzaError;
use serde::Serialize;
use tracing::error;

use crate::server::GatewayState;

/// Structured 4xx/5xx error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Response body for POST /campaigns/{id}/trigger.
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub status: String,
    #[serde(rename = "taskId")]
    pub task_id: String,
}

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

fn error_response(status: StatusCode, kind: &str, message: String) -> Response {
    (
        status,
        Json(ErrorBody {
            kind: kind.to_string(),
            message,
            details: None,
        }),
    )
        .into_response()
}

fn map_error(e: CadenzaError) -> Response {
    match e {
        CadenzaError::Validation(message) => {
            error_response(StatusCode::BAD_REQUEST, "validation", message)
        }
        other => {
            error!(error = %other, "unexpected gateway error");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "internal error".to_string(),
            )
        }
    }
}

/// POST /webhooks/inbound
///
/// Form fields: `From`, `Body`, `MessageSid`, optional `WaId` and
/// `ProfileName`.
pub async fn post_inbound(
    State(state): State<GatewayState>,
    Form(fields): Form<HashMap<String, String>>,
) -> Response {
    match state.ingestor.process_inbound(&fields).await {
        Ok(_) => StatusCode::OK.into_response(),
        // Raw capture failed; this is the one webhook path that may 500.
        Err(e) => map_error(e),
    }
}

/// POST /webhooks/status
///
/// Form fields: `MessageSid`, `MessageStatus`, optional `ErrorCode`.
pub async fn post_status(
    State(state): State<GatewayState>,
    Form(fields): Form<HashMap<String, String>>,
) -> Response {
    match state.ingestor.process_status(&fields).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => map_error(e),
    }
}

/// POST /campaigns/{id}/trigger
///
/// Idempotent under concurrent calls: a second caller observes the already
/// running campaign and its run token.
pub async fn post_trigger(
    State(state): State<GatewayState>,
    Path(campaign_id): Path<i64>,
) -> Response {
    match state.orchestrator.trigger(campaign_id).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(TriggerResponse {
                status: outcome.status.to_string(),
                task_id: outcome.task_id,
            }),
        )
            .into_response(),
        Err(e) => map_error(e),
    }
}

/// GET /health
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_serializes_without_empty_details() {
        let body = ErrorBody {
            kind: "validation".into(),
            message: "bad".into(),
            details: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"kind\":\"validation\""));
        assert!(!json.contains("details"));
    }

    #[test]
    fn trigger_response_serializes() {
        let body = TriggerResponse {
            status: "RUNNING".into(),
            task_id: "abc".into(),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"status\":\"RUNNING\""));
        assert!(json.contains("\"taskId\":\"abc\""));
    }
}
