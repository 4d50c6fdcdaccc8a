// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Cadenza engine.
//!
//! Unrecognized keys are ignored rather than rejected so that operators can
//! carry forward-compatible settings in shared config files.

use serde::{Deserialize, Serialize};

/// Top-level Cadenza configuration.
///
/// Loaded from TOML files following the XDG hierarchy, with environment
/// variable overrides. All sections are optional and default to sensible
/// values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CadenzaConfig {
    /// Persistent store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Message-provider credentials and endpoint.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Rate-limiter backend selection.
    #[serde(default)]
    pub ratelimiter: RateLimiterConfig,

    /// Worker pool sizing.
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Graceful shutdown settings.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Webhook/trigger HTTP surface.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}

/// Persistent store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_dsn")]
    pub dsn: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { dsn: default_dsn() }
    }
}

fn default_dsn() -> String {
    "cadenza.db".to_string()
}

/// Message-provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Provider account identifier. `None` requires an environment override.
    #[serde(default)]
    pub account_sid: Option<String>,

    /// Provider auth token.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Sender address, e.g. "whatsapp:+14155238886".
    #[serde(default)]
    pub sender_id: Option<String>,

    /// API base URL; overridable for tests.
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,

    /// Per-request deadline in seconds.
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            account_sid: None,
            auth_token: None,
            sender_id: None,
            base_url: default_provider_base_url(),
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

fn default_provider_base_url() -> String {
    "https://api.twilio.com".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    10
}

/// Rate-limiter configuration. Only the in-process backend is implemented.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimiterConfig {
    #[serde(default = "default_ratelimiter_backend")]
    pub backend: String,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            backend: default_ratelimiter_backend(),
        }
    }
}

fn default_ratelimiter_backend() -> String {
    "memory".to_string()
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkersConfig {
    /// Number of concurrent message workers.
    #[serde(default = "default_worker_count")]
    pub count: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
        }
    }
}

fn default_worker_count() -> usize {
    4
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShutdownConfig {
    /// Seconds to wait for in-flight messages before exiting.
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_seconds: default_grace_seconds(),
        }
    }
}

fn default_grace_seconds() -> u64 {
    30
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,

    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    8080
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
