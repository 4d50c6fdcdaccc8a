// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP surface for webhook ingestion and campaign triggers.

pub mod handlers;
pub mod server;

pub use server::{router, start_server, GatewayState, ServerConfig};
