// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities: mock provider, mock clock, and the end-to-end harness.

pub mod harness;
pub mod mock_clock;
pub mod mock_provider;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_clock::MockClock;
pub use mock_provider::{MockOutcome, MockProvider, ProviderCall};
