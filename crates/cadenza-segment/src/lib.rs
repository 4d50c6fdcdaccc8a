// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Segment rule trees and recipient evaluation.

pub mod evaluator;
pub mod rule;

pub use evaluator::{EvalPage, SegmentEvaluator};
pub use rule::{Condition, Operator, Rule, CONSENT_ATTRIBUTE};
