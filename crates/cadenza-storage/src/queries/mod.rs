// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules, one per entity.

pub mod audit;
pub mod campaigns;
pub mod events;
pub mod messages;
pub mod recipients;
pub mod segments;
pub mod subscriptions;
pub mod templates;

/// Parses an enum column stored as TEXT, mapping parse failures onto the
/// rusqlite conversion error so they surface through the normal error path.
pub(crate) fn parse_text_col<T>(idx: usize, s: String) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    s.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Parses a JSON column stored as TEXT.
pub(crate) fn parse_json_col<T>(idx: usize, s: &str) -> rusqlite::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
