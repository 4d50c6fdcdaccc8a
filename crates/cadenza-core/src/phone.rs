// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel-prefix handling and E.164 normalization.
//!
//! Providers prefix the `From`/`To` fields with the channel type
//! (`whatsapp:+1415...`). The prefix is stripped, recorded, and the
//! remainder normalized to E.164: leading `+`, 8 to 15 digits, no leading
//! zero.

use strum::{Display, EnumString};

/// Message channel extracted from the provider address prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Channel {
    Sms,
    Whatsapp,
    Messenger,
    Voice,
}

/// Splits a provider address into its channel and E.164 phone number.
///
/// Addresses without a prefix default to SMS (the provider's default).
/// Returns `None` for the phone when the remainder is not a valid E.164
/// number; callers keep the raw payload either way.
pub fn extract_channel_and_phone(input: &str) -> (Channel, Option<String>) {
    let (channel, rest) = match input.split_once(':') {
        Some(("whatsapp", rest)) => (Channel::Whatsapp, rest),
        Some(("sms", rest)) => (Channel::Sms, rest),
        Some(("messenger", rest)) => (Channel::Messenger, rest),
        Some(("voice", rest)) => (Channel::Voice, rest),
        _ => (Channel::Sms, input),
    };

    let phone = rest.trim();
    if is_e164(phone) {
        return (channel, Some(phone.to_string()));
    }
    // Bare digits that would be valid with a leading plus.
    let with_plus = format!("+{phone}");
    if is_e164(&with_plus) {
        return (channel, Some(with_plus));
    }
    (channel, None)
}

/// Whether `s` is a valid E.164 number: leading `+`, 8-15 digits, first
/// digit non-zero.
pub fn is_e164(s: &str) -> bool {
    let Some(digits) = s.strip_prefix('+') else {
        return false;
    };
    (8..=15).contains(&digits.len())
        && digits.chars().all(|c| c.is_ascii_digit())
        && !digits.starts_with('0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_whatsapp_prefix() {
        let (channel, phone) = extract_channel_and_phone("whatsapp:+14155550001");
        assert_eq!(channel, Channel::Whatsapp);
        assert_eq!(phone.as_deref(), Some("+14155550001"));
    }

    #[test]
    fn defaults_to_sms_without_prefix() {
        let (channel, phone) = extract_channel_and_phone("+14155550001");
        assert_eq!(channel, Channel::Sms);
        assert_eq!(phone.as_deref(), Some("+14155550001"));
    }

    #[test]
    fn adds_missing_plus() {
        let (_, phone) = extract_channel_and_phone("sms:14155550001");
        assert_eq!(phone.as_deref(), Some("+14155550001"));
    }

    #[test]
    fn rejects_invalid_numbers() {
        assert_eq!(extract_channel_and_phone("whatsapp:garbage").1, None);
        assert_eq!(extract_channel_and_phone("+0123456789").1, None);
        assert_eq!(extract_channel_and_phone("+1234").1, None);
        assert_eq!(extract_channel_and_phone("").1, None);
    }

    #[test]
    fn e164_length_bounds() {
        assert!(is_e164("+12345678")); // 8 digits
        assert!(is_e164("+123456789012345")); // 15 digits
        assert!(!is_e164("+1234567")); // 7 digits
        assert!(!is_e164("+1234567890123456")); // 16 digits
    }
}
