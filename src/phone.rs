//! Phone number helpers for recipient input

use crate::config::{MAX_PHONE_DIGITS, MIN_PHONE_DIGITS};

/// Normalize phone number to E.164 format.
///
/// Only unambiguous forms are rewritten; anything else (local numbers with a
/// trunk `0`, `00` international prefixes) is returned trimmed but unchanged.
pub fn normalize_phone(phone: &str) -> String {
    let phone = phone.trim();
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();

    if phone.starts_with('+') {
        format!("+{}", digits)
    } else if digits.len() == 10 && !digits.starts_with('0') {
        // Assume US number
        format!("+1{}", digits)
    } else if digits.len() == 11 && digits.starts_with('1') {
        format!("+{}", digits)
    } else {
        phone.to_string()
    }
}

/// Check that a number has a plausible digit count once formatting is removed
pub fn is_valid_phone(phone: &str) -> bool {
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits)
}
