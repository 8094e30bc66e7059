//! Strips phone numbers from provider error text before it reaches logs or
//! admin views.

use std::sync::LazyLock;

use regex::Regex;

/// Replacement for every redacted number.
pub const REDACTED_PHONE: &str = "[phone]";

/// International (`+46 70-123 45 67`), national (`0701234567`) and bare digit
/// runs of seven or more digits, allowing spaces, dashes and dots as separators.
static PHONE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+|00)?\d(?:[\s.\-]?\d){6,}").expect("phone pattern is a valid regex")
});

/// Replace anything that looks like a phone number with [`REDACTED_PHONE`].
pub fn redact_phone_numbers(input: &str) -> String {
    PHONE_PATTERN.replace_all(input, REDACTED_PHONE).into_owned()
}

/// Redact an optional error string, passing `None` through.
pub fn redact_optional(input: Option<&str>) -> Option<String> {
    input.map(redact_phone_numbers)
}
