//! Best-effort classification of provider failure text.
//!
//! Only consulted when the provider does not report a typed rate-limit error.
//! Provider message-format changes can silently defeat these patterns.

const QUOTA_PATTERNS: &[&str] = &[
    "quota",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "rate_limit",
    "429",
    "resource exhausted",
    "resource_exhausted",
    "too many requests",
];

/// Returns `true` when an error message looks like a quota / rate-limit signal.
pub fn is_quota_message(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    QUOTA_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}
