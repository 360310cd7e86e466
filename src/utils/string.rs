//! String utilities
//!
//! Helpers for keeping secrets and upstream payloads out of logs.

/// Safely truncate a string at a character boundary
///
/// # Example
/// ```
/// use upstream_gateway::utils::truncate_str;
///
/// assert_eq!(truncate_str("Hello, 世界!", 8), "Hello, 世");
/// assert_eq!(truncate_str("short", 100), "short");
/// ```
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Truncate and append a suffix if anything was cut
pub fn truncate_with_suffix(s: &str, max_chars: usize, suffix: &str) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        format!("{}{}", truncate_str(s, max_chars), suffix)
    }
}

/// Mask a secret for display, keeping at most the first four characters.
///
/// Secrets of eight characters or fewer are fully masked.
///
/// ```
/// use upstream_gateway::utils::mask_secret;
///
/// assert_eq!(mask_secret("12345678_abcdefgh"), "1234****");
/// assert_eq!(mask_secret("short"), "****");
/// ```
pub fn mask_secret(secret: &str) -> String {
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{}****", truncate_str(secret, 4))
    }
}
