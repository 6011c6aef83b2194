//! Redaction of credentials before text reaches logs or notifications.

use once_cell::sync::Lazy;
use regex::Regex;

const REDACTED: &str = "[REDACTED]";

/// Longest message body forwarded to chat sinks.
pub const SUMMARY_LIMIT: usize = 2000;

static REDACT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)(authorization:\s+)(\S+(?:\s+\S+)?)").expect("valid authorization pattern"),
        Regex::new(r"(?i)(\bBearer\s+)([A-Za-z0-9\-._~+/]+=*)").expect("valid bearer pattern"),
        Regex::new(r"(https://hooks\.slack\.com/services/)(\S+)").expect("valid webhook pattern"),
        Regex::new(r"(?i)(\b[A-Z0-9_]*(?:KEY|TOKEN|SECRET|PASSWORD)\s*[=:]\s*)(\S+)").expect("valid key=value pattern"),
    ]
});

/// Redacts values that look like secrets, keeping the key or prefix for context.
///
/// ```rust
/// use claimchain_util::redact_sensitive;
///
/// assert_eq!(redact_sensitive("API_TOKEN=abc123"), "API_TOKEN=[REDACTED]");
/// assert_eq!(redact_sensitive("Authorization: Bearer abc"), "Authorization: [REDACTED]");
/// ```
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in REDACT_PATTERNS.iter() {
        redacted = pattern
            .replace_all(&redacted, |captures: &regex::Captures| {
                let prefix = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}{}", prefix, REDACTED)
            })
            .into_owned();
    }
    redacted
}

/// Truncates on a character boundary, appending an ellipsis when cut.
pub fn truncate_for_summary(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let mut truncated: String = input.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_headers_and_tokens() {
        assert_eq!(redact_sensitive("Authorization: Bearer abc.def"), "Authorization: [REDACTED]");
        assert_eq!(redact_sensitive("using bearer xyz"), "using bearer [REDACTED]");
        assert_eq!(
            redact_sensitive("CLAIMCHAIN_API_TOKEN=s3cr3t other=value"),
            "CLAIMCHAIN_API_TOKEN=[REDACTED] other=value"
        );
    }

    #[test]
    fn redacts_webhook_paths() {
        let redacted = redact_sensitive("posting to https://hooks.slack.com/services/T0/B0/abc failed");
        assert_eq!(redacted, "posting to https://hooks.slack.com/services/[REDACTED] failed");
    }

    #[test]
    fn leaves_ordinary_text_alone() {
        let text = "VClusterClaim default/order-api-vcluster is NotReady (Creating)";
        assert_eq!(redact_sensitive(text), text);
    }

    #[test]
    fn truncates_long_summaries() {
        assert_eq!(truncate_for_summary("abcdef", 4), "abc…");
        assert_eq!(truncate_for_summary("abc", 4), "abc");
    }
}
