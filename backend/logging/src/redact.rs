//! Log Redaction Layer
//!
//! Scrubs bearer tokens, JWTs and credential query parameters from strings
//! before they are logged. Fetch errors routinely echo the URL they failed
//! on, and module URLs may carry signed tokens.

use regex::Regex;
use std::sync::LazyLock;

static BEARER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Bearer\s+[a-zA-Z0-9\-\._~+/]+=*").unwrap());
static JWT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"eyJ[a-zA-Z0-9_\-]+\.[a-zA-Z0-9_\-]+\.[a-zA-Z0-9_\-]+").unwrap()
});
static QUERY_SECRET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([?&](?:token|access_token|api_key|signature|sig)=)[^&\s]+").unwrap()
});

/// Redacts sensitive patterns in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    let redacted = BEARER_RE.replace_all(input, "[REDACTED_TOKEN]");
    let redacted = JWT_RE.replace_all(&redacted, "[REDACTED_TOKEN]");
    QUERY_SECRET_RE
        .replace_all(&redacted, "${1}[REDACTED]")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redaction() {
        let raw = "auth failed with Bearer abc.def-ghi for user";
        let clean = redact_sensitive_data(raw);
        assert!(!clean.contains("abc.def-ghi"));
        assert!(clean.contains("[REDACTED_TOKEN]"));
    }

    #[test]
    fn strips_jwt_and_query_secrets() {
        let raw = "GET https://cdn.example/modules/lidar.json?v=3&token=s3cr3t failed, jwt eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiIxIn0.c2ln";
        let clean = redact_sensitive_data(raw);
        assert!(!clean.contains("s3cr3t"));
        assert!(!clean.contains("eyJhbGciOiJIUzI1NiJ9"));
        assert!(clean.contains("?v=3&token=[REDACTED]"));
    }

    #[test]
    fn leaves_plain_text_alone() {
        assert_eq!(redact_sensitive_data("module lidar registered"), "module lidar registered");
    }
}
