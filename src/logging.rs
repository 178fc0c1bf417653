//! Structured logging setup and the redaction policy of the design notes.
//!
//! Mirrors the shape of this organization's other `tracing`-based crates:
//! an `EnvFilter` driven by `RUST_LOG`, a human-readable layer by default,
//! and a JSON layer when `LOG_FORMAT=json` is set.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const SENSITIVE_KEYWORDS: &[&str] = &[
    "password",
    "passwd",
    "pwd",
    "secret",
    "token",
    "apikey",
    "api_key",
    "auth",
    "authorization",
    "credential",
    "key",
    "private",
    "session",
    "cookie",
    "jwt",
    "bearer",
    "oauth",
];

const SEPARATORS: &[&str] = &[" is ", ":", "="];

/// Redacts `<keyword><separator><value>` substrings in a log line, replacing
/// the value with `[REDACTED]`. Applied at format time, not at the call site,
/// so every emitted record is covered uniformly.
pub fn redact(line: &str) -> String {
    let mut out = line.to_string();
    for keyword in SENSITIVE_KEYWORDS {
        for sep in SEPARATORS {
            out = redact_one(&out, keyword, sep);
        }
    }
    out
}

fn redact_one(line: &str, keyword: &str, sep: &str) -> String {
    let lower = line.to_lowercase();
    let needle = format!("{keyword}{sep}");
    let mut result = String::with_capacity(line.len());
    let mut cursor = 0usize;

    while let Some(rel) = lower[cursor..].find(&needle) {
        let start = cursor + rel;
        let value_start = start + needle.len();
        result.push_str(&line[cursor..value_start]);

        let rest = &line[value_start..];
        let value_len = rest
            .find(|c: char| c.is_whitespace() || c == ',' || c == '"' || c == '\'')
            .unwrap_or(rest.len());
        result.push_str("[REDACTED]");
        cursor = value_start + value_len;
    }
    result.push_str(&line[cursor..]);
    result
}

/// Initializes the global `tracing` subscriber. Call once, at process start.
/// `json` forces structured JSON output, matching `LOG_FORMAT=json` (see
/// `config::RuntimeConfig::log_format_json`).
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter).with(tracing_error::ErrorLayer::default());

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true).with_span_list(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_colon_separator() {
        let line = "connecting with api_key:sk-abc123 to host";
        assert_eq!(redact(line), "connecting with api_key:[REDACTED] to host");
    }

    #[test]
    fn redacts_equals_separator() {
        let line = "token=xyz987";
        assert_eq!(redact(line), "token=[REDACTED]");
    }

    #[test]
    fn redacts_is_separator() {
        let line = "the password is hunter2 for this account";
        assert_eq!(redact(line), "the password is [REDACTED] for this account");
    }

    #[test]
    fn leaves_unrelated_text_untouched() {
        let line = "processing batch 12 of source handbook";
        assert_eq!(redact(line), line);
    }

    #[test]
    fn redacts_multiple_occurrences() {
        let line = "token=aaa secret=bbb";
        assert_eq!(redact(line), "token=[REDACTED] secret=[REDACTED]");
    }
}
