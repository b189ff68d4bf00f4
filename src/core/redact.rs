//! Postflight scrubbing of payloads before they are logged or persisted.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

/// Replacement for values stored under a secret key
pub const REDACTED: &str = "[REDACTED]";

/// Replacement for email addresses
pub const REDACTED_EMAIL: &str = "[REDACTED_EMAIL]";

/// Replacement for token-like substrings
pub const REDACTED_TOKEN: &str = "[REDACTED_TOKEN]";

/// Key names whose string values are always fully redacted (compared lowercased,
/// with `-` folded to `_`)
const SECRET_KEYS: &[&str] = &[
    "api_key",
    "apikey",
    "token",
    "access_token",
    "refresh_token",
    "auth_token",
    "secret",
    "client_secret",
    "password",
    "passwd",
    "authorization",
    "private_key",
];

/// Minimum length for an opaque alphanumeric run to count as a token
const OPAQUE_TOKEN_MIN_LEN: usize = 32;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}")
            .expect("email pattern is valid")
    })
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(concat!(
            r"(?:\bBearer\s+[A-Za-z0-9._~+/=-]{8,})",
            r"|(?:\b(?:sk|pk|rk)-[A-Za-z0-9_-]{8,})",
            r"|(?:\bgh[pousr]_[A-Za-z0-9]{16,})",
            r"|(?:\bxox[abpr]-[A-Za-z0-9-]{10,})",
            r"|(?:\beyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+)",
            r"|(?P<opaque>\b[A-Za-z0-9_-]{32,}\b)",
        ))
        .expect("token pattern is valid")
    })
}

/// Return a sanitized copy of `payload`.
///
/// Objects and arrays keep their shape and order. Strings under a secret key
/// are replaced outright; all other strings have emails and token-like
/// substrings masked. Array elements inherit the key of the array.
pub fn postflight_scrub(payload: &Value) -> Value {
    scrub_value(payload, None)
}

fn scrub_value(value: &Value, key: Option<&str>) -> Value {
    match value {
        Value::Object(map) => {
            let mut scrubbed = Map::with_capacity(map.len());
            for (k, v) in map {
                scrubbed.insert(k.clone(), scrub_value(v, Some(k)));
            }
            Value::Object(scrubbed)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| scrub_value(v, key)).collect()),
        Value::String(s) => {
            if key.is_some_and(is_secret_key) {
                Value::String(REDACTED.to_string())
            } else {
                Value::String(scrub_text(s))
            }
        }
        other => other.clone(),
    }
}

/// Whether a key names a secret
pub fn is_secret_key(key: &str) -> bool {
    let normalized = key.trim().to_lowercase().replace('-', "_");
    SECRET_KEYS.contains(&normalized.as_str())
}

/// Mask emails and token-like substrings in free text
pub fn scrub_text(text: &str) -> String {
    let without_emails = email_pattern().replace_all(text, REDACTED_EMAIL);

    token_pattern()
        .replace_all(&without_emails, |caps: &Captures| match caps.name("opaque") {
            // Long runs only count when they mix letters and digits
            Some(run) if !looks_opaque(run.as_str()) => run.as_str().to_string(),
            _ => REDACTED_TOKEN.to_string(),
        })
        .into_owned()
}

fn looks_opaque(run: &str) -> bool {
    run.len() >= OPAQUE_TOKEN_MIN_LEN
        && run.chars().any(|c| c.is_ascii_digit())
        && run.chars().any(|c| c.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_secret_keys_and_emails() {
        let payload = json!({"api_key": "abc123", "note": "contact me@x.com"});

        assert_eq!(
            postflight_scrub(&payload),
            json!({"api_key": "[REDACTED]", "note": "contact [REDACTED_EMAIL]"})
        );
    }

    #[test]
    fn test_input_is_not_mutated() {
        let payload = json!({"password": "hunter2"});
        let _ = postflight_scrub(&payload);
        assert_eq!(payload["password"], "hunter2");
    }

    #[test]
    fn test_secret_key_matching_is_case_insensitive() {
        assert!(is_secret_key("API_KEY"));
        assert!(is_secret_key("Client-Secret"));
        assert!(is_secret_key("Authorization"));
        assert!(!is_secret_key("token_count"));
    }

    #[test]
    fn test_nested_structures_keep_shape_and_order() {
        let payload = json!({
            "z": [{"token": "t1"}, "plain", 3],
            "a": {"tokens": ["sk-abcdefghijkl", "ok"], "secret": ["s1", "s2"]},
        });

        let scrubbed = postflight_scrub(&payload);

        assert_eq!(scrubbed["z"][0]["token"], REDACTED);
        assert_eq!(scrubbed["z"][1], "plain");
        assert_eq!(scrubbed["z"][2], 3);
        assert_eq!(scrubbed["a"]["tokens"][0], REDACTED_TOKEN);
        assert_eq!(scrubbed["a"]["tokens"][1], "ok");
        assert_eq!(scrubbed["a"]["secret"], json!([REDACTED, REDACTED]));

        let keys: Vec<&String> = scrubbed.as_object().unwrap().keys().collect();
        let original: Vec<&String> = payload.as_object().unwrap().keys().collect();
        assert_eq!(keys, original);
    }

    #[test]
    fn test_token_like_substrings() {
        assert_eq!(
            scrub_text("use Bearer abcdef123456 please"),
            format!("use {} please", REDACTED_TOKEN)
        );
        assert_eq!(
            scrub_text("hash 9f8e7d6c5b4a39281706f5e4d3c2b1a0ffeeddcc"),
            format!("hash {}", REDACTED_TOKEN)
        );
        // long words without digits are left alone
        let prose = "pneumonoultramicroscopicsilicovolcanoconiosis";
        assert_eq!(scrub_text(prose), prose);
    }
}
