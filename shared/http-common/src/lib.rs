//! Shared HTTP utilities for the article service workspace.
//!
//! Framework-agnostic JSON envelope builders plus small parsing helpers used
//! by the api-server configuration.

// ============================================================================
// JSON Response Helpers (framework-agnostic)
// ============================================================================

/// Error envelope: `{"error": "<message>"}`.
pub fn json_error(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

/// Plain message envelope: `{"message": "<message>"}`.
pub fn json_message(message: &str) -> serde_json::Value {
    serde_json::json!({ "message": message })
}

/// Message plus one named payload: `{"message": "...", "<key>": <value>}`.
pub fn json_message_with<T: serde::Serialize + ?Sized>(
    message: &str,
    key: &str,
    value: &T,
) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    obj.insert("message".into(), serde_json::Value::from(message));
    obj.insert(
        key.into(),
        serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
    );
    serde_json::Value::Object(obj)
}

/// Single named payload: `{"<key>": <value>}`.
pub fn json_payload<T: serde::Serialize + ?Sized>(key: &str, value: &T) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    obj.insert(
        key.into(),
        serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
    );
    serde_json::Value::Object(obj)
}

// ============================================================================
// Parsing Helpers
// ============================================================================

/// Parse a boolean flag, falling back to `default` for anything that is not
/// a recognized truthy or falsy spelling.
pub fn parse_flag(s: Option<&str>, default: bool) -> bool {
    match s.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

/// Normalize a route prefix to a leading `/` and no trailing `/`.
///
/// Returns `None` when nothing but slashes or whitespace is left.
pub fn normalize_prefix(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("/{}", trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_error() {
        assert_eq!(
            json_error("Article not found"),
            serde_json::json!({"error": "Article not found"})
        );
    }

    #[test]
    fn test_json_envelopes() {
        assert_eq!(
            json_message("done"),
            serde_json::json!({"message": "done"})
        );
        assert_eq!(
            json_message_with("ok", "article", &serde_json::json!({"id": "1"})),
            serde_json::json!({"message": "ok", "article": {"id": "1"}})
        );
        assert_eq!(
            json_payload("articles", &Vec::<u8>::new()),
            serde_json::json!({"articles": []})
        );
    }

    #[test]
    fn test_flags() {
        assert!(parse_flag(Some(" YES "), false));
        assert!(parse_flag(None, true));
        assert!(!parse_flag(Some("false"), true));
        assert!(parse_flag(Some("1"), false));
        assert!(parse_flag(Some("garbage"), true));
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("/api/articles/").as_deref(), Some("/api/articles"));
        assert_eq!(normalize_prefix("api/articles").as_deref(), Some("/api/articles"));
        assert_eq!(normalize_prefix("/"), None);
        assert_eq!(normalize_prefix(""), None);
    }
}
