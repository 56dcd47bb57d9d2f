//! Input scrubbing applied to every JSON body before schema validation.
//!
//! Three independent checks, run in this order by the guard:
//! 1. [`check_payload_size`] rejects bodies above the configured KiB ceiling.
//! 2. [`sanitize_value`] walks the value and cleans every string.
//! 3. [`find_forbidden`] runs the content denylist over the cleaned value.
//!
//! The denylist is a coarse filter against obvious script and SQL injection attempts.
//! It is easy to bypass and is not a security boundary; queries are always parameterized.

use serde_json::{Map, Number, Value};

use crate::config::SanitizeConfig;
use crate::error::{AppError, AppResult};

/// Case-insensitive substrings rejected anywhere in a payload.
pub const DENYLIST: &[&str] = &[
    "<script",
    "</script",
    "javascript:",
    "vbscript:",
    "data:text/html",
    "onerror=",
    "onload=",
    "onclick=",
    "onmouseover=",
    "<iframe",
    "<object",
    "<embed",
    "eval(",
    "drop table",
    "drop database",
    "truncate table",
    "delete from",
    "insert into",
    "union select",
    "exec(",
    "xp_cmdshell",
];

const MAX_KEY_LENGTH: usize = 100;

/// Cleans a single string: control characters (NUL included) are dropped, the result is
/// capped at `max_len` characters and trimmed.
///
/// Truncation happens before trimming, so applying it twice changes nothing.
pub fn sanitize_string(input: &str, max_len: usize) -> String {
    let cleaned: String = input.chars().filter(|c| !c.is_control()).take(max_len).collect();
    cleaned.trim().to_string()
}

/// Recursively sanitizes a JSON value.
///
/// Strings (and object keys) go through [`sanitize_string`], numbers must be finite,
/// arrays and objects recurse. Nesting deeper than `max_depth` is rejected.
pub fn sanitize_value(value: Value, cfg: &SanitizeConfig) -> AppResult<Value> {
    sanitize_at(value, cfg, 0)
}

fn sanitize_at(value: Value, cfg: &SanitizeConfig, depth: usize) -> AppResult<Value> {
    if depth > cfg.max_depth {
        return Err(AppError::BadRequest(format!("Payload nesting exceeds {} levels", cfg.max_depth)));
    }
    Ok(match value {
        Value::String(s) => Value::String(sanitize_string(&s, cfg.max_string_length)),
        Value::Number(n) => sanitize_number(n),
        Value::Array(items) => Value::Array(
            items.into_iter().map(|v| sanitize_at(v, cfg, depth + 1)).collect::<AppResult<Vec<_>>>()?,
        ),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, v) in map {
                let key = sanitize_string(&key, MAX_KEY_LENGTH);
                if key.is_empty() {
                    continue;
                }
                out.insert(key, sanitize_at(v, cfg, depth + 1)?);
            }
            Value::Object(out)
        }
        other => other,
    })
}

fn sanitize_number(n: Number) -> Value {
    if n.is_i64() || n.is_u64() {
        return Value::Number(n);
    }
    match n.as_f64().and_then(Number::from_f64) {
        Some(finite) => Value::Number(finite),
        None => Value::Null,
    }
}

/// True when `input` contains any denylisted substring, ignoring case.
pub fn contains_forbidden(input: &str) -> bool {
    let lower = input.to_lowercase();
    DENYLIST.iter().any(|pattern| lower.contains(pattern))
}

/// Where the denylist matched: a dotted path to the offending string (or key).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForbiddenMatch {
    pub field: String,
}

/// Scans every string and key of `value` against the denylist and reports the first hit.
pub fn find_forbidden(value: &Value) -> Option<ForbiddenMatch> {
    find_at(value, "")
}

fn find_at(value: &Value, path: &str) -> Option<ForbiddenMatch> {
    match value {
        Value::String(s) if contains_forbidden(s) => {
            Some(ForbiddenMatch { field: if path.is_empty() { "body".to_string() } else { path.to_string() } })
        }
        Value::Array(items) => items.iter().enumerate().find_map(|(i, v)| find_at(v, &format!("{}[{}]", path, i))),
        Value::Object(map) => map.iter().find_map(|(key, v)| {
            let child = if path.is_empty() { key.clone() } else { format!("{}.{}", path, key) };
            if contains_forbidden(key) {
                return Some(ForbiddenMatch { field: child });
            }
            find_at(v, &child)
        }),
        _ => None,
    }
}

/// Rejects values whose serialized form is larger than `max_kb` KiB.
pub fn check_payload_size(value: &Value, max_kb: usize) -> AppResult<()> {
    let size = serde_json::to_vec(value).map_err(|e| AppError::BadRequest(format!("Unserializable payload: {}", e)))?.len();
    if size > max_kb.saturating_mul(1024) {
        return Err(AppError::PayloadTooLarge { limit_kb: max_kb });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg(max_string_length: usize) -> SanitizeConfig {
        SanitizeConfig { max_string_length, max_payload_kb: 1, max_depth: 4 }
    }

    #[test]
    fn test_strips_control_and_nul_characters() {
        let out = sanitize_string("  ab\u{0}c\u{1}d\u{7f}e\n\tf\r  ", 100);
        assert_eq!(out, "abcdef");
        assert!(!out.chars().any(|c| c.is_control()));
    }

    #[test]
    fn test_output_never_exceeds_cap() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_string(&long, 64).chars().count(), 64);
        let multibyte = "ä".repeat(80);
        assert_eq!(sanitize_string(&multibyte, 10).chars().count(), 10);
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let repeated = "z ".repeat(40);
        for input in ["  padded  ", "a\u{0}b", "tab\tin middle", "clean", "x   y   ", repeated.as_str()] {
            let once = sanitize_string(input, 16);
            assert_eq!(sanitize_string(&once, 16), once, "input: {:?}", input);
        }
    }

    #[test]
    fn test_sanitize_value_recurses() {
        let value = json!({
            " title\u{0} ": "  Quarterly review\u{1} ",
            "tags": ["  a ", "b\u{0}"],
            "nested": { "note": "\u{7}ok" },
            "count": 3,
            "ratio": 0.5,
            "done": false,
            "missing": null
        });
        let out = sanitize_value(value, &cfg(100)).unwrap();
        assert_eq!(
            out,
            json!({
                "title": "Quarterly review",
                "tags": ["a", "b"],
                "nested": { "note": "ok" },
                "count": 3,
                "ratio": 0.5,
                "done": false,
                "missing": null
            })
        );
    }

    #[test]
    fn test_sanitize_rejects_deep_nesting() {
        let deep = json!({ "a": { "b": { "c": { "d": { "e": { "f": 1 } } } } } });
        assert!(matches!(sanitize_value(deep, &cfg(100)), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_denylist_is_case_insensitive() {
        assert!(contains_forbidden("hello <SCRIPT>alert(1)</script>"));
        assert!(contains_forbidden("x'; DROP TABLE tasks; --"));
        assert!(contains_forbidden("JavaScript:void(0)"));
        assert!(!contains_forbidden("Call the client about the script for the ad"));
        assert!(!contains_forbidden("Deleted from the backlog"));
    }

    #[test]
    fn test_find_forbidden_reports_field_path() {
        let value = json!({ "title": "fine", "meta": { "notes": ["ok", "<iframe src=x>"] } });
        assert_eq!(find_forbidden(&value), Some(ForbiddenMatch { field: "meta.notes[1]".into() }));
        assert_eq!(find_forbidden(&json!({ "title": "fine" })), None);
        assert_eq!(find_forbidden(&json!({ "onload=": 1 })), Some(ForbiddenMatch { field: "onload=".into() }));
    }

    #[test]
    fn test_payload_size_ceiling() {
        // {"d":"<n chars>"} serializes to n + 8 bytes
        let at_limit = json!({ "d": "a".repeat(1024 - 8) });
        assert_eq!(serde_json::to_vec(&at_limit).unwrap().len(), 1024);
        assert!(check_payload_size(&at_limit, 1).is_ok());

        let over = json!({ "d": "a".repeat(1024 - 7) });
        assert!(matches!(check_payload_size(&over, 1), Err(AppError::PayloadTooLarge { limit_kb: 1 })));
    }
}
