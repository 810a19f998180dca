//! Canonicalization and request fingerprinting.
//!
//! Recorded-response lookup and structural diffing both depend on values
//! being in a canonical form: mapping keys sorted, nested values recursed,
//! JSON-looking string bodies parsed. Canonicalization is total and
//! idempotent; no input fails.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Canonicalize an arbitrary structured value.
///
/// Mapping keys end up lexicographically sorted (`serde_json::Map` is
/// BTree-backed; rebuilding the map guarantees the ordering regardless of
/// how the value was produced). Sequences are recursed element-wise but
/// never reordered here - sorting is a tolerance decision, not a
/// canonical-form one.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, v) in map {
                out.insert(key.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Canonicalize a response body.
///
/// A string body whose first non-whitespace character is `{` or `[` is
/// parsed as JSON before canonicalization; any other string stays a string.
pub fn canonicalize_body(body: &Value) -> Value {
    if let Value::String(s) = body {
        let trimmed = s.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(parsed) = serde_json::from_str::<Value>(s) {
                return canonicalize(&parsed);
            }
        }
    }
    canonicalize(body)
}

/// Compare two leaf values by value rather than representation.
///
/// `serde_json` keeps `1` and `1.0` as distinct number variants; the
/// engine treats them as equal.
pub fn leaf_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(xi), Some(yi)) = (x.as_i64(), y.as_i64()) {
                return xi == yi;
            }
            match (x.as_f64(), y.as_f64()) {
                (Some(xf), Some(yf)) => xf == yf,
                _ => x == y,
            }
        }
        _ => a == b,
    }
}

/// Runtime type category of a value, used for type-change classification.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Stable fingerprint of a request for recorded-response lookup.
///
/// The digest covers method (uppercased), path, canonicalized query, and
/// canonicalized body - never headers, cookies, or timing. Two requests
/// differing only in key order or encoding whitespace hash identically
/// because the canonical form serializes with sorted keys and no
/// insignificant whitespace.
pub fn request_hash(method: &str, path: &str, query: &Value, body: &Value) -> String {
    let mut subject = Map::new();
    subject.insert("body".to_string(), canonicalize_body(body));
    subject.insert("method".to_string(), Value::String(method.to_uppercase()));
    subject.insert("path".to_string(), Value::String(path.to_string()));
    subject.insert("query".to_string(), canonicalize(query));

    let encoded = serde_json::to_string(&Value::Object(subject))
        .unwrap_or_else(|_| format!("{}-{}", method, path));
    let mut hasher = Sha256::new();
    hasher.update(encoded.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonicalize_is_idempotent() {
        let value = json!({"b": [3, 1, {"z": null, "a": "x"}], "a": 1});
        let once = canonicalize(&value);
        let twice = canonicalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_canonicalize_preserves_array_order() {
        let value = json!([3, 1, 2]);
        assert_eq!(canonicalize(&value), json!([3, 1, 2]));
    }

    #[test]
    fn test_string_body_parses_only_json_shapes() {
        let object_body = Value::String(r#"{"a": 1}"#.to_string());
        assert_eq!(canonicalize_body(&object_body), json!({"a": 1}));

        let array_body = Value::String("[1, 2]".to_string());
        assert_eq!(canonicalize_body(&array_body), json!([1, 2]));

        let plain = Value::String("hello {world".to_string());
        assert_eq!(canonicalize_body(&plain), plain);

        let invalid = Value::String("{not json".to_string());
        assert_eq!(canonicalize_body(&invalid), invalid);
    }

    #[test]
    fn test_null_distinct_from_missing() {
        let with_null = canonicalize(&json!({"a": null}));
        let without = canonicalize(&json!({}));
        assert_ne!(with_null, without);
    }

    #[test]
    fn test_leaf_equal_numbers_by_value() {
        assert!(leaf_equal(&json!(1), &json!(1.0)));
        assert!(leaf_equal(&json!(2.5), &json!(2.5)));
        assert!(!leaf_equal(&json!(1), &json!(2)));
        assert!(!leaf_equal(&json!("1"), &json!(1)));
    }

    #[test]
    fn test_hash_stable_under_key_permutation() {
        let query = json!({"page": "1", "sort": "desc"});
        let body_a = json!({"name": "John", "age": 30});
        let body_b = json!({"age": 30, "name": "John"});
        let h1 = request_hash("get", "/api/users", &query, &body_a);
        let h2 = request_hash("GET", "/api/users", &query, &body_b);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash_changes_with_request_shape() {
        let query = json!({});
        let body = json!(null);
        let base = request_hash("GET", "/api/users", &query, &body);
        assert_ne!(base, request_hash("POST", "/api/users", &query, &body));
        assert_ne!(base, request_hash("GET", "/api/orders", &query, &body));
        assert_ne!(
            base,
            request_hash("GET", "/api/users", &json!({"a": "1"}), &body)
        );
    }

    #[test]
    fn test_hash_ignores_whitespace_in_string_bodies() {
        let query = json!({});
        let compact = Value::String(r#"{"a":1,"b":2}"#.to_string());
        let spaced = Value::String(r#"{ "b": 2, "a": 1 }"#.to_string());
        assert_eq!(
            request_hash("POST", "/x", &query, &compact),
            request_hash("POST", "/x", &query, &spaced)
        );
    }
}
