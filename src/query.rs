//! Query-string encoding with bracket notation for nested values.
//!
//! The output is deterministic: pairs are sorted by their encoded key, which
//! keeps signed request URIs stable regardless of map iteration order.

use serde_json::Value;
use url::form_urlencoded;

/// Encodes `value` as a query string.
///
/// Objects become `parent[child]` keys and arrays become `key[]` keys. When
/// `key_path` is `None`, `value` is expected to be an object whose members form
/// the top-level keys. Pairs are sorted by encoded key (stable, so array
/// elements keep their order) and joined with `&`.
///
/// # Examples
///
/// ```
/// use cdr_gateway::query::encode_query;
/// use serde_json::json;
///
/// let query = encode_query(
///     &json!({"user": {"root": "foobar", "extension": "spameggs"}, "limit": 10}),
///     None,
/// );
/// assert_eq!(query, "limit=10&user%5Bextension%5D=spameggs&user%5Broot%5D=foobar");
/// ```
pub fn encode_query(value: &Value, key_path: Option<&str>) -> String {
    let mut pairs = Vec::new();
    collect_pairs(value, key_path, &mut pairs);
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&")
}

fn collect_pairs(value: &Value, key_path: Option<&str>, pairs: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, member) in map {
                let nested = match key_path {
                    Some(parent) => format!("{}[{}]", parent, key),
                    None => key.clone(),
                };
                collect_pairs(member, Some(&nested), pairs);
            }
        }
        Value::Array(items) => {
            let Some(key) = key_path else { return };
            let nested = format!("{}[]", key);
            if items.is_empty() {
                pairs.push((escape(&nested), String::new()));
            }
            for item in items {
                collect_pairs(item, Some(&nested), pairs);
            }
        }
        scalar => {
            // A bare scalar has nothing to key it by.
            let Some(key) = key_path else { return };
            pairs.push((escape(key), escape(&scalar_text(scalar))));
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape(raw: &str) -> String {
    form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}
