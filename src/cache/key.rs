//! Key Codec
//!
//! `prefix + identifier [+ ":" + param_hash]`, where the hash covers a
//! canonical (recursively key-sorted) JSON rendering of the parameters.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::namespace::Namespace;
use crate::error::{CacheError, Result};

/// Hex characters kept from the parameter digest
pub const PARAM_HASH_LEN: usize = 16;

/// A fully built cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Glob matching every parameter-hashed variant of this key.
    pub fn variants_pattern(&self) -> String {
        format!("{}:*", escape_glob(&self.0))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds the key for `identifier` in `namespace`.
///
/// `params` of `None`, JSON `null` or an empty object all produce the bare key.
pub fn build_key<P: Serialize + ?Sized>(
    namespace: &Namespace,
    identifier: &str,
    params: Option<&P>,
) -> Result<CacheKey> {
    let mut key = format!("{}{}", namespace.prefix, identifier);
    if let Some(params) = params {
        let value = serde_json::to_value(params)
            .map_err(|e| CacheError::Serialization(format!("cache key params: {}", e)))?;
        if !is_empty_params(&value) {
            key.push(':');
            key.push_str(&param_hash(&value));
        }
    }
    Ok(CacheKey(key))
}

/// Truncated SHA-256 of the canonical rendering of `value`.
pub fn param_hash(value: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(PARAM_HASH_LEN);
    hash
}

fn is_empty_params(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// JSON with object keys sorted at every depth, independent of map ordering.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Escapes glob metacharacters so an identifier matches only itself.
pub fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NamespaceConfig;
    use serde_json::json;
    use std::collections::HashMap;

    fn pickup() -> Namespace {
        Namespace::from(&NamespaceConfig::new("pickup", 900, None))
    }

    #[test]
    fn test_bare_key() {
        let key = build_key::<Value>(&pickup(), "42", None).unwrap();
        assert_eq!(key.as_str(), "cache:pickup:42");
    }

    #[test]
    fn test_empty_params_produce_bare_key() {
        let ns = pickup();
        let bare = build_key::<Value>(&ns, "42", None).unwrap();
        assert_eq!(build_key(&ns, "42", Some(&json!({}))).unwrap(), bare);
        assert_eq!(build_key(&ns, "42", Some(&Value::Null)).unwrap(), bare);
    }

    #[test]
    fn test_param_hash_width() {
        let key = build_key(&pickup(), "42", Some(&json!({"page": 2}))).unwrap();
        let (_, hash) = key.as_str().rsplit_once(':').unwrap();
        assert_eq!(hash.len(), PARAM_HASH_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let ns = pickup();
        let mut a = HashMap::new();
        a.insert("status", "open");
        a.insert("zone", "north");
        a.insert("page", "1");
        let mut b = HashMap::new();
        b.insert("page", "1");
        b.insert("status", "open");
        b.insert("zone", "north");

        assert_eq!(
            build_key(&ns, "list", Some(&a)).unwrap(),
            build_key(&ns, "list", Some(&b)).unwrap()
        );
    }

    #[test]
    fn test_nested_objects_are_canonical() {
        let x = json!({"filter": {"b": 1, "a": [1, {"y": 2, "x": 1}]}});
        let y = json!({"filter": {"a": [1, {"x": 1, "y": 2}], "b": 1}});
        assert_eq!(param_hash(&x), param_hash(&y));
    }

    #[test]
    fn test_different_params_differ() {
        let ns = pickup();
        let k1 = build_key(&ns, "list", Some(&json!({"page": 1}))).unwrap();
        let k2 = build_key(&ns, "list", Some(&json!({"page": 2}))).unwrap();
        let k3 = build_key(&ns, "list", Some(&json!({"page": "1"}))).unwrap();
        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
    }

    #[test]
    fn test_variants_pattern_escapes_identifier() {
        let key = build_key::<Value>(&pickup(), "a*b", None).unwrap();
        assert_eq!(key.variants_pattern(), r"cache:pickup:a\*b:*");
    }
}
