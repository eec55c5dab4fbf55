//! Request fingerprinting.
//!
//! A fingerprint is the SHA-256 of the canonical JSON encoding of the
//! semantically significant parts of a request. Canonical means object keys
//! sorted lexicographically at every depth and no insignificant whitespace,
//! so two equal requests always hash identically regardless of field order.

use crate::domain::idempotency::RequestMeta;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonicalize a JSON value: sort object keys recursively.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by_key(|(k, _)| k.as_str());
            let mut out = serde_json::Map::with_capacity(entries.len());
            for (k, v) in entries {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Serialize a value canonically: sorted keys, compact separators.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

/// Compute the fingerprint for a request.
#[must_use]
pub fn compute(meta: &RequestMeta) -> String {
    let significant = serde_json::json!({
        "method": meta.method,
        "url": meta.url,
        "contentType": meta.content_type,
        "tenant": meta.tenant_id,
        "user": meta.user,
        "body": meta.body,
    });
    let canonical = canonical_json(&significant);
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TenantId;

    fn meta(body: Value) -> RequestMeta {
        RequestMeta {
            method: "POST".into(),
            url: "/v1/bookings".into(),
            content_type: "application/json".into(),
            tenant_id: TenantId::nil(),
            user: Some("admin".into()),
            body,
        }
    }

    #[test]
    fn key_order_does_not_change_fingerprint() {
        let a = meta(serde_json::json!({"capacity": 1, "serviceId": "s1"}));
        let b = meta(serde_json::json!({"serviceId": "s1", "capacity": 1}));
        assert_eq!(compute(&a), compute(&b));
    }

    #[test]
    fn body_changes_change_fingerprint() {
        let a = meta(serde_json::json!({"capacity": 1}));
        let b = meta(serde_json::json!({"capacity": 2}));
        assert_ne!(compute(&a), compute(&b));
    }

    #[test]
    fn nested_objects_canonicalize_recursively() {
        let a = canonical_json(&serde_json::json!({"z": {"b": 1, "a": 2}, "a": [{"y": 1, "x": 2}]}));
        assert_eq!(a, r#"{"a":[{"x":2,"y":1}],"z":{"a":2,"b":1}}"#);
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let fp = compute(&meta(serde_json::json!({})));
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
