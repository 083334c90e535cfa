//! Content hashing for cache keys.

use crate::filters::FilterSet;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

const CACHE_PREFIX: &str = "relato:report:";

/// Compute the SHA-256 hash of a serializable value.
///
/// The value is serialized to JSON before hashing. Map keys must already
/// be in deterministic order (the signature payload is built from sorted
/// maps), so identical inputs always hash identically. Returns a
/// 64-character lowercase hex string.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Derive the cache key for one report invocation.
///
/// The hashed payload is the normalized filter set (sorted keys, sort
/// directive included) plus any report-specific extras such as comparison
/// period boundaries. Filter field order never affects the key.
pub fn report_cache_key(report_key: &str, filters: &FilterSet, extras: &[(&str, Value)]) -> String {
    let payload = filters.signature_value(extras);
    // Serializing a JSON object cannot fail.
    let hash = compute_hash(&payload).unwrap_or_default();
    format!("{CACHE_PREFIX}{report_key}:{hash}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn filters(pairs: &[(&str, &str)]) -> FilterSet {
        let raw: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let declared: Vec<String> = pairs.iter().map(|(k, _)| k.to_string()).collect();
        FilterSet::from_query(&raw, &[], &declared, &[], "t")
    }

    #[test]
    fn hash_is_deterministic() {
        let value = json!({"name": "test", "value": 42});
        let first = compute_hash(&value).unwrap();
        let second = compute_hash(&value).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn key_is_field_order_insensitive() {
        let a = report_cache_key("orders.sample", &filters(&[("a", "1"), ("b", "2")]), &[]);
        let b = report_cache_key("orders.sample", &filters(&[("b", "2"), ("a", "1")]), &[]);
        assert_eq!(a, b);
        assert!(a.starts_with("relato:report:orders.sample:"));
    }

    #[test]
    fn extras_change_the_key() {
        let base = filters(&[("a", "1")]);
        let plain = report_cache_key("orders.sample", &base, &[]);
        let windowed = report_cache_key(
            "orders.sample",
            &base,
            &[("_current", json!(["2025-01-01", "2025-12-31"]))],
        );
        assert_ne!(plain, windowed);
    }

    #[test]
    fn different_reports_never_collide() {
        let base = filters(&[("a", "1")]);
        assert_ne!(
            report_cache_key("orders.a", &base, &[]),
            report_cache_key("orders.b", &base, &[])
        );
    }
}
