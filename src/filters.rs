//! Caller filter sets.
//!
//! A [`FilterSet`] is the normalized view of a report invocation's query:
//! plain filter fields merged over the report's defaults, with the
//! pagination/sort/cache directives (`page`, `per_page`, `sort`, `dir`,
//! `cache`, `cache_ttl`) extracted into typed fields. Directives are
//! excluded from the value map sent upstream but participate in the cache
//! signature, so semantically identical filter sets hash identically.

use crate::pipeline::SortDirection;
use serde_json::Value;
use std::collections::BTreeMap;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PER_PAGE: u32 = 50;
pub const MAX_PER_PAGE: u32 = 100;

/// Query keys that steer the engine rather than the upstream search.
pub const DIRECTIVE_KEYS: &[&str] = &["page", "per_page", "sort", "dir", "cache", "cache_ttl"];

/// Upstream search keys every report accepts without declaring them.
/// Caller keys outside this list, the report's defaults and its declared
/// params never reach the value map, so they cannot leak upstream or
/// inflate cache-key cardinality.
pub const ALLOWED_FILTER_KEYS: &[&str] = &[
    "order[uuid]",
    "order[status]",
    "order[created-start]",
    "order[created-end]",
    "order[session-start]",
    "order[session-end]",
    "order[selection-start]",
    "order[selection-end]",
    "customer[id]",
    "customer[uuid]",
    "customer[name]",
    "customer[email]",
    "customer[whatsapp]",
    "customer[document]",
    "product[uuid]",
    "product[name]",
    "product[slug]",
    "product[reference]",
    "include",
    "fields",
];

/// Normalized filters plus extracted directives for one report run.
#[derive(Debug, Clone)]
pub struct FilterSet {
    values: BTreeMap<String, String>,
    page: u32,
    per_page: u32,
    sort: Option<String>,
    dir: SortDirection,
    cache_enabled: bool,
    ttl_override: Option<i64>,
    trace_id: String,
}

impl FilterSet {
    /// Build a filter set from a raw query map.
    ///
    /// Defaults merge under the caller's input; empty and whitespace-only
    /// values are dropped, as is any caller key outside the allowed
    /// upstream keys, the defaults and the report's `declared` params.
    /// `sort` is kept only when whitelisted by `sortable`. The raw query
    /// is assumed validated (the engine checks directive shapes before
    /// calling this).
    pub fn from_query(
        raw: &BTreeMap<String, String>,
        defaults: &[(String, String)],
        declared: &[String],
        sortable: &[String],
        trace_id: &str,
    ) -> Self {
        let mut values = BTreeMap::new();
        for (key, value) in defaults {
            let value = value.trim();
            if !value.is_empty() {
                values.insert(key.clone(), value.to_string());
            }
        }

        for (key, value) in raw {
            if DIRECTIVE_KEYS.contains(&key.as_str()) {
                continue;
            }
            let recognized = ALLOWED_FILTER_KEYS.contains(&key.as_str())
                || defaults.iter().any(|(default_key, _)| default_key == key)
                || declared.contains(key);
            if !recognized {
                continue;
            }
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            values.insert(key.clone(), value.to_string());
        }

        let page = raw
            .get("page")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .map_or(DEFAULT_PAGE, |p| p.max(1));

        let per_page = raw
            .get("per_page")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .map_or(DEFAULT_PER_PAGE, |p| {
                if p < 1 {
                    DEFAULT_PER_PAGE
                } else {
                    p.min(MAX_PER_PAGE)
                }
            });

        let sort = raw
            .get("sort")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty() && sortable.iter().any(|allowed| allowed == s))
            .map(str::to_string);

        let dir = raw
            .get("dir")
            .map(|d| SortDirection::parse(d))
            .unwrap_or_default();

        let cache_enabled = raw
            .get("cache")
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false"))
            .unwrap_or(true);

        let ttl_override = raw
            .get("cache_ttl")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(|ttl| ttl.max(0));

        Self {
            values,
            page,
            per_page,
            sort,
            dir,
            cache_enabled,
            ttl_override,
            trace_id: trace_id.to_string(),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    pub fn sort(&self) -> Option<&str> {
        self.sort.as_deref()
    }

    pub fn dir(&self) -> SortDirection {
        self.dir
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Remove and return a filter value (used for report-specific fields
    /// that must not reach the upstream query).
    pub fn take(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Clone with one value replaced, for per-window query variants.
    pub fn with_value(&self, key: &str, value: &str) -> Self {
        let mut copy = self.clone();
        copy.set(key, value);
        copy
    }

    /// Union the comma-separated `include` relation list with the report's
    /// required relations, preserving existing order and deduplicating.
    pub fn merge_includes(&mut self, required: &[&str]) {
        if required.is_empty() {
            return;
        }

        let mut includes: Vec<String> = self
            .values
            .get("include")
            .map(|existing| {
                existing
                    .split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        for relation in required {
            if !includes.iter().any(|have| have == relation) {
                includes.push(relation.to_string());
            }
        }

        self.values.insert("include".into(), includes.join(","));
    }

    /// Query pairs for the upstream search: filter values plus the
    /// pagination the upstream expects. Key order is deterministic.
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        pairs.push(("page".into(), self.page.to_string()));
        pairs.push(("per_page".into(), self.per_page.to_string()));
        pairs
    }

    /// Effective cache TTL for this run: 0 when the caller disabled
    /// caching, the caller's override when given, else the report default.
    pub fn effective_ttl(&self, default_ttl: i64) -> i64 {
        if !self.cache_enabled {
            return 0;
        }
        self.ttl_override.unwrap_or(default_ttl)
    }

    /// Deterministic signature payload: the full normalized filter map
    /// (pagination included, as sent upstream) plus the sort directive and
    /// any report-specific extras. Keys are sorted, so field order in the
    /// caller's query never changes the signature.
    pub fn signature_value(&self, extras: &[(&str, Value)]) -> Value {
        let mut map = BTreeMap::new();
        for (key, value) in &self.values {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        map.insert("page".into(), Value::from(self.page));
        map.insert("per_page".into(), Value::from(self.per_page));
        map.insert(
            "_sort".into(),
            self.sort
                .as_ref()
                .map(|s| Value::String(s.clone()))
                .unwrap_or(Value::Null),
        );
        map.insert("_dir".into(), Value::String(self.dir.as_str().into()));
        for (key, value) in extras {
            map.insert(key.to_string(), value.clone());
        }

        let object: serde_json::Map<String, Value> = map.into_iter().collect();
        Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn defaults(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn caller_values_override_defaults() {
        let filters = FilterSet::from_query(
            &raw(&[("order[status]", "closed"), ("customer[name]", "  Ana  ")]),
            &defaults(&[("order[status]", "open"), ("include", "items")]),
            &[],
            &[],
            "t",
        );

        assert_eq!(filters.get("order[status]"), Some("closed"));
        assert_eq!(filters.get("include"), Some("items"));
        assert_eq!(filters.get("customer[name]"), Some("Ana"));
    }

    #[test]
    fn undeclared_keys_never_reach_the_value_map() {
        let filters = FilterSet::from_query(
            &raw(&[
                ("totally_bogus_key", "'; DROP TABLE orders"),
                ("customer[name]", "Ana"),
                ("format", "plain"),
            ]),
            &[],
            &["format".to_string()],
            &[],
            "t",
        );

        assert_eq!(filters.get("totally_bogus_key"), None);
        assert_eq!(filters.get("customer[name]"), Some("Ana"));
        assert_eq!(filters.get("format"), Some("plain"));
        assert!(!filters
            .to_query()
            .iter()
            .any(|(key, _)| key == "totally_bogus_key"));

        let clean = FilterSet::from_query(
            &raw(&[("customer[name]", "Ana"), ("format", "plain")]),
            &[],
            &["format".to_string()],
            &[],
            "t",
        );
        assert_eq!(filters.signature_value(&[]), clean.signature_value(&[]));
    }

    #[test]
    fn directives_are_extracted_not_kept_as_values() {
        let filters = FilterSet::from_query(
            &raw(&[
                ("page", "3"),
                ("per_page", "500"),
                ("sort", "name"),
                ("dir", "DESC"),
            ]),
            &[],
            &[],
            &["name".to_string()],
            "t",
        );

        assert_eq!(filters.page(), 3);
        assert_eq!(filters.per_page(), MAX_PER_PAGE);
        assert_eq!(filters.sort(), Some("name"));
        assert_eq!(filters.dir(), SortDirection::Desc);
        assert_eq!(filters.get("page"), None);
        assert_eq!(filters.get("sort"), None);
    }

    #[test]
    fn sort_outside_whitelist_is_dropped() {
        let filters = FilterSet::from_query(
            &raw(&[("sort", "secret_field")]),
            &[],
            &[],
            &["name".to_string()],
            "t",
        );
        assert_eq!(filters.sort(), None);
    }

    #[test]
    fn merge_includes_unions_and_dedupes() {
        let mut filters = FilterSet::from_query(
            &raw(&[("include", "customer, items")]),
            &[],
            &[],
            &[],
            "t",
        );
        filters.merge_includes(&["items", "participants"]);
        assert_eq!(filters.get("include"), Some("customer,items,participants"));
    }

    #[test]
    fn cache_directives() {
        let disabled = FilterSet::from_query(&raw(&[("cache", "0")]), &[], &[], &[], "t");
        assert_eq!(disabled.effective_ttl(600), 0);

        let overridden = FilterSet::from_query(&raw(&[("cache_ttl", "30")]), &[], &[], &[], "t");
        assert_eq!(overridden.effective_ttl(600), 30);

        let negative = FilterSet::from_query(&raw(&[("cache_ttl", "-5")]), &[], &[], &[], "t");
        assert_eq!(negative.effective_ttl(600), 0);

        let default = FilterSet::from_query(&raw(&[]), &[], &[], &[], "t");
        assert_eq!(default.effective_ttl(600), 600);
    }

    #[test]
    fn signature_is_order_insensitive() {
        let a = FilterSet::from_query(
            &raw(&[("b", "2"), ("a", "1")]),
            &[],
            &["a".to_string(), "b".to_string()],
            &[],
            "t",
        );
        let b = FilterSet::from_query(
            &raw(&[("a", "1"), ("b", "2")]),
            &[],
            &["a".to_string(), "b".to_string()],
            &[],
            "t",
        );
        assert_eq!(a.signature_value(&[]), b.signature_value(&[]));
    }

    #[test]
    fn signature_includes_sort_and_extras() {
        let filters = FilterSet::from_query(
            &raw(&[("sort", "name"), ("dir", "desc")]),
            &[],
            &[],
            &["name".to_string()],
            "t",
        );
        let value = filters.signature_value(&[("_current", json!(["2025-01-01", "2025-12-31"]))]);

        assert_eq!(value["_sort"], json!("name"));
        assert_eq!(value["_dir"], json!("desc"));
        assert_eq!(value["_current"][0], json!("2025-01-01"));
    }
}
