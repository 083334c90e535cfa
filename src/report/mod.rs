//! The report contract.
//!
//! A report is described by a [`ReportSpec`]: metadata (key, title,
//! validation rules, default filters, columns, sortable fields, cache
//! TTL) plus a body producing a [`ReportResult`]. Two kinds exist behind
//! the one trait:
//!
//! - class-like specs: a struct per report implementing the trait
//!   directly, owning its cache-key derivation (see [`crate::reports`]);
//! - declarative specs: plain data plus a runner callback, represented by
//!   [`ClosureReport`], whose caching the shared wrapper handles.
//!
//! Spec definitions are process-wide: loaded once at startup and never
//! mutated. Results are immutable once returned.

pub mod context;
pub mod validate;

pub use context::ReportContext;

use crate::cache::report_cache_key;
use crate::client::CrmClient;
use crate::error::EngineResult;
use crate::filters::FilterSet;
use crate::pipeline::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validate::Schema;

/// The `{data, summary, meta, columns}` bundle a report body returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResult {
    /// Ordered result records.
    pub data: Vec<Record>,
    /// Report-specific aggregates.
    pub summary: serde_json::Map<String, Value>,
    /// Pagination/cache/timing info.
    pub meta: Meta,
    /// Echo of the declared output schema.
    pub columns: Vec<String>,
}

impl ReportResult {
    pub fn new(data: Vec<Record>, columns: Vec<String>) -> Self {
        Self {
            data,
            summary: serde_json::Map::new(),
            meta: Meta::default(),
            columns,
        }
    }
}

/// Sort directive echoed back in meta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortMeta {
    pub field: String,
    pub direction: String,
}

/// Result metadata. Every field is optional at the body level; the engine
/// backfills unset fields after execution (`count == data.len()` always).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Data origin, defaulted to `"crm"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub took_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortMeta>,
    /// Report-specific keys (period boundaries, upstream meta echoes).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Meta {
    /// Start from a page's worth of pagination info.
    pub fn for_page(page: u32, per_page: u32) -> Self {
        Self {
            page: Some(page),
            per_page: Some(per_page),
            ..Self::default()
        }
    }

    /// Carry upstream envelope meta over: `total` is adopted when numeric,
    /// remaining unrecognized keys land in `extra`.
    pub fn from_upstream(upstream: &serde_json::Map<String, Value>) -> Self {
        const KNOWN: &[&str] = &[
            "page", "per_page", "total", "count", "source", "cache_hit", "cache_key", "took_ms",
            "sort",
        ];

        let mut meta = Self {
            total: upstream.get("total").and_then(Value::as_u64),
            ..Self::default()
        };
        for (key, value) in upstream {
            if !KNOWN.contains(&key.as_str()) {
                meta.extra.insert(key.clone(), value.clone());
            }
        }
        meta
    }
}

/// Catalog entry for [`crate::engine::Engine::list`].
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub key: String,
    pub title: String,
    pub description: String,
    pub columns: Vec<String>,
    /// Filter fields the report validates.
    pub params: Vec<String>,
}

/// The single contract both spec kinds satisfy.
pub trait ReportSpec: Send + Sync {
    fn key(&self) -> &str;

    fn title(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Filter validation schema, checked exhaustively before execution.
    fn rules(&self) -> Schema;

    /// Filters merged under the caller's input.
    fn default_filters(&self) -> Vec<(String, String)>;

    /// Ordered output field names.
    fn columns(&self) -> Vec<String>;

    /// Whitelist of sortable fields.
    fn sortable(&self) -> Vec<String>;

    /// Cache TTL in seconds; `<= 0` disables caching for this report.
    fn cache_ttl(&self) -> i64;

    fn run(&self, filters: FilterSet, ctx: &ReportContext) -> EngineResult<ReportResult>;
}

/// Runner callback of a declarative spec.
pub type Runner =
    Box<dyn Fn(&dyn CrmClient, &FilterSet, &str) -> EngineResult<ReportResult> + Send + Sync>;

/// Declarative report: metadata plus a runner callback.
///
/// Unlike class-like reports, the closure kind does not manage its own
/// caching; `run` wraps the runner in the shared memoizer keyed by the
/// normalized filter set.
pub struct ClosureReport {
    key: String,
    title: String,
    description: String,
    schema: Schema,
    defaults: Vec<(String, String)>,
    columns: Vec<String>,
    sortable: Vec<String>,
    cache_ttl: i64,
    runner: Runner,
}

impl ClosureReport {
    pub fn new(key: impl Into<String>, title: impl Into<String>, runner: Runner) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            description: String::new(),
            schema: Schema::new(),
            defaults: Vec::new(),
            columns: Vec::new(),
            sortable: Vec::new(),
            cache_ttl: 0,
            runner,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn rules(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    pub fn defaults(mut self, defaults: &[(&str, &str)]) -> Self {
        self.defaults = defaults
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn sortable(mut self, sortable: &[&str]) -> Self {
        self.sortable = sortable.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn cache_ttl(mut self, ttl_secs: i64) -> Self {
        self.cache_ttl = ttl_secs;
        self
    }
}

impl ReportSpec for ClosureReport {
    fn key(&self) -> &str {
        &self.key
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn rules(&self) -> Schema {
        self.schema.clone()
    }

    fn default_filters(&self) -> Vec<(String, String)> {
        self.defaults.clone()
    }

    fn columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn sortable(&self) -> Vec<String> {
        self.sortable.clone()
    }

    fn cache_ttl(&self) -> i64 {
        self.cache_ttl
    }

    fn run(&self, filters: FilterSet, ctx: &ReportContext) -> EngineResult<ReportResult> {
        let cache_key = report_cache_key(&self.key, &filters, &[]);
        let ttl = filters.effective_ttl(self.cache_ttl);

        ctx.remember(&cache_key, ttl, || {
            let mut result = (self.runner)(ctx.client(), &filters, filters.trace_id())?;
            if result.columns.is_empty() {
                result.columns = self.columns.clone();
            }
            Ok(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn meta_round_trips_through_json_with_extras() {
        let mut meta = Meta::for_page(2, 50);
        meta.total = Some(120);
        meta.extra.insert("periods".into(), json!({"current": "2025"}));

        let encoded = serde_json::to_string(&meta).unwrap();
        let decoded: Meta = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.page, Some(2));
        assert_eq!(decoded.total, Some(120));
        assert_eq!(decoded.extra["periods"]["current"], json!("2025"));
    }

    #[test]
    fn from_upstream_adopts_total_and_keeps_unknown_keys() {
        let mut upstream = serde_json::Map::new();
        upstream.insert("total".into(), json!(42));
        upstream.insert("crm_requests".into(), json!(3));
        upstream.insert("page".into(), json!(7));

        let meta = Meta::from_upstream(&upstream);
        assert_eq!(meta.total, Some(42));
        assert_eq!(meta.extra["crm_requests"], json!(3));
        // Upstream pagination is not adopted; the engine sets its own.
        assert_eq!(meta.page, None);
    }
}
