//! Engine-level integration tests: validation, caching, meta backfill and
//! exports against a scripted upstream.

use relato::cache::{CacheError, CacheResult, CacheStore, MemoryCacheStore};
use relato::client::{ApiEnvelope, CrmClient, CrmResult};
use relato::pipeline::Record;
use relato::report::ReportContext;
use relato::reports;
use relato::{Engine, EngineError};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Upstream returning scripted envelopes in order, repeating the last one,
/// and recording every query it was asked.
struct QueueCrm {
    envelopes: Vec<ApiEnvelope>,
    queries: Mutex<Vec<Vec<(String, String)>>>,
}

impl QueueCrm {
    fn new(envelopes: Vec<ApiEnvelope>) -> Self {
        Self {
            envelopes,
            queries: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    fn query(&self, call: usize) -> Vec<(String, String)> {
        self.queries.lock().unwrap()[call].clone()
    }
}

impl CrmClient for QueueCrm {
    fn get(
        &self,
        _endpoint: &str,
        query: &[(String, String)],
        _trace_id: &str,
    ) -> CrmResult<ApiEnvelope> {
        let mut queries = self.queries.lock().unwrap();
        let index = queries.len().min(self.envelopes.len().saturating_sub(1));
        queries.push(query.to_vec());
        Ok(self.envelopes.get(index).cloned().unwrap_or_default())
    }
}

struct BrokenStore;

impl CacheStore for BrokenStore {
    fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Err(CacheError::Backend("connection refused".into()))
    }

    fn setex(&self, _key: &str, _ttl: u64, _value: &str) -> CacheResult<()> {
        Err(CacheError::Backend("connection refused".into()))
    }
}

fn order(customer_whatsapp: &str) -> Record {
    json!({
        "uuid": "o-1",
        "status": "payment_confirmed",
        "customer": {"name": "Ana", "whatsapp": customer_whatsapp},
        "items": [{"product": {"name": "Ensaio"}}],
    })
    .as_object()
    .cloned()
    .unwrap()
}

fn envelope(data: Vec<Record>) -> ApiEnvelope {
    ApiEnvelope {
        data,
        ..ApiEnvelope::default()
    }
}

fn engine_with(crm: Arc<QueueCrm>, cache: Option<Arc<dyn CacheStore>>) -> Engine {
    let mut ctx = ReportContext::new(crm);
    if let Some(cache) = cache {
        ctx = ctx.with_cache(cache);
    }
    let mut engine = Engine::new(ctx);
    reports::install(&mut engine);
    engine
}

fn query(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn list_enumerates_the_catalog() {
    let crm = Arc::new(QueueCrm::new(vec![envelope(Vec::new())]));
    let engine = engine_with(crm.clone(), None);

    let catalog = engine.list();
    assert_eq!(catalog.len(), 8);

    let keys: Vec<&str> = catalog.iter().map(|s| s.key.as_str()).collect();
    assert!(keys.contains(&"orders.finalized_late_selections"));
    assert!(keys.contains(&"orders.presale_vs_current"));
    assert!(keys.contains(&"orders.photos_ready"));
    assert!(keys.contains(&"phones.for_campaign"));

    // Listing never touches the upstream.
    assert_eq!(crm.calls(), 0);
}

#[test]
fn unknown_report_key_is_not_found() {
    let crm = Arc::new(QueueCrm::new(vec![envelope(Vec::new())]));
    let engine = engine_with(crm, None);

    let error = engine.run("orders.nonexistent", &query(&[]), None).unwrap_err();
    assert!(matches!(error, EngineError::UnknownReport(key) if key == "orders.nonexistent"));
}

#[test]
fn three_invalid_fields_yield_three_errors_and_no_upstream_call() {
    let crm = Arc::new(QueueCrm::new(vec![envelope(Vec::new())]));
    let engine = engine_with(crm.clone(), None);

    let error = engine
        .run(
            "orders.finalized_late_selections",
            &query(&[
                ("order[selection-start]", "not-a-date"),
                ("order[selection-end]", "2025-02-30"),
                ("order[status]", "x"),
            ]),
            None,
        )
        .unwrap_err();

    let errors = error.validation_errors().expect("validation failure");
    assert_eq!(errors.len(), 3);
    assert_eq!(crm.calls(), 0);
}

#[test]
fn invalid_directives_are_collected_alongside_field_errors() {
    let crm = Arc::new(QueueCrm::new(vec![envelope(Vec::new())]));
    let engine = engine_with(crm, None);

    let error = engine
        .run(
            "phones.for_campaign",
            &query(&[("dir", "sideways"), ("per_page", "0")]),
            None,
        )
        .unwrap_err();

    let errors = error.validation_errors().expect("validation failure");
    let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
    assert!(fields.contains(&"dir"));
    assert!(fields.contains(&"per_page"));
}

#[test]
fn undeclared_filter_keys_are_not_forwarded_upstream() {
    let crm = Arc::new(QueueCrm::new(vec![envelope(Vec::new())]));
    let engine = engine_with(crm.clone(), None);

    engine
        .run(
            "phones.for_campaign",
            &query(&[("totally_bogus_key", "'; DROP TABLE orders")]),
            None,
        )
        .unwrap();

    let upstream = crm.query(0);
    assert!(!upstream.iter().any(|(key, _)| key == "totally_bogus_key"));
}

#[test]
fn cache_idempotence_within_ttl() {
    let crm = Arc::new(QueueCrm::new(vec![envelope(vec![order("+55 (11) 91234-5678")])]));
    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
    let engine = engine_with(crm.clone(), Some(cache));

    let raw = query(&[("order[status]", "payment_confirmed")]);
    let first = engine.run("phones.for_campaign", &raw, None).unwrap();
    let second = engine.run("phones.for_campaign", &raw, None).unwrap();

    assert_eq!(first.data, second.data);
    assert_eq!(first.summary, second.summary);
    assert_eq!(first.columns, second.columns);
    assert_eq!(first.meta.cache_hit, Some(false));
    assert_eq!(second.meta.cache_hit, Some(true));
    assert_eq!(crm.calls(), 1);
}

#[test]
fn cache_outage_still_returns_a_correct_result() {
    let crm = Arc::new(QueueCrm::new(vec![envelope(vec![order("11 91234-5678")])]));
    let engine = engine_with(crm, Some(Arc::new(BrokenStore)));

    let result = engine.run("phones.for_campaign", &query(&[]), None).unwrap();
    assert_eq!(result.meta.cache_hit, Some(false));
    assert_eq!(result.data[0]["whatsapp"], json!("11912345678"));
}

#[test]
fn caller_can_disable_caching_per_request() {
    let crm = Arc::new(QueueCrm::new(vec![envelope(Vec::new())]));
    let store = Arc::new(MemoryCacheStore::new());
    let cache: Arc<dyn CacheStore> = store.clone();
    let engine = engine_with(crm, Some(cache));

    engine
        .run("phones.for_campaign", &query(&[("cache", "0")]), None)
        .unwrap();
    assert!(store.is_empty());
}

#[test]
fn meta_is_backfilled_after_execution() {
    let crm = Arc::new(QueueCrm::new(vec![envelope(vec![order("11987654321")])]));
    let engine = engine_with(crm, None);

    let result = engine
        .run("phones.for_campaign", &query(&[]), Some("trace-1"))
        .unwrap();

    assert_eq!(result.meta.count, Some(result.data.len() as u64));
    assert_eq!(result.meta.page, Some(1));
    assert_eq!(result.meta.per_page, Some(50));
    assert_eq!(result.meta.source.as_deref(), Some("crm"));
    assert!(result.meta.took_ms.is_some());
    assert_eq!(result.meta.cache_hit, Some(false));
}

#[test]
fn export_rejects_unknown_formats() {
    let crm = Arc::new(QueueCrm::new(vec![envelope(Vec::new())]));
    let engine = engine_with(crm, None);

    let error = engine
        .export("phones.for_campaign", &query(&[]), "xml", None)
        .unwrap_err();
    let errors = error.validation_errors().expect("validation failure");
    assert_eq!(errors[0].field, "format");
}

#[test]
fn export_widens_the_page_and_names_the_file() {
    let crm = Arc::new(QueueCrm::new(vec![envelope(vec![order("11912345678")])]));
    let engine = engine_with(crm.clone(), None);

    let export = engine
        .export("phones.for_campaign", &query(&[]), "csv", None)
        .unwrap();

    assert!(export.filename.starts_with("phones-for_campaign-"));
    assert!(export.filename.ends_with(".csv"));
    assert_eq!(export.filename.matches('.').count(), 1);
    assert_eq!(export.content_type, "text/csv");

    let text = String::from_utf8(export.bytes).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("whatsapp"));
    assert_eq!(lines.next(), Some("11912345678"));

    let upstream_query = crm.query(0);
    assert!(upstream_query.contains(&("per_page".to_string(), "100".to_string())));
}

#[test]
fn export_json_is_the_bare_data_array() {
    let crm = Arc::new(QueueCrm::new(vec![envelope(vec![order("11912345678")])]));
    let engine = engine_with(crm, None);

    let export = engine
        .export("phones.for_campaign", &query(&[]), "json", None)
        .unwrap();
    assert_eq!(export.content_type, "application/json");

    let decoded: serde_json::Value = serde_json::from_slice(&export.bytes).unwrap();
    assert!(decoded.is_array());
    assert_eq!(decoded[0]["whatsapp"], json!("11912345678"));
}
