//! Report registry and front door.
//!
//! The [`Engine`] owns the catalog of registered [`ReportSpec`]s and runs
//! them: validate the caller's query exhaustively, normalize it into a
//! [`FilterSet`], execute the report, then backfill result metadata so every
//! response carries the same pagination/timing/cache fields regardless of
//! which report produced it.

use crate::error::{EngineError, EngineResult};
use crate::filters::{FilterSet, MAX_PER_PAGE};
use crate::report::validate::{validate, FieldError, FieldRule};
use crate::report::{ReportContext, ReportResult, ReportSpec, ReportSummary, SortMeta};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

/// A rendered export artifact.
#[derive(Debug, Clone)]
pub struct Export {
    /// `<report-key>-<UTC timestamp>.<format>`.
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// The report catalog plus the services reports run against.
pub struct Engine {
    reports: Vec<Box<dyn ReportSpec>>,
    index: HashMap<String, usize>,
    ctx: ReportContext,
}

impl Engine {
    pub fn new(ctx: ReportContext) -> Self {
        Self {
            reports: Vec::new(),
            index: HashMap::new(),
            ctx,
        }
    }

    /// Register a report spec.
    ///
    /// # Panics
    ///
    /// Panics when a spec with the same key is already registered. The
    /// catalog is assembled once at startup; a duplicate key is a
    /// programming error, not a runtime condition.
    pub fn register(&mut self, spec: Box<dyn ReportSpec>) -> &mut Self {
        let key = spec.key().to_string();
        if self.index.contains_key(&key) {
            panic!("duplicate report key: {key}");
        }
        self.index.insert(key, self.reports.len());
        self.reports.push(spec);
        self
    }

    /// Catalog entries in registration order.
    pub fn list(&self) -> Vec<ReportSummary> {
        self.reports
            .iter()
            .map(|spec| ReportSummary {
                key: spec.key().to_string(),
                title: spec.title().to_string(),
                description: spec.description().to_string(),
                columns: spec.columns(),
                params: spec.rules().into_iter().map(|(field, _)| field).collect(),
            })
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&dyn ReportSpec> {
        self.index.get(key).map(|&i| self.reports[i].as_ref())
    }

    /// Validate, normalize and execute a report.
    pub fn run(
        &self,
        key: &str,
        raw: &BTreeMap<String, String>,
        trace_id: Option<&str>,
    ) -> EngineResult<ReportResult> {
        let spec = self
            .get(key)
            .ok_or_else(|| EngineError::UnknownReport(key.to_string()))?;

        let schema = spec.rules();
        let mut errors = validate_directives(raw);
        errors.extend(validate(raw, &schema));
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }

        let trace_id = trace_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let declared: Vec<String> = schema.into_iter().map(|(field, _)| field).collect();
        let filters = FilterSet::from_query(
            raw,
            &spec.default_filters(),
            &declared,
            &spec.sortable(),
            &trace_id,
        );

        info!(report = key, trace_id = %trace_id, page = filters.page(), "report started");
        let started = Instant::now();

        let mut result = spec.run(filters.clone(), &self.ctx)?;
        backfill_meta(&mut result, &filters, started);

        info!(
            report = key,
            trace_id = %trace_id,
            records = result.data.len(),
            cache_hit = result.meta.cache_hit.unwrap_or(false),
            took_ms = result.meta.took_ms.unwrap_or(0),
            "report finished"
        );

        Ok(result)
    }

    /// Run a report and render its data as a downloadable artifact.
    ///
    /// Exports widen the page to the maximum size so a single run covers
    /// as much of the result as one response can.
    pub fn export(
        &self,
        key: &str,
        raw: &BTreeMap<String, String>,
        format: &str,
        trace_id: Option<&str>,
    ) -> EngineResult<Export> {
        let format = format.trim().to_ascii_lowercase();
        if format != "csv" && format != "json" {
            return Err(EngineError::Validation(vec![FieldError::new(
                "format",
                "must be one of: csv, json",
            )]));
        }

        let mut raw = raw.clone();
        raw.entry("per_page".into())
            .or_insert_with(|| MAX_PER_PAGE.to_string());

        let result = self.run(key, &raw, trace_id)?;
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
        let safe_key = key.replace(['.', '/'], "-");
        let filename = format!("{safe_key}-{stamp}.{format}");

        let (content_type, bytes) = match format.as_str() {
            "csv" => ("text/csv", render_csv(&result)?),
            _ => (
                "application/json",
                serde_json::to_vec(&result.data)
                    .map_err(|e| EngineError::Internal(e.to_string()))?,
            ),
        };

        Ok(Export {
            filename,
            content_type,
            bytes,
        })
    }
}

/// Shape checks for the engine-level directive keys. Reports never see
/// these; they are validated here once for every report.
fn validate_directives(raw: &BTreeMap<String, String>) -> Vec<FieldError> {
    let mut errors = Vec::new();

    let shapes: &[(&str, FieldRule)] = &[
        ("page", FieldRule::int_range(1, 1_000_000).optional()),
        ("per_page", FieldRule::int_range(1, MAX_PER_PAGE as i64).optional()),
        ("cache_ttl", FieldRule::int_range(0, i64::MAX).optional()),
    ];
    for (field, rule) in shapes {
        if let Err(message) = rule.check(raw.get(*field).map(String::as_str)) {
            errors.push(FieldError::new(*field, message));
        }
    }

    if let Some(dir) = raw.get("dir") {
        let dir = dir.trim().to_ascii_lowercase();
        if !dir.is_empty() && dir != "asc" && dir != "desc" {
            errors.push(FieldError::new("dir", "must be one of: asc, desc"));
        }
    }

    if let Some(cache) = raw.get("cache") {
        let cache = cache.trim().to_ascii_lowercase();
        if !cache.is_empty() && !matches!(cache.as_str(), "0" | "1" | "true" | "false") {
            errors.push(FieldError::new("cache", "must be one of: 0, 1, true, false"));
        }
    }

    errors
}

/// Fill the metadata fields a report body left unset.
fn backfill_meta(result: &mut ReportResult, filters: &FilterSet, started: Instant) {
    let meta = &mut result.meta;
    let count = result.data.len() as u64;

    meta.page.get_or_insert(filters.page());
    meta.per_page.get_or_insert(filters.per_page());
    meta.count = Some(count);
    meta.total.get_or_insert(count);
    meta.source.get_or_insert_with(|| "crm".to_string());
    meta.cache_hit.get_or_insert(false);
    meta.took_ms = Some(started.elapsed().as_millis() as u64);

    if meta.sort.is_none() {
        if let Some(field) = filters.sort() {
            meta.sort = Some(SortMeta {
                field: field.to_string(),
                direction: filters.dir().as_str().to_string(),
            });
        }
    }
}

/// Render result rows as CSV in column order. Null renders empty, scalars
/// render bare, nested values render as compact JSON.
fn render_csv(result: &ReportResult) -> EngineResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer
        .write_record(&result.columns)
        .map_err(|e| EngineError::Internal(e.to_string()))?;

    for record in &result.data {
        let row: Vec<String> = result
            .columns
            .iter()
            .map(|column| csv_cell(record.get(column)))
            .collect();
        writer
            .write_record(&row)
            .map_err(|e| EngineError::Internal(e.to_string()))?;
    }

    writer
        .into_inner()
        .map_err(|e| EngineError::Internal(e.to_string()))
}

fn csv_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(nested) => nested.to_string(),
    }
}
