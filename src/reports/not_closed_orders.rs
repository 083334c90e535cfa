//! Orders with a confirmed session that were never closed out.

use super::{first_item, first_of, text, today};
use crate::cache::report_cache_key;
use crate::error::EngineResult;
use crate::filters::FilterSet;
use crate::pipeline::{Pipeline, Record};
use crate::report::validate::{schema, FieldRule, Schema};
use crate::report::{Meta, ReportContext, ReportResult, ReportSpec};
use chrono::Duration;
use serde_json::{json, Value};

const TERMINAL_STATUSES: &[&str] = &["closed", "finished", "cancelled"];

pub struct NotClosedOrders;

impl ReportSpec for NotClosedOrders {
    fn key(&self) -> &str {
        "orders.not_closed"
    }

    fn title(&self) -> &str {
        "Pedidos com sessao confirmada e nao fechados"
    }

    fn rules(&self) -> Schema {
        schema(&[
            ("order[session-start]", FieldRule::date().optional()),
            ("order[session-end]", FieldRule::date().optional()),
            ("order[status]", FieldRule::str_length(2, 64).optional()),
        ])
    }

    fn default_filters(&self) -> Vec<(String, String)> {
        let end = today();
        let start = end - Duration::days(30);
        vec![
            ("order[status]".into(), "session_schedule".into()),
            ("order[session-start]".into(), start.format("%Y-%m-%d").to_string()),
            ("order[session-end]".into(), end.format("%Y-%m-%d").to_string()),
            ("include".into(), "customer,items".into()),
        ]
    }

    fn columns(&self) -> Vec<String> {
        [
            "uuid",
            "customer_name",
            "customer_whatsapp",
            "session_date",
            "status",
            "product",
        ]
        .map(String::from)
        .to_vec()
    }

    fn sortable(&self) -> Vec<String> {
        ["session_date", "customer_name"].map(String::from).to_vec()
    }

    fn cache_ttl(&self) -> i64 {
        600
    }

    fn run(&self, mut filters: FilterSet, ctx: &ReportContext) -> EngineResult<ReportResult> {
        filters.merge_includes(&["customer", "items"]);

        let cache_key = report_cache_key(self.key(), &filters, &[]);
        let ttl = filters.effective_ttl(self.cache_ttl());

        ctx.remember(&cache_key, ttl, || {
            let envelope = ctx
                .client()
                .search_orders(&filters.to_query(), filters.trace_id())?;

            let mut rows = Pipeline::new(envelope.data)
                .filter(|order| {
                    let status = text(order, &["status"]);
                    if status.is_empty() || TERMINAL_STATUSES.contains(&status.as_str()) {
                        return false;
                    }
                    session_date(order).is_some()
                })
                .map(|order| {
                    let product = first_item(&order)
                        .map(|item| text(item, &["product", "name"]))
                        .unwrap_or_default();

                    let mut row = Record::new();
                    row.insert("uuid".into(), json!(text(&order, &["uuid"])));
                    row.insert("customer_name".into(), json!(text(&order, &["customer", "name"])));
                    row.insert(
                        "customer_whatsapp".into(),
                        json!(text(&order, &["customer", "whatsapp"])),
                    );
                    row.insert(
                        "session_date".into(),
                        session_date(&order).map_or(Value::Null, |d| json!(d)),
                    );
                    row.insert("status".into(), json!(text(&order, &["status"])));
                    row.insert("product".into(), json!(product));
                    row
                })
                .into_vec();

            if let Some(field) = filters.sort() {
                rows = Pipeline::new(rows).sort(field, filters.dir()).into_vec();
            }

            let mut result = ReportResult::new(rows, self.columns());
            result.meta = Meta::from_upstream(&envelope.meta);
            result.meta.page = Some(filters.page());
            result.meta.per_page = Some(filters.per_page());
            result.summary.insert("total".into(), json!(result.data.len()));
            Ok(result)
        })
    }
}

fn session_date(order: &Record) -> Option<String> {
    first_of(
        order,
        &[
            &["session", "date"],
            &["session", "start"],
            &["session_start"],
        ],
    )
    .and_then(Value::as_str)
    .map(str::to_string)
}
