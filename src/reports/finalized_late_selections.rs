//! Orders whose photo selection finished at least ten days ago but were
//! never closed out.

use super::{date_of, first_item, text, today};
use crate::cache::report_cache_key;
use crate::error::EngineResult;
use crate::filters::FilterSet;
use crate::pipeline::{Pipeline, Record};
use crate::report::validate::{schema, FieldRule, Schema};
use crate::report::{Meta, ReportContext, ReportResult, ReportSpec};
use chrono::Duration;
use serde_json::{json, Value};

const TERMINAL_STATUSES: &[&str] = &["closed", "finished", "cancelled"];
const LATE_AFTER_DAYS: i64 = 10;

pub struct FinalizedLateSelections;

impl ReportSpec for FinalizedLateSelections {
    fn key(&self) -> &str {
        "orders.finalized_late_selections"
    }

    fn title(&self) -> &str {
        "Selecoes finalizadas ha mais de 10 dias sem fechamento"
    }

    fn rules(&self) -> Schema {
        schema(&[
            ("order[selection-start]", FieldRule::date().optional()),
            ("order[selection-end]", FieldRule::date().optional()),
            ("order[status]", FieldRule::str_length(2, 64).optional()),
        ])
    }

    fn default_filters(&self) -> Vec<(String, String)> {
        let cutoff = today() - Duration::days(LATE_AFTER_DAYS);
        vec![
            ("order[status]".into(), "selection_schedule_confirmed".into()),
            ("order[selection-end]".into(), cutoff.format("%Y-%m-%d").to_string()),
            ("include".into(), "customer,items".into()),
        ]
    }

    fn columns(&self) -> Vec<String> {
        [
            "uuid",
            "customer_name",
            "selection_end",
            "session_end",
            "days_since_selection",
            "status",
            "product",
        ]
        .map(String::from)
        .to_vec()
    }

    fn sortable(&self) -> Vec<String> {
        ["selection_end", "customer_name", "days_since_selection"]
            .map(String::from)
            .to_vec()
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
            let now = today();

            let mut rows = Pipeline::new(envelope.data)
                .filter(|order| {
                    let Some(selection_end) = selection_end(order) else {
                        return false;
                    };
                    if (now - selection_end).num_days() < LATE_AFTER_DAYS {
                        return false;
                    }
                    let status = text(order, &["status"]);
                    !status.is_empty() && !TERMINAL_STATUSES.contains(&status.as_str())
                })
                .map(|order| {
                    let selection = selection_end(&order);
                    let session = date_of(&order, &[&["session", "end"], &["session_end"]]);
                    let days = selection.map(|end| (now - end).num_days());
                    let product = first_item(&order)
                        .map(|item| text(item, &["product", "name"]))
                        .unwrap_or_default();

                    let mut row = Record::new();
                    row.insert("uuid".into(), json!(text(&order, &["uuid"])));
                    row.insert("customer_name".into(), json!(text(&order, &["customer", "name"])));
                    row.insert(
                        "selection_end".into(),
                        selection.map_or(Value::Null, |d| json!(d.to_string())),
                    );
                    row.insert(
                        "session_end".into(),
                        session.map_or(Value::Null, |d| json!(d.to_string())),
                    );
                    row.insert(
                        "days_since_selection".into(),
                        days.map_or(Value::Null, |d| json!(d)),
                    );
                    row.insert("status".into(), json!(text(&order, &["status"])));
                    row.insert("product".into(), json!(product));
                    row
                })
                .into_vec();

            if let Some(field) = filters.sort() {
                rows = Pipeline::new(rows).sort(field, filters.dir()).into_vec();
            }

            let total_days: i64 = rows
                .iter()
                .filter_map(|row| row.get("days_since_selection"))
                .filter_map(Value::as_i64)
                .sum();
            let avg = if rows.is_empty() {
                0.0
            } else {
                total_days as f64 / rows.len() as f64
            };

            let mut result = ReportResult::new(rows, self.columns());
            result.meta = Meta::from_upstream(&envelope.meta);
            result.meta.page = Some(filters.page());
            result.meta.per_page = Some(filters.per_page());
            result.summary.insert("total".into(), json!(result.data.len()));
            result.summary.insert("avg_days_since_selection".into(), json!(avg));
            Ok(result)
        })
    }
}

fn selection_end(order: &Record) -> Option<chrono::NaiveDate> {
    date_of(order, &[&["selection", "end"], &["selection_end"]])
}
