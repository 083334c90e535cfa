//! Paid orders with no confirmed participants.
//!
//! Rows are never excluded by the anomaly rules; a rule firing only tags
//! the row with its issues and the highest fired severity.

use super::{first_item, first_of, text, today};
use crate::cache::report_cache_key;
use crate::error::EngineResult;
use crate::filters::FilterSet;
use crate::pipeline::{Pipeline, Record};
use crate::report::validate::{schema, FieldRule, Schema};
use crate::report::{Meta, ReportContext, ReportResult, ReportSpec};
use crate::rules::{RuleManager, Severity};
use serde_json::{json, Value};

const STALE_AFTER_DAYS: i64 = 30;

pub struct OrdersWithoutParticipants;

impl ReportSpec for OrdersWithoutParticipants {
    fn key(&self) -> &str {
        "orders.without_participants"
    }

    fn title(&self) -> &str {
        "Pedidos sem participantes confirmados"
    }

    fn rules(&self) -> Schema {
        schema(&[
            ("product[slug]", FieldRule::str_length(1, 100).optional()),
            ("order[created-start]", FieldRule::date().optional()),
            ("order[created-end]", FieldRule::date().optional()),
        ])
    }

    fn default_filters(&self) -> Vec<(String, String)> {
        vec![
            ("order[status]".into(), "payment_confirmed".into()),
            ("include".into(), "participants,items,customer".into()),
        ]
    }

    fn columns(&self) -> Vec<String> {
        [
            "uuid",
            "customer_name",
            "customer_whatsapp",
            "product",
            "created_at",
            "schedule_1",
            "schedule_2",
            "issues",
            "severity",
        ]
        .map(String::from)
        .to_vec()
    }

    fn sortable(&self) -> Vec<String> {
        ["created_at", "customer_name", "product"].map(String::from).to_vec()
    }

    fn cache_ttl(&self) -> i64 {
        900
    }

    fn run(&self, mut filters: FilterSet, ctx: &ReportContext) -> EngineResult<ReportResult> {
        filters.merge_includes(&["participants", "items", "customer"]);

        let cache_key = report_cache_key(self.key(), &filters, &[]);
        let ttl = filters.effective_ttl(self.cache_ttl());

        ctx.remember(&cache_key, ttl, || {
            let envelope = ctx
                .client()
                .search_orders(&filters.to_query(), filters.trace_id())?;

            let now = today();
            let mut manager = RuleManager::new();
            manager
                .add("missing_schedule", Severity::Warning, |row| {
                    let unscheduled = row.get("schedule_1").map_or(true, Value::is_null)
                        && row.get("schedule_2").map_or(true, Value::is_null);
                    unscheduled.then(|| json!("no session slot booked"))
                })
                .add("stale_order", Severity::Error, move |row| {
                    let created = row
                        .get("created_at")
                        .and_then(Value::as_str)
                        .and_then(super::parse_date)?;
                    let age = (now - created).num_days();
                    (age > STALE_AFTER_DAYS)
                        .then(|| json!(format!("order open for {age} days")))
                });

            let mut rows = Pipeline::new(envelope.data)
                .filter(|order| unconfirmed(order))
                .map(|order| {
                    let product = first_item(&order)
                        .map(|item| text(item, &["product", "name"]))
                        .unwrap_or_default();
                    let schedule_1 = first_of(&order, &[&["schedule_1"], &["schedule_one"]]);
                    let schedule_2 = first_of(&order, &[&["schedule_2"], &["schedule_two"]]);

                    let mut row = Record::new();
                    row.insert("uuid".into(), json!(text(&order, &["uuid"])));
                    row.insert("customer_name".into(), json!(text(&order, &["customer", "name"])));
                    row.insert(
                        "customer_whatsapp".into(),
                        json!(text(&order, &["customer", "whatsapp"])),
                    );
                    row.insert("product".into(), json!(product));
                    row.insert(
                        "created_at".into(),
                        order.get("created_at").cloned().unwrap_or(Value::Null),
                    );
                    row.insert("schedule_1".into(), schedule_1.cloned().unwrap_or(Value::Null));
                    row.insert("schedule_2".into(), schedule_2.cloned().unwrap_or(Value::Null));

                    let evaluation = manager.evaluate(&row);
                    row.insert("issues".into(), json!(evaluation.issues));
                    row.insert(
                        "severity".into(),
                        evaluation.severity.map_or(Value::Null, |s| json!(s)),
                    );
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

/// An order qualifies when it has no participant in a confirmed or
/// scheduled state.
fn unconfirmed(order: &Record) -> bool {
    let Some(participants) = order.get("participants").and_then(Value::as_array) else {
        return true;
    };
    if participants.is_empty() {
        return true;
    }

    !participants.iter().any(|participant| {
        matches!(
            participant.get("status").and_then(Value::as_str),
            Some("confirmed") | Some("scheduled")
        )
    })
}
