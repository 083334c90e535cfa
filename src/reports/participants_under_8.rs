//! Session participants younger than eight years.

use super::{age_in_years, first_item, first_of, parse_date, text, today};
use crate::cache::report_cache_key;
use crate::error::EngineResult;
use crate::filters::FilterSet;
use crate::pipeline::{Pipeline, Record};
use crate::report::validate::{schema, FieldRule, Schema};
use crate::report::{Meta, ReportContext, ReportResult, ReportSpec};
use chrono::Duration;
use serde_json::{json, Value};

const AGE_LIMIT: i32 = 8;

pub struct ParticipantsUnder8;

impl ReportSpec for ParticipantsUnder8 {
    fn key(&self) -> &str {
        "participants.under_8"
    }

    fn title(&self) -> &str {
        "Participantes com menos de 8 anos"
    }

    fn rules(&self) -> Schema {
        schema(&[
            ("product[slug]", FieldRule::str_length(1, 100).optional()),
            ("order[created-start]", FieldRule::date().optional()),
            ("order[created-end]", FieldRule::date().optional()),
        ])
    }

    fn default_filters(&self) -> Vec<(String, String)> {
        let end = today();
        let start = end - Duration::days(365);
        vec![
            ("order[created-start]".into(), start.format("%Y-%m-%d").to_string()),
            ("order[created-end]".into(), end.format("%Y-%m-%d").to_string()),
            ("include".into(), "participants,customer,items".into()),
        ]
    }

    fn columns(&self) -> Vec<String> {
        [
            "participant_name",
            "age",
            "birthdate",
            "order_uuid",
            "customer_name",
            "customer_whatsapp",
            "product",
        ]
        .map(String::from)
        .to_vec()
    }

    fn sortable(&self) -> Vec<String> {
        ["age", "participant_name", "birthdate"].map(String::from).to_vec()
    }

    fn cache_ttl(&self) -> i64 {
        1200
    }

    fn run(&self, mut filters: FilterSet, ctx: &ReportContext) -> EngineResult<ReportResult> {
        filters.merge_includes(&["participants", "customer", "items"]);

        let cache_key = report_cache_key(self.key(), &filters, &[]);
        let ttl = filters.effective_ttl(self.cache_ttl());

        ctx.remember(&cache_key, ttl, || {
            let envelope = ctx
                .client()
                .search_orders(&filters.to_query(), filters.trace_id())?;
            let now = today();

            let mut rows = Vec::new();
            let mut total_participants = 0u64;
            let mut under_limit = 0u64;

            for order in &envelope.data {
                let Some(participants) = order.get("participants").and_then(Value::as_array) else {
                    continue;
                };

                for participant in participants {
                    let Some(participant) = participant.as_object() else {
                        continue;
                    };
                    total_participants += 1;

                    let birthdate_raw = first_of(participant, &[&["birthdate"], &["birth"]])
                        .and_then(Value::as_str);
                    let Some(age) = birthdate_raw
                        .and_then(parse_date)
                        .map(|birth| age_in_years(birth, now))
                    else {
                        continue;
                    };
                    if age >= AGE_LIMIT {
                        continue;
                    }
                    under_limit += 1;

                    let product = first_item(order)
                        .map(|item| text(item, &["product", "name"]))
                        .unwrap_or_default();

                    let mut row = Record::new();
                    row.insert("participant_name".into(), json!(text(participant, &["name"])));
                    row.insert("age".into(), json!(age));
                    row.insert(
                        "birthdate".into(),
                        birthdate_raw.map_or(Value::Null, |b| json!(b)),
                    );
                    row.insert("order_uuid".into(), json!(text(order, &["uuid"])));
                    row.insert("customer_name".into(), json!(text(order, &["customer", "name"])));
                    row.insert(
                        "customer_whatsapp".into(),
                        json!(text(order, &["customer", "whatsapp"])),
                    );
                    row.insert("product".into(), json!(product));
                    rows.push(row);
                }
            }

            if let Some(field) = filters.sort() {
                rows = Pipeline::new(rows).sort(field, filters.dir()).into_vec();
            }

            let percent_under = if total_participants > 0 {
                super::round2(under_limit as f64 / total_participants as f64 * 100.0)
            } else {
                0.0
            };

            let mut result = ReportResult::new(rows, self.columns());
            result.meta = Meta::from_upstream(&envelope.meta);
            result.meta.page = Some(filters.page());
            result.meta.per_page = Some(filters.per_page());
            result.summary.insert("under_8".into(), json!(under_limit));
            result.summary.insert(
                "total_participants_checked".into(),
                json!(total_participants),
            );
            result.summary.insert("percent_under_8".into(), json!(percent_under));
            Ok(result)
        })
    }
}
