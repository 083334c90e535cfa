//! Deduplicated customer WhatsApp numbers for campaign sends.

use crate::pipeline::Record;
use crate::report::validate::{schema, FieldRule};
use crate::report::{ClosureReport, Meta, ReportResult};
use serde_json::{json, Value};
use std::collections::BTreeSet;

pub fn phones_for_campaign() -> ClosureReport {
    ClosureReport::new(
        "phones.for_campaign",
        "WhatsApps de clientes elegiveis para campanhas",
        Box::new(|client, filters, trace_id| {
            let mut query = filters.clone();
            query.take("format");

            let envelope = client.search_orders(&query.to_query(), trace_id)?;

            let mut phones: BTreeSet<String> = BTreeSet::new();
            for order in &envelope.data {
                let Some(raw) = order
                    .get("customer")
                    .and_then(|c| c.get("whatsapp"))
                    .and_then(Value::as_str)
                else {
                    continue;
                };
                let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
                if !digits.is_empty() {
                    phones.insert(digits);
                }
            }

            let rows: Vec<Record> = phones
                .into_iter()
                .map(|number| {
                    let mut row = Record::new();
                    row.insert("whatsapp".into(), json!(number));
                    row
                })
                .collect();

            let mut result = ReportResult::new(rows, Vec::new());
            result.meta = Meta::from_upstream(&envelope.meta);
            result
                .summary
                .insert("unique_numbers".into(), json!(result.data.len()));
            Ok(result)
        }),
    )
    .rules(schema(&[
        ("product[slug]", FieldRule::str_length(1, 64).optional()),
        ("order[status]", FieldRule::str_length(1, 64).optional()),
        ("format", FieldRule::one_of(&["plain", "json"]).optional()),
    ]))
    .defaults(&[("order[status]", "payment_confirmed"), ("include", "customer")])
    .columns(&["whatsapp"])
    .sortable(&["whatsapp"])
    .cache_ttl(600)
}
