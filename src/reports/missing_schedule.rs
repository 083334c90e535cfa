//! Paid orders with neither session slot booked.

use super::{first_item, first_of, text, today};
use crate::pipeline::{Pipeline, Record};
use crate::report::validate::{schema, FieldRule};
use crate::report::{ClosureReport, Meta, ReportResult};
use chrono::Duration;
use serde_json::{json, Value};

pub fn missing_schedule() -> ClosureReport {
    let start = (today() - Duration::days(90)).format("%Y-%m-%d").to_string();
    let end = today().format("%Y-%m-%d").to_string();

    ClosureReport::new(
        "orders.missing_schedule",
        "Pedidos com pagamento confirmado e sem agendamento",
        Box::new(|client, filters, trace_id| {
            let envelope = client.search_orders(&filters.to_query(), trace_id)?;

            let rows = Pipeline::new(envelope.data)
                .filter(|order| {
                    first_of(order, &[&["schedule_1"], &["schedule_one"]]).is_none()
                        && first_of(order, &[&["schedule_2"], &["schedule_two"]]).is_none()
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
                    row.insert("product".into(), json!(product));
                    row.insert(
                        "created_at".into(),
                        order.get("created_at").cloned().unwrap_or(Value::Null),
                    );
                    row
                })
                .into_vec();

            let mut result = ReportResult::new(rows, Vec::new());
            result.meta = Meta::from_upstream(&envelope.meta);
            result.summary.insert("total".into(), json!(result.data.len()));
            Ok(result)
        }),
    )
    .rules(schema(&[
        ("product[slug]", FieldRule::str_length(1, 64).optional()),
        ("order[created-start]", FieldRule::date().optional()),
        ("order[created-end]", FieldRule::date().optional()),
    ]))
    .defaults(&[
        ("order[status]", "payment_confirmed"),
        ("order[created-start]", start.as_str()),
        ("order[created-end]", end.as_str()),
        ("include", "items,customer"),
    ])
    .columns(&["uuid", "customer_name", "customer_whatsapp", "product", "created_at"])
    .sortable(&["created_at", "customer_name", "product"])
    .cache_ttl(900)
}
