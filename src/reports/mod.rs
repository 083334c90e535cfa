//! Concrete report bodies.
//!
//! Every body follows the same template: merge required upstream include
//! relations, derive the cache key from the normalized filters, wrap the
//! body in the memoizer, fetch from the CRM, shape through the pipeline,
//! compute the summary. The helpers here cover the shared record-poking:
//! nested field access, tolerant date parsing, order totals and package
//! naming.

mod finalized_late_selections;
mod missing_schedule;
mod not_closed_orders;
mod orders_without_participants;
mod participants_under_8;
mod phones_for_campaign;
mod photos_ready;
mod presale_vs_current;

pub use finalized_late_selections::FinalizedLateSelections;
pub use missing_schedule::missing_schedule;
pub use not_closed_orders::NotClosedOrders;
pub use orders_without_participants::OrdersWithoutParticipants;
pub use participants_under_8::ParticipantsUnder8;
pub use phones_for_campaign::phones_for_campaign;
pub use photos_ready::photos_ready;
pub use presale_vs_current::PresaleVsCurrent;

use crate::engine::Engine;
use crate::pipeline::Record;
use chrono::{Local, NaiveDate};
use serde_json::Value;

/// Register every built-in report.
pub fn install(engine: &mut Engine) {
    engine.register(Box::new(FinalizedLateSelections));
    engine.register(Box::new(PresaleVsCurrent));
    engine.register(Box::new(ParticipantsUnder8));
    engine.register(Box::new(NotClosedOrders));
    engine.register(Box::new(OrdersWithoutParticipants));
    engine.register(Box::new(missing_schedule()));
    engine.register(Box::new(phones_for_campaign()));
    engine.register(Box::new(photos_ready()));
}

pub(crate) fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Walk a nested path through a record.
pub(crate) fn value_at<'a>(record: &'a Record, path: &[&str]) -> Option<&'a Value> {
    let mut current = record.get(*path.first()?)?;
    for key in &path[1..] {
        current = current.as_object()?.get(*key)?;
    }
    Some(current)
}

/// Nested string field, empty when absent or non-scalar.
pub(crate) fn text(record: &Record, path: &[&str]) -> String {
    match value_at(record, path) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// First non-null value among several fallback paths.
pub(crate) fn first_of<'a>(record: &'a Record, paths: &[&[&str]]) -> Option<&'a Value> {
    paths
        .iter()
        .filter_map(|path| value_at(record, path))
        .find(|value| !value.is_null())
}

/// First line item of an order.
pub(crate) fn first_item(order: &Record) -> Option<&serde_json::Map<String, Value>> {
    order.get("items")?.as_array()?.first()?.as_object()
}

/// Parse the date part of the formats the CRM emits.
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(stamp) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(stamp.date_naive());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(stamp) = chrono::NaiveDateTime::parse_from_str(raw, format) {
            return Some(stamp.date());
        }
    }
    None
}

/// Date found at the first parseable fallback path.
pub(crate) fn date_of(record: &Record, paths: &[&[&str]]) -> Option<NaiveDate> {
    paths
        .iter()
        .filter_map(|path| value_at(record, path))
        .filter_map(Value::as_str)
        .find_map(parse_date)
}

pub(crate) fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Order grand total, falling through the known total fields.
pub(crate) fn order_total(order: &Record) -> f64 {
    first_of(
        order,
        &[&["totals", "grand_total"], &["totals", "total"], &["total"]],
    )
    .and_then(numeric)
    .unwrap_or(0.0)
}

/// Grouping key for revenue aggregation: item package name, then product
/// name, then the unknown bucket.
pub(crate) fn package_name(order: &Record) -> String {
    const UNKNOWN: &str = "Indefinido";

    let from_item = first_item(order).and_then(|item| {
        let package = item
            .get("package")
            .and_then(|p| p.as_object())
            .and_then(|p| p.get("name"))
            .or_else(|| {
                item.get("product")
                    .and_then(|p| p.as_object())
                    .and_then(|p| p.get("package"))
                    .and_then(|p| p.as_object())
                    .and_then(|p| p.get("name"))
            })
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty());
        if let Some(name) = package {
            return Some(name.to_string());
        }

        item.get("product")
            .and_then(|p| p.as_object())
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    });

    from_item
        .or_else(|| {
            value_at(order, &["product", "name"])
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Percentage change guarded against a zero base.
pub(crate) fn percent(delta: f64, base: f64) -> f64 {
    if base == 0.0 {
        0.0
    } else {
        delta / base * 100.0
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Full calendar years from `birth` to `today`.
pub(crate) fn age_in_years(birth: NaiveDate, today: NaiveDate) -> i32 {
    use chrono::Datelike;

    let mut years = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    years
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn package_name_fallback_chain() {
        let with_package = order(json!({"items": [{"package": {"name": "Premium"}}]}));
        assert_eq!(package_name(&with_package), "Premium");

        let nested = order(json!({"items": [{"product": {"package": {"name": "Gold"}}}]}));
        assert_eq!(package_name(&nested), "Gold");

        let product_only = order(json!({"items": [{"product": {"name": "Ensaio"}}]}));
        assert_eq!(package_name(&product_only), "Ensaio");

        let bare = order(json!({"items": []}));
        assert_eq!(package_name(&bare), "Indefinido");
    }

    #[test]
    fn order_total_falls_through_fields() {
        assert_eq!(order_total(&order(json!({"totals": {"grand_total": 150.5}}))), 150.5);
        assert_eq!(order_total(&order(json!({"totals": {"total": "99.9"}}))), 99.9);
        assert_eq!(order_total(&order(json!({"total": 10}))), 10.0);
        assert_eq!(order_total(&order(json!({"total": "not a number"}))), 0.0);
    }

    #[test]
    fn percent_guards_zero_base() {
        assert_eq!(percent(50.0, 0.0), 0.0);
        assert_eq!(percent(50.0, 100.0), 50.0);
    }

    #[test]
    fn parse_date_accepts_crm_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        assert_eq!(parse_date("2025-03-14"), Some(expected));
        assert_eq!(parse_date("2025-03-14T10:30:00-03:00"), Some(expected));
        assert_eq!(parse_date("2025-03-14 10:30:00"), Some(expected));
        assert_eq!(parse_date("tomorrow"), None);
    }

    #[test]
    fn age_counts_completed_years_only() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let before_birthday = NaiveDate::from_ymd_opt(2018, 7, 1).unwrap();
        let after_birthday = NaiveDate::from_ymd_opt(2018, 6, 1).unwrap();
        assert_eq!(age_in_years(before_birthday, today), 6);
        assert_eq!(age_in_years(after_birthday, today), 7);
    }
}
