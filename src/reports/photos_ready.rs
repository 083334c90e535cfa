//! Orders whose session already happened and whose status says the
//! photos can be picked up.
//!
//! The upstream cannot filter on several statuses at once, so the runner
//! harvests once per eligible status slug, retrying with the numeric
//! status id when a slug returns nothing, and falls back to an
//! unfiltered harvest when every status query came back empty. Collected
//! orders are deduplicated by uuid (or id) and re-checked against the
//! eligible statuses locally.

use super::{text, today};
use crate::client::CrmClient;
use crate::error::EngineResult;
use crate::filters::FilterSet;
use crate::harvest::Harvester;
use crate::pipeline::{Record, SortDirection};
use crate::report::validate::{schema, FieldRule};
use crate::report::{ClosureReport, Meta, ReportResult};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

const READY_STATUSES: &[(&str, i64)] = &[("session_scheduled", 6), ("selection_finalized", 9)];
const ORDER_LINK_BASE: &str = "https://evydencia.com/gestao/pedidos";
const STATUS_PAGE_CAP: usize = 30;
const STATUS_PER_PAGE: u32 = 200;

pub fn photos_ready() -> ClosureReport {
    let start = (today() - Duration::days(30)).format("%Y-%m-%d").to_string();
    let end = (today() - Duration::days(1)).format("%Y-%m-%d").to_string();

    ClosureReport::new(
        "orders.photos_ready",
        "Clientes com fotos prontas para retirada",
        Box::new(run),
    )
    .description(
        "Lista pedidos com sessoes ja realizadas e com status que indicam \
         fotos disponiveis para retirada.",
    )
    .rules(schema(&[
        ("product[slug]", FieldRule::str_length(1, 64).optional()),
        ("order[session-start]", FieldRule::date().optional()),
        ("order[session-end]", FieldRule::date().optional()),
        ("fetch", FieldRule::one_of(&["page", "all"]).optional()),
    ]))
    .defaults(&[
        ("product[slug]", "natal"),
        ("order[session-start]", start.as_str()),
        ("order[session-end]", end.as_str()),
        ("include", "items,customer,status"),
    ])
    .columns(&[
        "id",
        "uuid",
        "schedule_datetime",
        "schedule_1",
        "schedule_time",
        "created_at",
        "customer_first_name",
        "customer_name",
        "customer_whatsapp_plain",
        "customer_whatsapp_formatted",
        "products",
        "status_name",
        "link",
    ])
    .sortable(&["schedule_1", "customer_name", "customer_first_name", "status_name"])
    .cache_ttl(300)
}

fn run(client: &dyn CrmClient, filters: &FilterSet, trace_id: &str) -> EngineResult<ReportResult> {
    let mut query = filters.clone();
    let fetch_all = query.take("fetch").as_deref() == Some("all");
    query.take("item[slug]");
    query.take("order[status]");
    query.merge_includes(&["items", "customer", "status"]);

    // The session window is fixed to the report's purpose regardless of
    // what the caller sent.
    let session_start = (today() - Duration::days(30)).format("%Y-%m-%d").to_string();
    let session_end = (today() - Duration::days(1)).format("%Y-%m-%d").to_string();
    query.set("product[slug]", "natal");
    query.set("order[session-start]", session_start.as_str());
    query.set("order[session-end]", session_end.as_str());

    // Harvests always start from page one at the widest page size; the
    // caller's pagination applies to the assembled rows, not upstream.
    let mut base: Vec<(String, String)> = query
        .values()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    base.push(("page".into(), "1".into()));
    base.push(("per_page".into(), STATUS_PER_PAGE.to_string()));

    let harvester = Harvester::new(client).with_page_cap(STATUS_PAGE_CAP);
    let mut collected = Collected::default();
    let mut status_filters: BTreeMap<String, u64> = BTreeMap::new();
    let mut crm_requests: u64 = 0;

    let mut fetch_status = |status_value: &str, collected: &mut Collected| -> EngineResult<u64> {
        let mut status_query = base.clone();
        status_query.push(("order[status]".into(), status_value.to_string()));
        let harvest = harvester.harvest_orders(&status_query, trace_id)?;
        crm_requests += harvest.pages as u64;

        let inserted = collected.absorb(harvest.records);
        *status_filters.entry(status_value.to_string()).or_insert(0) += inserted;
        Ok(inserted)
    };

    for (slug, id) in READY_STATUSES {
        if fetch_status(slug, &mut collected)? == 0 {
            fetch_status(&id.to_string(), &mut collected)?;
        }
    }

    if collected.orders.is_empty() {
        let harvest = harvester.harvest_orders(&base, trace_id)?;
        crm_requests += harvest.pages as u64;

        let inserted = collected.absorb(harvest.records);
        if inserted > 0 {
            status_filters.insert("__fallback__".into(), inserted);
        }
    }

    let mut rows: Vec<(Record, Option<i64>)> = collected
        .orders
        .into_iter()
        .map(|order| project_row(&order))
        .collect();

    let sort_field = filters.sort().unwrap_or("schedule_1");
    let direction = filters.dir();
    rows.sort_by(|left, right| {
        let ordering = match sort_field {
            "customer_name" | "customer_first_name" | "status_name" => {
                compare_nullable(&string_key(&left.0, sort_field), &string_key(&right.0, sort_field))
            }
            _ => compare_nullable(&left.1, &right.1),
        };
        match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });

    let total = rows.len();
    let (page, per_page) = if fetch_all {
        (1, total as u32)
    } else {
        let page = filters.page();
        let per_page = filters.per_page();
        let offset = ((page - 1) as usize).saturating_mul(per_page as usize);
        rows = rows.into_iter().skip(offset).take(per_page as usize).collect();
        (page, per_page)
    };

    let data: Vec<Record> = rows.into_iter().map(|(row, _)| row).collect();

    let mut result = ReportResult::new(data, Vec::new());
    result.meta = Meta::for_page(page, per_page);
    result.meta.total = Some(total as u64);
    result.meta.extra.insert("crm_requests".into(), json!(crm_requests));
    result.meta.extra.insert("status_filters".into(), json!(status_filters));
    result.meta.extra.insert(
        "filters_snapshot".into(),
        json!({
            "product[slug]": "natal",
            "order[session-start]": session_start,
            "order[session-end]": session_end,
        }),
    );
    result.summary.insert("total".into(), json!(total));
    Ok(result)
}

/// Deduplicated order accumulator. Orders keep first-seen position;
/// a re-harvested order replaces its earlier copy in place.
#[derive(Default)]
struct Collected {
    orders: Vec<Record>,
    index: BTreeMap<String, usize>,
}

impl Collected {
    /// Absorb a batch, keeping only eligible orders. Returns how many
    /// were new to the accumulator.
    fn absorb(&mut self, batch: Vec<Record>) -> u64 {
        let mut inserted = 0;
        for order in batch {
            if !status_eligible(&order) {
                continue;
            }
            match dedupe_key(&order) {
                Some(key) => {
                    if let Some(&at) = self.index.get(&key) {
                        self.orders[at] = order;
                    } else {
                        self.index.insert(key, self.orders.len());
                        self.orders.push(order);
                        inserted += 1;
                    }
                }
                None => {
                    self.orders.push(order);
                    inserted += 1;
                }
            }
        }
        inserted
    }
}

fn dedupe_key(order: &Record) -> Option<String> {
    if let Some(uuid) = order.get("uuid").and_then(Value::as_str).filter(|u| !u.is_empty()) {
        return Some(format!("uuid:{}", uuid.to_ascii_lowercase()));
    }
    order.get("id").map(|id| format!("id:{id}"))
}

fn status_eligible(order: &Record) -> bool {
    let (status_id, status_slug) = status_parts(order);
    READY_STATUSES.iter().any(|(slug, id)| {
        status_slug.as_deref() == Some(*slug) || status_id == Some(*id)
    })
}

/// Pull `(id, slug)` out of the order's status, which upstream ships
/// either as an object or as a bare id.
fn status_parts(order: &Record) -> (Option<i64>, Option<String>) {
    match order.get("status") {
        Some(Value::Object(status)) => {
            let id = status.get("id").and_then(Value::as_i64);
            let slug = status
                .get("slug")
                .or_else(|| status.get("code"))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase);
            (id, slug)
        }
        other => {
            let id = other
                .and_then(Value::as_i64)
                .or_else(|| order.get("status_id").and_then(Value::as_i64));
            (id, None)
        }
    }
}

fn project_row(order: &Record) -> (Record, Option<i64>) {
    let schedule_raw = order
        .get("schedule_1")
        .or_else(|| order.get("schedule_one"))
        .and_then(Value::as_str);
    let schedule = schedule_raw.map(Schedule::parse);

    let customer_name = text(order, &["customer", "name"]);
    let phone_plain = order
        .get("customer")
        .and_then(|c| c.get("whatsapp"))
        .and_then(Value::as_str)
        .and_then(normalize_phone);
    let phone_formatted = phone_plain.as_deref().map(format_phone);
    let status_name = match order.get("status") {
        Some(Value::Object(status)) => status
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => text(order, &["status_name"]),
    };
    let uuid = order.get("uuid").and_then(Value::as_str).filter(|u| !u.is_empty());

    let mut row = Record::new();
    row.insert("id".into(), order.get("id").cloned().unwrap_or(Value::Null));
    row.insert("uuid".into(), json!(uuid));
    row.insert(
        "schedule_datetime".into(),
        json!(schedule.as_ref().and_then(Schedule::iso)),
    );
    row.insert("schedule_1".into(), json!(schedule.as_ref().and_then(Schedule::date)));
    row.insert(
        "schedule_time".into(),
        json!(schedule.as_ref().and_then(|s| s.time())),
    );
    row.insert(
        "created_at".into(),
        order.get("created_at").cloned().unwrap_or(Value::Null),
    );
    row.insert("customer_first_name".into(), json!(first_name(&customer_name)));
    row.insert("customer_name".into(), json!(customer_name));
    row.insert("customer_whatsapp_plain".into(), json!(phone_plain));
    row.insert("customer_whatsapp_formatted".into(), json!(phone_formatted));
    row.insert("products".into(), json!(first_product_name(order)));
    row.insert("status_name".into(), json!(status_name));
    row.insert(
        "link".into(),
        json!(uuid.map(|u| format!("{ORDER_LINK_BASE}/{u}/detalhes"))),
    );

    let stamp = schedule.as_ref().and_then(Schedule::timestamp);
    (row, stamp)
}

/// One parsed (or unparseable) session slot.
enum Schedule {
    Parsed(NaiveDateTime),
    Raw(String),
}

impl Schedule {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
            .map_or_else(|| Self::Raw(raw.to_string()), Self::Parsed)
    }

    fn date(&self) -> Option<String> {
        match self {
            Self::Parsed(dt) => Some(dt.format("%d/%m/%y").to_string()),
            Self::Raw(raw) => Some(raw.clone()),
        }
    }

    fn time(&self) -> Option<String> {
        match self {
            Self::Parsed(dt) => Some(dt.format("%H:%M").to_string()),
            Self::Raw(_) => None,
        }
    }

    fn iso(&self) -> Option<String> {
        match self {
            Self::Parsed(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
            Self::Raw(raw) => Some(raw.clone()),
        }
    }

    fn timestamp(&self) -> Option<i64> {
        match self {
            Self::Parsed(dt) => Some(dt.and_utc().timestamp()),
            Self::Raw(_) => None,
        }
    }
}

/// Strip a WhatsApp value down to its national digits: drop the `55`
/// country prefix and keep at most the trailing 11 digits.
fn normalize_phone(raw: &str) -> Option<String> {
    let mut digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    if digits.starts_with("55") && digits.len() > 11 {
        digits.drain(..2);
    }
    if digits.len() > 11 {
        digits = digits[digits.len() - 11..].to_string();
    }
    Some(digits)
}

/// Brazilian display format by digit count; unknown lengths pass through.
fn format_phone(digits: &str) -> String {
    match digits.len() {
        11 => format!("({}) {}-{}", &digits[..2], &digits[2..7], &digits[7..]),
        10 => format!("({}) {}-{}", &digits[..2], &digits[2..6], &digits[6..]),
        9 => format!("{}-{}", &digits[..5], &digits[5..]),
        8 => format!("{}-{}", &digits[..4], &digits[4..]),
        _ => digits.to_string(),
    }
}

fn first_name(name: &str) -> Option<String> {
    name.split_whitespace().next().map(str::to_string)
}

fn first_product_name(order: &Record) -> String {
    let Some(Value::Array(items)) = order.get("items") else {
        return String::new();
    };
    items
        .iter()
        .filter_map(|item| item.get("product"))
        .filter_map(|product| product.get("name"))
        .filter_map(Value::as_str)
        .find(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_default()
}

fn string_key(row: &Record, field: &str) -> Option<String> {
    row.get(field)
        .and_then(Value::as_str)
        .map(str::to_lowercase)
}

/// Missing keys sort after present ones; the engine-level direction flip
/// then puts them first on descending sorts.
fn compare_nullable<T: PartialOrd>(left: &Option<T>, right: &Option<T>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(l), Some(r)) => l.partial_cmp(r).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_normalization_drops_country_code_and_formats() {
        assert_eq!(normalize_phone("+55 (11) 98888-7777").as_deref(), Some("11988887777"));
        assert_eq!(normalize_phone("11 3222-1111").as_deref(), Some("1132221111"));
        assert_eq!(normalize_phone("sem numero"), None);

        assert_eq!(format_phone("11988887777"), "(11) 98888-7777");
        assert_eq!(format_phone("1132221111"), "(11) 3222-1111");
        assert_eq!(format_phone("988887777"), "98888-7777");
        assert_eq!(format_phone("32221111"), "3222-1111");
        assert_eq!(format_phone("123"), "123");
    }

    #[test]
    fn schedule_formats_split_date_and_time() {
        let parsed = Schedule::parse("2026-08-15 14:30:00");
        assert_eq!(parsed.date().as_deref(), Some("15/08/26"));
        assert_eq!(parsed.time().as_deref(), Some("14:30"));
        assert_eq!(parsed.iso().as_deref(), Some("2026-08-15 14:30:00"));
        assert!(parsed.timestamp().is_some());

        let garbled = Schedule::parse("em breve");
        assert_eq!(garbled.date().as_deref(), Some("em breve"));
        assert_eq!(garbled.time(), None);
        assert_eq!(garbled.timestamp(), None);
    }

    #[test]
    fn eligibility_accepts_slug_or_id() {
        let by_slug: Record = serde_json::from_value(serde_json::json!({
            "status": {"slug": "Session_Scheduled", "id": 42}
        }))
        .unwrap();
        let by_id: Record = serde_json::from_value(serde_json::json!({
            "status": {"name": "whatever", "id": 9}
        }))
        .unwrap();
        let bare_id: Record = serde_json::from_value(serde_json::json!({"status": 6})).unwrap();
        let neither: Record = serde_json::from_value(serde_json::json!({
            "status": {"slug": "closed", "id": 3}
        }))
        .unwrap();

        assert!(status_eligible(&by_slug));
        assert!(status_eligible(&by_id));
        assert!(status_eligible(&bare_id));
        assert!(!status_eligible(&neither));
    }
}
