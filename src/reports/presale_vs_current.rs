//! Package revenue comparison between two date windows.
//!
//! The windows come from explicit start/end filters or are derived from
//! `current_year`/`previous_year`. Both windows are harvested in full, so
//! the comparison covers the whole period rather than the first page.

use super::{order_total, package_name, percent, round2, today};
use crate::cache::report_cache_key;
use crate::error::EngineResult;
use crate::filters::FilterSet;
use crate::pipeline::{Pipeline, Record, SortDirection};
use crate::report::validate::{schema, FieldRule, Schema};
use crate::report::{Meta, ReportContext, ReportResult, ReportSpec};
use chrono::Datelike;
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub struct PresaleVsCurrent;

#[derive(Default, Clone, Copy)]
struct WindowTotals {
    count: u64,
    revenue: f64,
}

impl ReportSpec for PresaleVsCurrent {
    fn key(&self) -> &str {
        "orders.presale_vs_current"
    }

    fn title(&self) -> &str {
        "Comparativo de pre-venda vs. ano atual por pacote"
    }

    fn rules(&self) -> Schema {
        schema(&[
            ("current_year", FieldRule::int_range(2000, 2100).optional()),
            ("previous_year", FieldRule::int_range(2000, 2100).optional()),
            ("current_start", FieldRule::date().optional()),
            ("current_end", FieldRule::date().optional()),
            ("previous_start", FieldRule::date().optional()),
            ("previous_end", FieldRule::date().optional()),
            ("product[slug]", FieldRule::str_length(1, 100).optional()),
        ])
    }

    fn default_filters(&self) -> Vec<(String, String)> {
        vec![("include".into(), "items,customer".into())]
    }

    fn columns(&self) -> Vec<String> {
        [
            "package",
            "current_revenue",
            "previous_revenue",
            "revenue_delta",
            "revenue_delta_percent",
            "current_count",
            "previous_count",
            "count_delta",
        ]
        .map(String::from)
        .to_vec()
    }

    fn sortable(&self) -> Vec<String> {
        [
            "revenue_delta",
            "current_revenue",
            "revenue_delta_percent",
            "count_delta",
        ]
        .map(String::from)
        .to_vec()
    }

    fn cache_ttl(&self) -> i64 {
        1800
    }

    fn run(&self, mut filters: FilterSet, ctx: &ReportContext) -> EngineResult<ReportResult> {
        let current_year = filters
            .take("current_year")
            .and_then(|y| y.parse::<i32>().ok())
            .unwrap_or_else(|| today().year());
        let previous_year = filters
            .take("previous_year")
            .and_then(|y| y.parse::<i32>().ok())
            .unwrap_or(current_year - 1);

        let current_start = filters
            .take("current_start")
            .unwrap_or_else(|| format!("{current_year}-01-01"));
        let current_end = filters
            .take("current_end")
            .unwrap_or_else(|| format!("{current_year}-12-31"));
        let previous_start = filters
            .take("previous_start")
            .unwrap_or_else(|| format!("{previous_year}-01-01"));
        let previous_end = filters
            .take("previous_end")
            .unwrap_or_else(|| format!("{previous_year}-12-31"));

        filters.merge_includes(&["items", "customer"]);

        // Explicit caller sort wins; the report default is largest delta
        // first.
        let (sort_field, direction) = match filters.sort() {
            Some(field) => (field.to_string(), filters.dir()),
            None => ("revenue_delta".to_string(), SortDirection::Desc),
        };

        let extras = [
            ("_current", json!([current_start, current_end])),
            ("_previous", json!([previous_start, previous_end])),
        ];
        let cache_key = report_cache_key(self.key(), &filters, &extras);
        let ttl = filters.effective_ttl(self.cache_ttl());

        ctx.remember(&cache_key, ttl, || {
            let current_orders = self.window(ctx, &filters, &current_start, &current_end)?;
            let previous_orders = self.window(ctx, &filters, &previous_start, &previous_end)?;

            let current = aggregate(&current_orders);
            let previous = aggregate(&previous_orders);

            let mut packages: Vec<&String> = current.keys().collect();
            for package in previous.keys() {
                if !current.contains_key(package) {
                    packages.push(package);
                }
            }

            let rows: Vec<Record> = packages
                .into_iter()
                .map(|package| {
                    let now = current.get(package).copied().unwrap_or_default();
                    let then = previous.get(package).copied().unwrap_or_default();
                    let delta = now.revenue - then.revenue;

                    let mut row = Record::new();
                    row.insert("package".into(), json!(package));
                    row.insert("current_revenue".into(), json!(round2(now.revenue)));
                    row.insert("previous_revenue".into(), json!(round2(then.revenue)));
                    row.insert("revenue_delta".into(), json!(round2(delta)));
                    row.insert(
                        "revenue_delta_percent".into(),
                        json!(round2(percent(delta, then.revenue))),
                    );
                    row.insert("current_count".into(), json!(now.count));
                    row.insert("previous_count".into(), json!(then.count));
                    row.insert(
                        "count_delta".into(),
                        json!(now.count as i64 - then.count as i64),
                    );
                    row
                })
                .collect();

            let rows = Pipeline::new(rows).sort(&sort_field, direction).into_vec();

            let sum = |field: &str| -> f64 {
                rows.iter()
                    .filter_map(|row| row.get(field))
                    .filter_map(Value::as_f64)
                    .sum()
            };
            let current_orders_total: u64 = rows
                .iter()
                .filter_map(|row| row.get("current_count"))
                .filter_map(Value::as_u64)
                .sum();
            let previous_orders_total: u64 = rows
                .iter()
                .filter_map(|row| row.get("previous_count"))
                .filter_map(Value::as_u64)
                .sum();

            let total = rows.len();
            let page = Pipeline::new(rows.clone()).paginate(filters.page(), filters.per_page());

            let mut result = ReportResult::new(page, self.columns());
            result.summary.insert(
                "current_revenue_total".into(),
                json!(round2(sum("current_revenue"))),
            );
            result.summary.insert(
                "previous_revenue_total".into(),
                json!(round2(sum("previous_revenue"))),
            );
            result.summary.insert("current_orders".into(), json!(current_orders_total));
            result.summary.insert("previous_orders".into(), json!(previous_orders_total));

            result.meta = Meta::for_page(filters.page(), filters.per_page());
            result.meta.total = Some(total as u64);
            result.meta.extra.insert(
                "periods".into(),
                json!({
                    "current": {"start": current_start, "end": current_end},
                    "previous": {"start": previous_start, "end": previous_end},
                }),
            );
            Ok(result)
        })
    }
}

impl PresaleVsCurrent {
    /// Harvest every page of one date window.
    fn window(
        &self,
        ctx: &ReportContext,
        filters: &FilterSet,
        start: &str,
        end: &str,
    ) -> EngineResult<Vec<Record>> {
        let windowed = filters
            .with_value("order[created-start]", start)
            .with_value("order[created-end]", end);
        let harvest = ctx
            .harvester()
            .harvest_orders(&windowed.to_query(), filters.trace_id())?;
        Ok(harvest.records)
    }
}

fn aggregate(orders: &[Record]) -> BTreeMap<String, WindowTotals> {
    let mut totals: BTreeMap<String, WindowTotals> = BTreeMap::new();
    for order in orders {
        let entry = totals.entry(package_name(order)).or_default();
        entry.count += 1;
        entry.revenue += order_total(order);
    }
    totals
}
