//! Pagination harvester.
//!
//! Follows the CRM's `links.next` cursors to materialize a full result
//! set: fetch a page, append its `data` in order, merge the next link's
//! query parameters over the current query, repeat. The upstream dictates
//! cursor semantics entirely; the harvester is cursor-format-agnostic.
//!
//! A hard page cap bounds the loop so malformed or cyclic `next` links
//! can never cause unbounded fetching. Hitting the cap is not an error;
//! the harvest stops and returns what was collected.

use crate::client::{CrmClient, CrmResult, ORDERS_SEARCH};
use crate::pipeline::Record;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Default bound on pages fetched per harvest.
pub const DEFAULT_PAGE_CAP: usize = 10;

/// Everything one harvest collected.
#[derive(Debug, Default)]
pub struct Harvest {
    /// Records in page order, within-page order preserved.
    pub records: Vec<Record>,
    /// Number of pages actually fetched.
    pub pages: usize,
    /// Meta object of the last fetched page (totals live here upstream).
    pub meta: serde_json::Map<String, Value>,
}

/// Sequentially walks an endpoint's pagination.
pub struct Harvester<'a> {
    client: &'a dyn CrmClient,
    page_cap: usize,
}

impl<'a> Harvester<'a> {
    pub fn new(client: &'a dyn CrmClient) -> Self {
        Self {
            client,
            page_cap: DEFAULT_PAGE_CAP,
        }
    }

    pub fn with_page_cap(mut self, page_cap: usize) -> Self {
        self.page_cap = page_cap.max(1);
        self
    }

    /// Harvest the order-search endpoint.
    pub fn harvest_orders(&self, query: &[(String, String)], trace_id: &str) -> CrmResult<Harvest> {
        self.harvest(ORDERS_SEARCH, query, trace_id)
    }

    /// Harvest an arbitrary endpoint with a base query.
    pub fn harvest(
        &self,
        endpoint: &str,
        query: &[(String, String)],
        trace_id: &str,
    ) -> CrmResult<Harvest> {
        let mut current: BTreeMap<String, String> = query.iter().cloned().collect();
        let mut harvest = Harvest::default();

        for _ in 0..self.page_cap {
            let pairs: Vec<(String, String)> = current
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let envelope = self.client.get(endpoint, &pairs, trace_id)?;
            harvest.pages += 1;

            if envelope.data.is_empty() {
                break;
            }

            debug!(
                endpoint,
                trace_id,
                page = harvest.pages,
                records = envelope.data.len(),
                "harvested page"
            );

            harvest.records.extend(envelope.data);
            harvest.meta = envelope.meta;

            let Some(next) = envelope.links.next.filter(|link| !link.is_empty()) else {
                break;
            };
            let Some(cursor) = extract_query(&next) else {
                break;
            };
            for (key, value) in cursor {
                current.insert(key, value);
            }
        }

        Ok(harvest)
    }
}

/// Parse the query string of a next link into pairs. Returns `None` when
/// the link carries no parameters (nothing to advance on).
fn extract_query(link: &str) -> Option<Vec<(String, String)>> {
    let url = reqwest::Url::parse(link)
        .or_else(|_| {
            // Relative links resolve against a throwaway base.
            reqwest::Url::parse("http://relative.invalid/").and_then(|base| base.join(link))
        })
        .ok()?;

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs)
    }
}
