//! Shared services handed to report bodies.

use crate::cache::{remember, CacheStore};
use crate::client::CrmClient;
use crate::db::RowExecutor;
use crate::error::EngineResult;
use crate::harvest::{Harvester, DEFAULT_PAGE_CAP};
use crate::report::ReportResult;
use std::sync::Arc;

/// Execution context for one engine instance: the CRM client every report
/// needs, plus the optional cache and local database some reports use.
///
/// Cloning is cheap; all services are behind `Arc`.
#[derive(Clone)]
pub struct ReportContext {
    client: Arc<dyn CrmClient>,
    cache: Option<Arc<dyn CacheStore>>,
    db: Option<Arc<dyn RowExecutor>>,
    page_cap: usize,
}

impl ReportContext {
    pub fn new(client: Arc<dyn CrmClient>) -> Self {
        Self {
            client,
            cache: None,
            db: None,
            page_cap: DEFAULT_PAGE_CAP,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_db(mut self, db: Arc<dyn RowExecutor>) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_page_cap(mut self, page_cap: usize) -> Self {
        self.page_cap = page_cap.max(1);
        self
    }

    pub fn client(&self) -> &dyn CrmClient {
        self.client.as_ref()
    }

    pub fn db(&self) -> Option<&dyn RowExecutor> {
        self.db.as_deref()
    }

    /// Harvester over this context's client and page cap.
    pub fn harvester(&self) -> Harvester<'_> {
        Harvester::new(self.client.as_ref()).with_page_cap(self.page_cap)
    }

    /// Memoize `produce` under `key` for `ttl_secs`, against this
    /// context's cache store if one is configured.
    pub fn remember<F>(&self, key: &str, ttl_secs: i64, produce: F) -> EngineResult<ReportResult>
    where
        F: FnOnce() -> EngineResult<ReportResult>,
    {
        remember(self.cache.as_deref(), key, ttl_secs, produce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::client::{ApiEnvelope, CrmResult};
    use crate::report::Meta;

    struct NullCrm;

    impl CrmClient for NullCrm {
        fn get(
            &self,
            _endpoint: &str,
            _query: &[(String, String)],
            _trace_id: &str,
        ) -> CrmResult<ApiEnvelope> {
            Ok(ApiEnvelope::default())
        }
    }

    #[test]
    fn remember_without_cache_calls_through() {
        let ctx = ReportContext::new(Arc::new(NullCrm));
        let result = ctx
            .remember("k", 600, || {
                Ok(ReportResult {
                    data: Vec::new(),
                    summary: serde_json::Map::new(),
                    meta: Meta::default(),
                    columns: Vec::new(),
                })
            })
            .unwrap();
        assert_eq!(result.meta.cache_hit, None);
    }

    #[test]
    fn remember_with_cache_stores() {
        let cache = Arc::new(MemoryCacheStore::new());
        let ctx = ReportContext::new(Arc::new(NullCrm)).with_cache(cache.clone());
        ctx.remember("k", 600, || {
            Ok(ReportResult {
                data: Vec::new(),
                summary: serde_json::Map::new(),
                meta: Meta::default(),
                columns: Vec::new(),
            })
        })
        .unwrap();
        assert_eq!(cache.len(), 1);
    }
}
