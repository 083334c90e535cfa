//! Report result caching.
//!
//! Three pieces:
//!
//! - [`CacheStore`]: the key-value store abstraction (`get` /
//!   `setex`). The store is optional and may be transiently unreachable;
//!   TTL enforcement belongs to the store, not the engine.
//! - [`signature`]: content-addressed cache keys derived from a report key
//!   and its normalized filter set.
//! - [`memo`]: the cache-aside `remember` wrapper. Cache failures are
//!   logged and degraded, never surfaced. Caching is strictly
//!   best-effort.
//!
//! # Key format
//!
//! ```text
//! relato:report:{report_key}:{sha256(sorted filters + extras)}
//! ```

mod memo;
mod signature;

pub use memo::remember;
pub use signature::{compute_hash, report_cache_key};

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Errors raised by a cache store backend.
///
/// These never propagate out of the engine; the memoizer downgrades them
/// to misses or skipped writes.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache payload error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Key-value store with TTL, the shape of a Redis `GET`/`SETEX` pair.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> CacheResult<Option<String>>;

    fn setex(&self, key: &str, ttl_secs: u64, value: &str) -> CacheResult<()>;
}

/// In-process store for single-instance deployments and tests.
///
/// Entries expire lazily on read.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        match entries.get(key) {
            Some((value, deadline)) if *deadline > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn setex(&self, key: &str, ttl_secs: u64, value: &str) -> CacheResult<()> {
        let deadline = Instant::now() + Duration::from_secs(ttl_secs);
        self.entries
            .lock()
            .map_err(|e| CacheError::Backend(e.to_string()))?
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }
}
