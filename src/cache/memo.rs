//! Cache-aside memoizer for report results.

use super::CacheStore;
use crate::error::EngineResult;
use crate::report::ReportResult;
use tracing::warn;

/// Wrap a producer with get/set against the store.
///
/// - `ttl_secs <= 0` or no store: call `produce` directly.
/// - Read errors and payloads that fail to decode into the
///   `{data, summary, meta, columns}` shape count as misses, never errors.
/// - On a hit the decoded result comes back with `cache_hit = true` and
///   the key recorded in meta.
/// - On a miss the produced result is stored best-effort; write failures
///   are logged and swallowed.
///
/// There is no single-flight protection: concurrent identical requests
/// racing an empty entry each recompute from upstream.
pub fn remember<F>(
    store: Option<&dyn CacheStore>,
    key: &str,
    ttl_secs: i64,
    produce: F,
) -> EngineResult<ReportResult>
where
    F: FnOnce() -> EngineResult<ReportResult>,
{
    let Some(store) = store else {
        return produce();
    };
    if ttl_secs <= 0 {
        return produce();
    }

    match store.get(key) {
        Ok(Some(payload)) => match serde_json::from_str::<ReportResult>(&payload) {
            Ok(mut result) => {
                result.meta.cache_hit = Some(true);
                result.meta.cache_key = Some(key.to_string());
                return Ok(result);
            }
            Err(error) => {
                warn!(key, %error, "cache payload failed to decode; treating as miss");
            }
        },
        Ok(None) => {}
        Err(error) => {
            warn!(key, %error, "cache read failed; treating as miss");
        }
    }

    let mut result = produce()?;
    result.meta.cache_hit.get_or_insert(false);
    result.meta.cache_key = Some(key.to_string());

    match serde_json::to_string(&result) {
        Ok(serialized) => {
            if let Err(error) = store.setex(key, ttl_secs as u64, &serialized) {
                warn!(key, %error, "cache write failed; result returned uncached");
            }
        }
        Err(error) => {
            warn!(key, %error, "result not serializable for caching");
        }
    }

    Ok(result)
}
